//! String conversion helpers shared by printing, string concatenation,
//! and `StringBuilder.append`.

use crate::value::{Reference, Value};

/// Formats a `double` the way `Double.toString` does for the common
/// cases: integral values get a trailing `.0`, everything else uses the
/// shortest decimal that round-trips.
#[must_use]
pub fn format_double(d: f64) -> String {
    if d.is_nan() {
        return "NaN".to_owned();
    }
    if d.is_infinite() {
        return if d > 0.0 { "Infinity" } else { "-Infinity" }.to_owned();
    }
    if d == d.trunc() {
        format!("{d:.1}")
    } else {
        format!("{d}")
    }
}

/// `Float.toString` analogue of [`format_double`].
#[must_use]
pub fn format_float(f: f32) -> String {
    if f.is_nan() {
        return "NaN".to_owned();
    }
    if f.is_infinite() {
        return if f > 0.0 { "Infinity" } else { "-Infinity" }.to_owned();
    }
    if f == f.trunc() {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

/// Converts a value to its Java string form: `null` literal, host strings
/// verbatim, boxed primitives through their `value` field, other objects
/// by class name.
#[must_use]
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Int(v) => v.to_string(),
        Value::Long(v) => v.to_string(),
        Value::Float(v) => format_float(*v),
        Value::Double(v) => format_double(*v),
        Value::Null => "null".to_owned(),
        Value::Ref(Reference::String(s)) => s.to_string(),
        Value::Ref(Reference::Object(obj)) => {
            let obj = obj.borrow();
            if let Some(val) = obj.fields.get("value") {
                match obj.class_name.as_str() {
                    "java/lang/Integer" | "java/lang/Short" | "java/lang/Byte" => {
                        if let Value::Int(v) = val {
                            return v.to_string();
                        }
                    }
                    "java/lang/Long" => {
                        if let Value::Long(v) = val {
                            return v.to_string();
                        }
                    }
                    "java/lang/Float" => {
                        if let Value::Float(v) = val {
                            return format_float(*v);
                        }
                    }
                    "java/lang/Double" => {
                        if let Value::Double(v) = val {
                            return format_double(*v);
                        }
                    }
                    "java/lang/Boolean" => {
                        if let Value::Int(v) = val {
                            return if *v != 0 { "true" } else { "false" }.to_owned();
                        }
                    }
                    "java/lang/Character" => {
                        if let Value::Int(v) = val {
                            return char_from_java(*v).to_string();
                        }
                    }
                    _ => {}
                }
            }
            obj.class_name.clone()
        }
        Value::Ref(Reference::Array(arr)) => {
            format!("[Ljava/lang/Object;@{:x}", std::rc::Rc::as_ptr(arr) as usize)
        }
        Value::Ref(Reference::PrintStream) => "java/io/PrintStream".to_owned(),
    }
}

/// A Java `char` value (UTF-16 code unit stored as int) as a host char.
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub fn char_from_java(code: i32) -> char {
    char::from_u32(code as u32).unwrap_or(char::REPLACEMENT_CHARACTER)
}
