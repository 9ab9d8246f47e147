//! Native `java/lang/String` methods.
//!
//! String values are host strings (there is no backing `char[]`), so the
//! instance surface is implemented here and diverted to before method
//! resolution. Indices are byte offsets, which coincide with Java's
//! char offsets for the ASCII programs this targets.

use crate::class_instance::ArrayInstance;
use crate::exception::{class_names, JavaThrowable};
use crate::util::{char_from_java, format_double, format_float, value_to_string};
use crate::value::{Reference, Value};
use crate::{ExecError, VmError};

fn bool_value(v: bool) -> Value {
    Value::Int(i32::from(v))
}

fn index_out_of_bounds(index: i32) -> ExecError {
    JavaThrowable::with_message(class_names::STRING_INDEX_OUT_OF_BOUNDS, &index.to_string()).into()
}

fn string_argument(args: &[Value], index: usize) -> &str {
    match args.get(index) {
        Some(Value::Ref(Reference::String(s))) => s,
        _ => "",
    }
}

/// The Java `String.hashCode` algorithm: `h = 31*h + c` over the
/// characters, with wrap-around.
#[must_use]
pub fn java_string_hash(text: &str) -> i32 {
    let mut hash = 0i32;
    for c in text.chars() {
        #[allow(clippy::cast_possible_wrap)]
        let c = c as i32;
        hash = hash.wrapping_mul(31).wrapping_add(c);
    }
    hash
}

/// Handles an instance method invoked on a host string receiver.
pub fn handle_method(
    text: &str,
    method_name: &str,
    descriptor: &str,
    args: &[Value],
) -> Result<Option<Value>, ExecError> {
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    let result = match method_name {
        "length" => Value::Int(text.len() as i32),

        "charAt" => {
            let index = args[0].as_int()?;
            let byte = usize::try_from(index)
                .ok()
                .and_then(|i| text.as_bytes().get(i))
                .ok_or_else(|| index_out_of_bounds(index))?;
            Value::Int(i32::from(*byte))
        }

        "substring" => {
            let begin = args[0].as_int()?;
            let end = if descriptor == "(I)Ljava/lang/String;" {
                text.len() as i32
            } else {
                args[1].as_int()?
            };
            if begin < 0 || end > text.len() as i32 || begin > end {
                return Err(index_out_of_bounds(begin));
            }
            #[allow(clippy::cast_sign_loss)]
            let slice = text
                .get(begin as usize..end as usize)
                .ok_or_else(|| index_out_of_bounds(begin))?;
            Value::string(slice)
        }

        "indexOf" => match descriptor {
            "(Ljava/lang/String;)I" => {
                let needle = string_argument(args, 0);
                Value::Int(text.find(needle).map_or(-1, |at| at as i32))
            }
            "(I)I" => {
                let needle = char_from_java(args[0].as_int()?);
                Value::Int(text.find(needle).map_or(-1, |at| at as i32))
            }
            _ => Value::Int(-1),
        },

        "contains" => bool_value(text.contains(string_argument(args, 0))),

        "equals" => match args.first() {
            Some(Value::Ref(Reference::String(other))) => bool_value(text == other.as_ref()),
            _ => bool_value(false),
        },

        "toUpperCase" => Value::string(text.to_uppercase()),
        "toLowerCase" => Value::string(text.to_lowercase()),
        "trim" => Value::string(text.trim()),

        "replace" => {
            if descriptor == "(CC)Ljava/lang/String;" {
                let from = char_from_java(args[0].as_int()?);
                let to = char_from_java(args[1].as_int()?);
                Value::string(text.replace(from, &to.to_string()))
            } else if args.len() >= 2 {
                let from = string_argument(args, 0);
                let to = string_argument(args, 1);
                Value::string(text.replace(from, to))
            } else {
                Value::string(text)
            }
        }

        "isEmpty" => bool_value(text.is_empty()),
        "hashCode" => Value::Int(java_string_hash(text)),
        "toString" | "intern" => Value::string(text),
        "startsWith" => bool_value(text.starts_with(string_argument(args, 0))),
        "endsWith" => bool_value(text.ends_with(string_argument(args, 0))),

        "toCharArray" => Value::array(ArrayInstance {
            elements: text.chars().map(|c| Value::Int(c as i32)).collect(),
        }),
        "getBytes" => Value::array(ArrayInstance {
            elements: text.bytes().map(|b| Value::Int(i32::from(b))).collect(),
        }),

        "compareTo" => {
            let other = string_argument(args, 0);
            Value::Int(match text.cmp(other) {
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Equal => 0,
                std::cmp::Ordering::Greater => 1,
            })
        }

        _ => {
            return Err(VmError::NativeMethodNotImplemented {
                key: format!("java/lang/String.{method_name}:{descriptor}"),
            }
            .into())
        }
    };
    Ok(Some(result))
}

/// The `String.valueOf` static overloads.
pub fn handle_value_of(descriptor: &str, args: &[Value]) -> Result<Value, ExecError> {
    let result = match descriptor {
        "(I)Ljava/lang/String;" => Value::string(args[0].as_int()?.to_string()),
        "(J)Ljava/lang/String;" => Value::string(args[0].as_long()?.to_string()),
        "(F)Ljava/lang/String;" => Value::string(format_float(args[0].as_float()?)),
        "(D)Ljava/lang/String;" => Value::string(format_double(args[0].as_double()?)),
        "(Z)Ljava/lang/String;" => {
            Value::string(if args[0].as_int()? != 0 { "true" } else { "false" })
        }
        "(C)Ljava/lang/String;" => Value::string(char_from_java(args[0].as_int()?).to_string()),
        "(Ljava/lang/Object;)Ljava/lang/String;" => Value::string(value_to_string(&args[0])),
        _ => {
            return Err(VmError::NativeMethodNotImplemented {
                key: format!("java/lang/String.valueOf:{descriptor}"),
            }
            .into())
        }
    };
    Ok(result)
}
