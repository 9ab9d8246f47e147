//! Boxed-primitive interception.
//!
//! Boxes are plain heap objects with a `value` field; `valueOf` is
//! intercepted so boxing never reaches the JDK's cache initializers, and
//! the accessor/comparison methods are answered by inspecting `value`.

use std::cell::RefCell;
use std::rc::Rc;

use crate::class_instance::ClassInstance;
use crate::util::value_to_string;
use crate::value::{Reference, Value};
use crate::ExecError;

/// Intercepts `Box.valueOf(primitive)` for the eight box classes.
/// Returns `None` when the call is not a recognized boxing operation
/// (e.g. `Integer.valueOf(String)`).
pub fn try_value_of(
    class_name: &str,
    descriptor: &str,
    args: &[Value],
) -> Result<Option<Value>, ExecError> {
    let expected = match class_name {
        "java/lang/Integer" => "(I)Ljava/lang/Integer;",
        "java/lang/Long" => "(J)Ljava/lang/Long;",
        "java/lang/Float" => "(F)Ljava/lang/Float;",
        "java/lang/Double" => "(D)Ljava/lang/Double;",
        "java/lang/Boolean" => "(Z)Ljava/lang/Boolean;",
        "java/lang/Byte" => "(B)Ljava/lang/Byte;",
        "java/lang/Short" => "(S)Ljava/lang/Short;",
        "java/lang/Character" => "(C)Ljava/lang/Character;",
        _ => return Ok(None),
    };
    if descriptor != expected || args.len() != 1 {
        return Ok(None);
    }
    Ok(Some(Value::object(ClassInstance::boxed(
        class_name,
        args[0].clone(),
    ))))
}

pub(crate) fn numeric_compare(a: &Value, b: &Value) -> Option<i32> {
    let ordering = match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Long(x), Value::Long(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y)?,
        (Value::Double(x), Value::Double(y)) => x.partial_cmp(y)?,
        _ => return None,
    };
    Some(match ordering {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    })
}

fn numeric_equal(a: &Value, b: &Value) -> bool {
    numeric_compare(a, b) == Some(0)
}

/// Intercepts the accessor surface on any object carrying a `value`
/// field. Returns `None` when the receiver is not a box or the method is
/// not part of the intercepted set, letting ordinary resolution proceed.
pub fn try_handle(
    instance: &Rc<RefCell<ClassInstance>>,
    method_name: &str,
    _descriptor: &str,
    args: &[Value],
) -> Result<Option<Option<Value>>, ExecError> {
    let Some(value) = instance.borrow().fields.get("value").cloned() else {
        return Ok(None);
    };

    let result = match method_name {
        "intValue" => match value {
            Value::Int(v) => Value::Int(v),
            _ => return Ok(None),
        },
        "longValue" => match value {
            Value::Long(v) => Value::Long(v),
            Value::Int(v) => Value::Long(i64::from(v)),
            _ => return Ok(None),
        },
        "doubleValue" => match value {
            Value::Double(v) => Value::Double(v),
            Value::Int(v) => Value::Double(f64::from(v)),
            _ => return Ok(None),
        },
        "floatValue" => match value {
            Value::Float(v) => Value::Float(v),
            _ => return Ok(None),
        },

        "compareTo" => {
            let Some(Value::Ref(Reference::Object(other))) =
                args.first().map(|a| (*a).clone())
            else {
                return Ok(None);
            };
            let Some(other_value) = other.borrow().fields.get("value").cloned() else {
                return Ok(None);
            };
            match numeric_compare(&value, &other_value) {
                Some(ordering) => Value::Int(ordering),
                None => return Ok(None),
            }
        }

        "equals" => match args.first() {
            Some(Value::Null) => Value::Int(0),
            Some(Value::Ref(Reference::Object(other))) => {
                let other_value = other.borrow().fields.get("value").cloned();
                Value::Int(i32::from(
                    other_value.is_some_and(|ov| numeric_equal(&value, &ov)),
                ))
            }
            _ => Value::Int(0),
        },

        "hashCode" => match value {
            Value::Int(v) => Value::Int(v),
            #[allow(clippy::cast_possible_truncation)]
            Value::Long(v) => Value::Int((v ^ (v >> 32)) as i32),
            _ => return Ok(None),
        },

        "toString" => {
            let text = value_to_string(&Value::Ref(Reference::Object(Rc::clone(instance))));
            Value::string(text)
        }

        _ => return Ok(None),
    };

    Ok(Some(Some(result)))
}
