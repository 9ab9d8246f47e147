//! Native `java/lang/StringBuilder`, backed by a `_buffer` host-string
//! field seeded at `new` time.

use std::cell::RefCell;
use std::rc::Rc;

use crate::class_instance::ClassInstance;
use crate::util::{char_from_java, format_double, format_float, value_to_string};
use crate::value::{Reference, Value};
use crate::{ExecError, VmError};

const BUFFER_FIELD: &str = "_buffer";

fn buffer_of(instance: &Rc<RefCell<ClassInstance>>) -> String {
    match instance.borrow().fields.get(BUFFER_FIELD) {
        Some(Value::Ref(Reference::String(s))) => s.to_string(),
        _ => String::new(),
    }
}

fn set_buffer(instance: &Rc<RefCell<ClassInstance>>, text: String) {
    instance
        .borrow_mut()
        .fields
        .insert(BUFFER_FIELD.to_owned(), Value::string(text));
}

/// Handles `<init>`, `append`, `toString`, and `length`.
///
/// `append` returns the receiver so chained appends keep working.
pub fn handle(
    receiver: &Value,
    instance: &Rc<RefCell<ClassInstance>>,
    method_name: &str,
    descriptor: &str,
    args: &[Value],
) -> Result<Option<Value>, ExecError> {
    match method_name {
        "<init>" => {
            match descriptor {
                // (I)V is a capacity hint; the buffer was seeded at `new`.
                "()V" | "(I)V" => {}
                "(Ljava/lang/String;)V" => {
                    if let Some(Value::Ref(Reference::String(s))) = args.first() {
                        set_buffer(instance, s.to_string());
                    }
                }
                _ => {}
            }
            Ok(None)
        }

        "append" => {
            let appended = match descriptor {
                "(Ljava/lang/String;)Ljava/lang/StringBuilder;" => match args.first() {
                    Some(Value::Null) => "null".to_owned(),
                    Some(Value::Ref(Reference::String(s))) => s.to_string(),
                    Some(other) => value_to_string(other),
                    None => String::new(),
                },
                "(I)Ljava/lang/StringBuilder;" => args[0].as_int()?.to_string(),
                "(J)Ljava/lang/StringBuilder;" => args[0].as_long()?.to_string(),
                "(F)Ljava/lang/StringBuilder;" => format_float(args[0].as_float()?),
                "(D)Ljava/lang/StringBuilder;" => format_double(args[0].as_double()?),
                "(C)Ljava/lang/StringBuilder;" => char_from_java(args[0].as_int()?).to_string(),
                "(Z)Ljava/lang/StringBuilder;" => {
                    if args[0].as_int()? != 0 { "true" } else { "false" }.to_owned()
                }
                "(Ljava/lang/Object;)Ljava/lang/StringBuilder;" => value_to_string(&args[0]),
                _ => {
                    return Err(VmError::NativeMethodNotImplemented {
                        key: format!("java/lang/StringBuilder.append:{descriptor}"),
                    }
                    .into())
                }
            };
            let mut buffer = buffer_of(instance);
            buffer.push_str(&appended);
            set_buffer(instance, buffer);
            Ok(Some(receiver.clone()))
        }

        "toString" => Ok(Some(Value::string(buffer_of(instance)))),

        "length" => {
            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            let length = buffer_of(instance).len() as i32;
            Ok(Some(Value::Int(length)))
        }

        _ => Err(VmError::NativeMethodNotImplemented {
            key: format!("java/lang/StringBuilder.{method_name}:{descriptor}"),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::handle;
    use crate::class_instance::ClassInstance;
    use crate::value::Value;

    fn builder() -> (Value, Rc<RefCell<ClassInstance>>) {
        let mut instance = ClassInstance::new("java/lang/StringBuilder");
        instance
            .fields
            .insert("_buffer".to_owned(), Value::string(""));
        let rc = Rc::new(RefCell::new(instance));
        (Value::Ref(crate::value::Reference::Object(rc.clone())), rc)
    }

    #[test]
    fn chained_appends_accumulate() {
        let (receiver, instance) = builder();
        handle(
            &receiver,
            &instance,
            "append",
            "(Ljava/lang/String;)Ljava/lang/StringBuilder;",
            &[Value::string("n=")],
        )
        .unwrap();
        handle(
            &receiver,
            &instance,
            "append",
            "(I)Ljava/lang/StringBuilder;",
            &[Value::Int(42)],
        )
        .unwrap();
        handle(
            &receiver,
            &instance,
            "append",
            "(D)Ljava/lang/StringBuilder;",
            &[Value::Double(1.5)],
        )
        .unwrap();

        let text = handle(&receiver, &instance, "toString", "()Ljava/lang/String;", &[])
            .unwrap()
            .unwrap();
        assert_eq!(crate::util::value_to_string(&text), "n=421.5");

        let length = handle(&receiver, &instance, "length", "()I", &[])
            .unwrap()
            .unwrap();
        assert_eq!(length.as_int().unwrap(), 7);
    }

    #[test]
    fn null_and_boolean_forms() {
        let (receiver, instance) = builder();
        handle(
            &receiver,
            &instance,
            "append",
            "(Ljava/lang/String;)Ljava/lang/StringBuilder;",
            &[Value::Null],
        )
        .unwrap();
        handle(
            &receiver,
            &instance,
            "append",
            "(Z)Ljava/lang/StringBuilder;",
            &[Value::Int(0)],
        )
        .unwrap();
        let text = handle(&receiver, &instance, "toString", "()Ljava/lang/String;", &[])
            .unwrap()
            .unwrap();
        assert_eq!(crate::util::value_to_string(&text), "nullfalse");
    }

    #[test]
    fn init_with_string_seeds_the_buffer() {
        let (receiver, instance) = builder();
        handle(
            &receiver,
            &instance,
            "<init>",
            "(Ljava/lang/String;)V",
            &[Value::string("seed")],
        )
        .unwrap();
        let text = handle(&receiver, &instance, "toString", "()Ljava/lang/String;", &[])
            .unwrap()
            .unwrap();
        assert_eq!(crate::util::value_to_string(&text), "seed");
    }
}
