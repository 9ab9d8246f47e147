//! The Java-exception carrier.
//!
//! Exceptions detected by the interpreter (null receiver, division by
//! zero, bad array index, ...) must be indistinguishable from user-thrown
//! ones: both carry a heap object and both participate in exception-table
//! matching. Everything goes through [`JavaThrowable::new`] /
//! [`JavaThrowable::with_message`] so a fault can never accidentally
//! surface as an uncatchable host error.

use std::cell::RefCell;
use std::rc::Rc;

use crate::class_instance::ClassInstance;
use crate::value::Value;

/// Well-known exception class names raised by the interpreter itself.
pub mod class_names {
    pub const NULL_POINTER: &str = "java/lang/NullPointerException";
    pub const ARITHMETIC: &str = "java/lang/ArithmeticException";
    pub const ARRAY_INDEX_OUT_OF_BOUNDS: &str = "java/lang/ArrayIndexOutOfBoundsException";
    pub const STRING_INDEX_OUT_OF_BOUNDS: &str = "java/lang/StringIndexOutOfBoundsException";
    pub const NEGATIVE_ARRAY_SIZE: &str = "java/lang/NegativeArraySizeException";
    pub const CLASS_CAST: &str = "java/lang/ClassCastException";
    pub const ARRAY_STORE: &str = "java/lang/ArrayStoreException";
    pub const STACK_OVERFLOW: &str = "java/lang/StackOverflowError";
}

/// The JDK field `Throwable.<init>(String)` stores its message in.
const MESSAGE_FIELD: &str = "detailMessage";

#[derive(Debug, Clone)]
pub struct JavaThrowable {
    pub object: Rc<RefCell<ClassInstance>>,
}

impl JavaThrowable {
    #[must_use]
    pub fn new(class_name: &str) -> JavaThrowable {
        JavaThrowable {
            object: Rc::new(RefCell::new(ClassInstance::new(class_name))),
        }
    }

    #[must_use]
    pub fn with_message(class_name: &str, message: &str) -> JavaThrowable {
        let throwable = JavaThrowable::new(class_name);
        throwable
            .object
            .borrow_mut()
            .fields
            .insert(MESSAGE_FIELD.to_owned(), Value::string(message));
        throwable
    }

    /// Wraps an already-constructed heap object, as `athrow` does.
    #[must_use]
    pub fn from_object(object: Rc<RefCell<ClassInstance>>) -> JavaThrowable {
        JavaThrowable { object }
    }

    #[must_use]
    pub fn class_name(&self) -> String {
        self.object.borrow().class_name.clone()
    }

    /// The detail message, if one was set by the constructor or by us.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        let object = self.object.borrow();
        match object.fields.get(MESSAGE_FIELD) {
            Some(Value::Ref(reference)) => reference.as_string().map(|s| s.to_string()),
            _ => None,
        }
    }
}
