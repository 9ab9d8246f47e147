//! Heap object model: user objects, arrays, and lambda proxies.
//!
//! Objects and arrays are shared by every reference pointing at them and
//! reclaimed by the host allocator once unreachable.

use indexmap::IndexMap;

use crate::value::Value;

/// The call target recorded in a `LambdaMetafactory` proxy object.
///
/// Invoking `method_name` on the carrying instance prepends
/// `captured_args` to the call arguments and dispatches to
/// `target_class.target_method:target_descriptor`.
#[derive(Debug, Clone)]
pub struct LambdaTarget {
    pub interface_name: String,
    pub method_name: String,
    pub target_class: String,
    pub target_method: String,
    pub target_descriptor: String,
    pub captured_args: Vec<Value>,
    pub reference_kind: u8,
}

/// An instance of a user (or JDK) class.
///
/// Fields are created lazily on first `putfield`; reads of unset fields
/// yield the descriptor-typed zero.
#[derive(Debug, Clone)]
pub struct ClassInstance {
    pub class_name: String,
    pub fields: IndexMap<String, Value>,
    pub lambda_target: Option<LambdaTarget>,
}

impl ClassInstance {
    #[must_use]
    pub fn new(class_name: impl Into<String>) -> ClassInstance {
        ClassInstance {
            class_name: class_name.into(),
            fields: IndexMap::new(),
            lambda_target: None,
        }
    }

    /// A boxed-primitive instance: `{class_name, fields: {value}}`.
    #[must_use]
    pub fn boxed(class_name: impl Into<String>, value: Value) -> ClassInstance {
        let mut instance = ClassInstance::new(class_name);
        instance.fields.insert("value".to_owned(), value);
        instance
    }

    /// A `java/lang/Class` mirror whose `name` field is the class name.
    #[must_use]
    pub fn class_mirror(name: &str) -> ClassInstance {
        let mut instance = ClassInstance::new("java/lang/Class");
        instance
            .fields
            .insert("name".to_owned(), Value::string(name));
        instance
    }
}

/// A reference or primitive array; the element kind is enforced only by
/// the opcodes that access it.
#[derive(Debug, Clone)]
pub struct ArrayInstance {
    pub elements: Vec<Value>,
}

impl ArrayInstance {
    /// A reference array with every element null.
    #[must_use]
    pub fn new_reference(length: usize) -> ArrayInstance {
        ArrayInstance {
            elements: vec![Value::Null; length],
        }
    }

    /// An array filled with copies of the type-appropriate zero.
    #[must_use]
    pub fn new_filled(length: usize, zero: Value) -> ArrayInstance {
        ArrayInstance {
            elements: vec![zero; length],
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}
