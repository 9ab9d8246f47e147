//! The constant pool: a 1-indexed table of tagged constants referenced by
//! opcodes and by the rest of the class file.

/// Constant pool tags as assigned by the class-file format.
pub mod tags {
    pub const UTF8: u8 = 1;
    pub const INTEGER: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const LONG: u8 = 5;
    pub const DOUBLE: u8 = 6;
    pub const CLASS: u8 = 7;
    pub const STRING: u8 = 8;
    pub const FIELDREF: u8 = 9;
    pub const METHODREF: u8 = 10;
    pub const INTERFACE_METHODREF: u8 = 11;
    pub const NAME_AND_TYPE: u8 = 12;
    pub const METHOD_HANDLE: u8 = 15;
    pub const METHOD_TYPE: u8 = 16;
    pub const DYNAMIC: u8 = 17;
    pub const INVOKE_DYNAMIC: u8 = 18;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstantPoolEntry {
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class {
        name_index: u16,
    },
    String {
        string_index: u16,
    },
    Fieldref {
        class_index: u16,
        name_and_type_index: u16,
    },
    Methodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    InterfaceMethodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    NameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    MethodHandle {
        reference_kind: u8,
        reference_index: u16,
    },
    MethodType {
        descriptor_index: u16,
    },
    InvokeDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    /// Occupies index 0, the upper slot of a long/double entry, and any
    /// entry kind that is decoded only for its size (`Dynamic`).
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstantPoolError {
    /// The index was zero, out of bounds, or pointed at a skip slot.
    InvalidIndex(u16),
    /// The entry at the index was not of the expected kind.
    UnexpectedKind {
        index: u16,
        expected: &'static str,
    },
}

/// A resolved field reference: `(class, name, descriptor)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub class_name: String,
    pub field_name: String,
    pub descriptor: String,
}

/// A resolved method reference: `(class, name, descriptor)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRef {
    pub class_name: String,
    pub method_name: String,
    pub descriptor: String,
}

/// The constant pool of a single class file.
///
/// Indexing is 1-based, matching the binary format; slot 0 holds [`ConstantPoolEntry::Skip`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantPool {
    entries: Vec<ConstantPoolEntry>,
}

impl ConstantPool {
    #[must_use]
    pub fn new(entries: Vec<ConstantPoolEntry>) -> ConstantPool {
        ConstantPool { entries }
    }

    /// The number of slots, including the unused slot 0.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, index: u16) -> Result<&ConstantPoolEntry, ConstantPoolError> {
        match self.entries.get(usize::from(index)) {
            None | Some(ConstantPoolEntry::Skip) => Err(ConstantPoolError::InvalidIndex(index)),
            Some(entry) => Ok(entry),
        }
    }

    pub fn get_utf8(&self, index: u16) -> Result<&str, ConstantPoolError> {
        match self.get(index)? {
            ConstantPoolEntry::Utf8(text) => Ok(text),
            _ => Err(ConstantPoolError::UnexpectedKind {
                index,
                expected: "Utf8",
            }),
        }
    }

    /// The class name referenced by a `Class` entry.
    pub fn get_class_name(&self, index: u16) -> Result<&str, ConstantPoolError> {
        match self.get(index)? {
            ConstantPoolEntry::Class { name_index } => self.get_utf8(*name_index),
            _ => Err(ConstantPoolError::UnexpectedKind {
                index,
                expected: "Class",
            }),
        }
    }

    pub fn get_name_and_type(&self, index: u16) -> Result<(&str, &str), ConstantPoolError> {
        match self.get(index)? {
            ConstantPoolEntry::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.get_utf8(*name_index)?, self.get_utf8(*descriptor_index)?)),
            _ => Err(ConstantPoolError::UnexpectedKind {
                index,
                expected: "NameAndType",
            }),
        }
    }

    pub fn resolve_fieldref(&self, index: u16) -> Result<FieldRef, ConstantPoolError> {
        match self.get(index)? {
            ConstantPoolEntry::Fieldref {
                class_index,
                name_and_type_index,
            } => {
                let class_name = self.get_class_name(*class_index)?;
                let (field_name, descriptor) = self.get_name_and_type(*name_and_type_index)?;
                Ok(FieldRef {
                    class_name: class_name.to_owned(),
                    field_name: field_name.to_owned(),
                    descriptor: descriptor.to_owned(),
                })
            }
            _ => Err(ConstantPoolError::UnexpectedKind {
                index,
                expected: "Fieldref",
            }),
        }
    }

    pub fn resolve_methodref(&self, index: u16) -> Result<MethodRef, ConstantPoolError> {
        match self.get(index)? {
            ConstantPoolEntry::Methodref {
                class_index,
                name_and_type_index,
            } => self.make_method_ref(index, *class_index, *name_and_type_index),
            _ => Err(ConstantPoolError::UnexpectedKind {
                index,
                expected: "Methodref",
            }),
        }
    }

    pub fn resolve_interface_methodref(&self, index: u16) -> Result<MethodRef, ConstantPoolError> {
        match self.get(index)? {
            ConstantPoolEntry::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => self.make_method_ref(index, *class_index, *name_and_type_index),
            _ => Err(ConstantPoolError::UnexpectedKind {
                index,
                expected: "InterfaceMethodref",
            }),
        }
    }

    /// Resolves either a `Methodref` or an `InterfaceMethodref`.
    /// `invokestatic` on interface statics carries the latter.
    pub fn resolve_any_methodref(&self, index: u16) -> Result<MethodRef, ConstantPoolError> {
        match self.get(index)? {
            ConstantPoolEntry::Methodref {
                class_index,
                name_and_type_index,
            }
            | ConstantPoolEntry::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => self.make_method_ref(index, *class_index, *name_and_type_index),
            _ => Err(ConstantPoolError::UnexpectedKind {
                index,
                expected: "Methodref or InterfaceMethodref",
            }),
        }
    }

    fn make_method_ref(
        &self,
        _index: u16,
        class_index: u16,
        name_and_type_index: u16,
    ) -> Result<MethodRef, ConstantPoolError> {
        let class_name = self.get_class_name(class_index)?;
        let (method_name, descriptor) = self.get_name_and_type(name_and_type_index)?;
        Ok(MethodRef {
            class_name: class_name.to_owned(),
            method_name: method_name.to_owned(),
            descriptor: descriptor.to_owned(),
        })
    }
}
