//! The in-memory model of a decoded class file.

use crate::constant_pool::{ConstantPool, ConstantPoolError};

/// Access flags used by the loader and interpreter.
/// The format defines more; these are the ones consulted at runtime.
pub mod access_flags {
    pub const ACC_PUBLIC: u16 = 0x0001;
    pub const ACC_STATIC: u16 = 0x0008;
    pub const ACC_FINAL: u16 = 0x0010;
    pub const ACC_SUPER: u16 = 0x0020;
    pub const ACC_NATIVE: u16 = 0x0100;
    pub const ACC_INTERFACE: u16 = 0x0200;
    pub const ACC_ABSTRACT: u16 = 0x0400;
}

/// One entry of a method's exception table.
/// The covered range is `[start_pc, end_pc)`; `catch_type` of 0 is a
/// catch-all used for `finally` blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_handlers: Vec<ExceptionHandler>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodInfo {
    pub access_flags: u16,
    pub name: String,
    pub descriptor: String,
    pub code: Option<CodeAttribute>,
}

impl MethodInfo {
    #[must_use]
    pub fn is_native(&self) -> bool {
        self.access_flags & access_flags::ACC_NATIVE != 0
    }

    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.access_flags & access_flags::ACC_ABSTRACT != 0
    }

    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access_flags & access_flags::ACC_STATIC != 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub access_flags: u16,
    pub name: String,
    pub descriptor: String,
}

/// A bootstrap method referenced by `invokedynamic` call sites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapMethod {
    /// Constant pool index of a `MethodHandle` entry.
    pub method_ref: u16,
    /// Constant pool indices of the static bootstrap arguments.
    pub arguments: Vec<u16>,
}

/// A parsed `.class` file.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    /// 0 iff this class is `java/lang/Object`.
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub bootstrap_methods: Vec<BootstrapMethod>,
}

impl ClassFile {
    /// The fully qualified (slash-separated) name of this class.
    pub fn class_name(&self) -> Result<&str, ConstantPoolError> {
        self.constant_pool.get_class_name(self.this_class)
    }

    /// The name of the superclass, or `None` for the root class.
    #[must_use]
    pub fn super_class_name(&self) -> Option<&str> {
        if self.super_class == 0 {
            return None;
        }
        self.constant_pool.get_class_name(self.super_class).ok()
    }

    /// Finds a declared method by name and descriptor.
    #[must_use]
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<&MethodInfo> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    /// Finds the first declared method with the given name.
    #[must_use]
    pub fn find_method_by_name(&self, name: &str) -> Option<&MethodInfo> {
        self.methods.iter().find(|m| m.name == name)
    }
}
