//! Shared helpers for interpreter tests: an in-memory loader and a
//! builder for synthetic class files with hand-assembled bytecode.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use lattejvm_base::class::{
    access_flags, BootstrapMethod, ClassFile, CodeAttribute, ExceptionHandler, MethodInfo,
};
use lattejvm_base::constant_pool::{ConstantPool, ConstantPoolEntry};
use lattejvm_class_loaders::{ClassLoader, LoadClassError};

use crate::value::Value;
use crate::{eval, ExecError, Vm};

pub(crate) struct ClassFileBuilder {
    pool: Vec<ConstantPoolEntry>,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    methods: Vec<MethodInfo>,
    bootstrap_methods: Vec<BootstrapMethod>,
    access_flags: u16,
}

impl ClassFileBuilder {
    pub fn new(name: &str) -> ClassFileBuilder {
        let mut builder = ClassFileBuilder {
            pool: vec![ConstantPoolEntry::Skip],
            this_class: 0,
            super_class: 0,
            interfaces: Vec::new(),
            methods: Vec::new(),
            bootstrap_methods: Vec::new(),
            access_flags: access_flags::ACC_PUBLIC | access_flags::ACC_SUPER,
        };
        builder.this_class = builder.class(name);
        if name != "java/lang/Object" {
            builder.super_class = builder.class("java/lang/Object");
        }
        builder
    }

    pub fn interface(name: &str) -> ClassFileBuilder {
        let mut builder = ClassFileBuilder::new(name);
        builder.access_flags |= access_flags::ACC_INTERFACE;
        builder
    }

    fn push(&mut self, entry: ConstantPoolEntry) -> u16 {
        self.pool.push(entry);
        u16::try_from(self.pool.len() - 1).expect("pool index fits u16")
    }

    pub fn utf8(&mut self, text: &str) -> u16 {
        self.push(ConstantPoolEntry::Utf8(text.to_owned()))
    }

    pub fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        self.push(ConstantPoolEntry::Class { name_index })
    }

    pub fn string_const(&mut self, text: &str) -> u16 {
        let string_index = self.utf8(text);
        self.push(ConstantPoolEntry::String { string_index })
    }

    pub fn int_const(&mut self, value: i32) -> u16 {
        self.push(ConstantPoolEntry::Integer(value))
    }

    pub fn long_const(&mut self, value: i64) -> u16 {
        let index = self.push(ConstantPoolEntry::Long(value));
        self.push(ConstantPoolEntry::Skip);
        index
    }

    pub fn double_const(&mut self, value: f64) -> u16 {
        let index = self.push(ConstantPoolEntry::Double(value));
        self.push(ConstantPoolEntry::Skip);
        index
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.push(ConstantPoolEntry::NameAndType {
            name_index,
            descriptor_index,
        })
    }

    pub fn methodref(&mut self, class_name: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(class_name);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.push(ConstantPoolEntry::Methodref {
            class_index,
            name_and_type_index,
        })
    }

    pub fn interface_methodref(&mut self, class_name: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(class_name);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.push(ConstantPoolEntry::InterfaceMethodref {
            class_index,
            name_and_type_index,
        })
    }

    pub fn fieldref(&mut self, class_name: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(class_name);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.push(ConstantPoolEntry::Fieldref {
            class_index,
            name_and_type_index,
        })
    }

    pub fn method_handle(&mut self, reference_kind: u8, reference_index: u16) -> u16 {
        self.push(ConstantPoolEntry::MethodHandle {
            reference_kind,
            reference_index,
        })
    }

    pub fn invoke_dynamic(
        &mut self,
        bootstrap_method_attr_index: u16,
        name: &str,
        descriptor: &str,
    ) -> u16 {
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.push(ConstantPoolEntry::InvokeDynamic {
            bootstrap_method_attr_index,
            name_and_type_index,
        })
    }

    pub fn set_super_class(&mut self, name: &str) {
        self.super_class = self.class(name);
    }

    pub fn add_interface(&mut self, name: &str) {
        let index = self.class(name);
        self.interfaces.push(index);
    }

    pub fn add_bootstrap_method(&mut self, method_ref: u16, arguments: Vec<u16>) -> u16 {
        self.bootstrap_methods.push(BootstrapMethod {
            method_ref,
            arguments,
        });
        u16::try_from(self.bootstrap_methods.len() - 1).expect("bootstrap index fits")
    }

    pub fn add_method(
        &mut self,
        name: &str,
        descriptor: &str,
        flags: u16,
        max_stack: u16,
        max_locals: u16,
        code: Vec<u8>,
        exception_handlers: Vec<ExceptionHandler>,
    ) {
        self.methods.push(MethodInfo {
            access_flags: flags,
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            code: Some(CodeAttribute {
                max_stack,
                max_locals,
                code,
                exception_handlers,
            }),
        });
    }

    pub fn add_abstract_method(&mut self, name: &str, descriptor: &str) {
        self.methods.push(MethodInfo {
            access_flags: access_flags::ACC_PUBLIC | access_flags::ACC_ABSTRACT,
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            code: None,
        });
    }

    pub fn build(self) -> Rc<ClassFile> {
        Rc::new(ClassFile {
            minor_version: 0,
            major_version: 61,
            constant_pool: ConstantPool::new(self.pool),
            access_flags: self.access_flags,
            this_class: self.this_class,
            super_class: self.super_class,
            interfaces: self.interfaces,
            fields: Vec::new(),
            methods: self.methods,
            bootstrap_methods: self.bootstrap_methods,
        })
    }
}

/// An in-memory loader; `java/lang/Object` is always present so
/// superclass walks terminate.
pub(crate) struct MapLoader {
    classes: HashMap<String, Rc<ClassFile>>,
}

impl MapLoader {
    pub fn new() -> MapLoader {
        let mut loader = MapLoader {
            classes: HashMap::new(),
        };
        loader.insert(ClassFileBuilder::new("java/lang/Object").build());
        loader
    }

    pub fn insert(&mut self, class: Rc<ClassFile>) {
        let name = class.class_name().expect("class has a name").to_owned();
        self.classes.insert(name, class);
    }
}

impl ClassLoader for MapLoader {
    fn load_class(&mut self, name: &str) -> Result<Rc<ClassFile>, LoadClassError> {
        self.classes
            .get(name)
            .cloned()
            .ok_or_else(|| LoadClassError::NotFound(name.to_owned()))
    }
}

/// A VM over a [`MapLoader`] with output captured in memory.
pub(crate) fn capture_vm(loader: MapLoader) -> (Vm, Rc<RefCell<Vec<u8>>>) {
    let sink = Rc::new(RefCell::new(Vec::new()));
    let vm = Vm::with_stdout(Box::new(loader), sink.clone());
    (vm, sink)
}

pub(crate) fn captured_output(sink: &Rc<RefCell<Vec<u8>>>) -> String {
    String::from_utf8(sink.borrow().clone()).expect("output is UTF-8")
}

/// Runs a named method of a class already registered with the VM's loader.
pub(crate) fn run_method(
    vm: &mut Vm,
    class: &Rc<ClassFile>,
    name: &str,
    args: Vec<Value>,
) -> Result<Option<Value>, ExecError> {
    let method = class
        .methods
        .iter()
        .find(|m| m.name == name)
        .expect("method exists");
    eval::eval_method(vm, class, method, args)
}
