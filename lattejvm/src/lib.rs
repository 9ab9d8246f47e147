#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// Shadowing is nice.
#![allow(clippy::shadow_unrelated)]
// This would be nice to re-enable eventually, but not while in active dev
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// The interpreter dispatch and the native table are single large matches.
#![allow(clippy::too_many_lines)]
#![allow(clippy::match_same_arms)]
// Too error prone
#![allow(clippy::similar_names)]

use std::cell::RefCell;
use std::collections::HashSet;
use std::io::Write;
use std::rc::Rc;

use indexmap::IndexMap;

use lattejvm_base::class::{ClassFile, ExceptionHandler, MethodInfo};
use lattejvm_base::constant_pool::{ConstantPool, ConstantPoolError};
use lattejvm_base::descriptor::DescriptorError;
use lattejvm_class_loaders::{ClassLoader, LoadClassError};

use crate::class_instance::LambdaTarget;
use crate::exception::JavaThrowable;
use crate::value::Value;

pub mod class_instance;
pub mod eval;
pub mod exception;
pub mod natives;
#[cfg(test)]
pub(crate) mod test_support;
pub mod util;
pub mod value;

/// The maximum number of nested method invocations. Exceeding it raises a
/// catchable `java/lang/StackOverflowError` instead of exhausting the host
/// call stack.
pub const MAX_FRAME_DEPTH: usize = 1024;

/// An error from the VM itself (as opposed to a Java exception): unknown
/// opcodes, malformed metadata, resolution failures. These abort execution
/// and are never visible to exception handlers in Java code.
#[derive(Debug)]
pub enum VmError {
    Load(LoadClassError),
    ConstantPool(ConstantPoolError),
    Descriptor(DescriptorError),
    UnknownOpcode {
        opcode: u8,
        pc: usize,
    },
    /// An operand read ran past the end of the code array.
    UnexpectedEndOfCode {
        pc: usize,
    },
    OperandStackOverflow {
        max: usize,
    },
    OperandStackUnderflow,
    InvalidLocalIndex {
        index: usize,
        max: usize,
    },
    /// A value cell held a different kind than the opcode expected.
    ExpectedValue {
        expected: &'static str,
        got: &'static str,
    },
    MethodNotFound {
        class_name: String,
        method_name: String,
        descriptor: String,
    },
    MainMethodNotFound {
        class_name: String,
    },
    MissingCode {
        class_name: String,
        method_name: String,
    },
    AbstractMethodCall {
        class_name: String,
        method_name: String,
    },
    /// A branch target computed outside the code array.
    BranchOutOfBounds {
        pc: usize,
        target: i64,
    },
    /// `athrow` popped something that was not a throwable object.
    ExpectedThrowable {
        got: &'static str,
    },
    InvalidInvokeDynamic {
        index: u16,
        reason: &'static str,
    },
    UnsupportedBootstrapMethod(String),
    UnsupportedMultiArrayDimensions(u8),
    NativeMethodNotImplemented {
        key: String,
    },
    /// A native shim found an object without the internals it relies on.
    Native(String),
    /// A VM error surfaced while running a class initializer.
    ClassInit {
        class_name: String,
        source: Box<VmError>,
    },
}

impl From<LoadClassError> for VmError {
    fn from(err: LoadClassError) -> Self {
        VmError::Load(err)
    }
}

impl From<ConstantPoolError> for VmError {
    fn from(err: ConstantPoolError) -> Self {
        VmError::ConstantPool(err)
    }
}

impl From<DescriptorError> for VmError {
    fn from(err: DescriptorError) -> Self {
        VmError::Descriptor(err)
    }
}

/// The error type threaded through execution. The two failure categories
/// stay distinct: `Java` participates in exception-table search and is
/// catchable by Java code, `Vm` aborts the machine.
#[derive(Debug)]
pub enum ExecError {
    Java(JavaThrowable),
    Vm(VmError),
}

impl From<JavaThrowable> for ExecError {
    fn from(exc: JavaThrowable) -> Self {
        ExecError::Java(exc)
    }
}

impl From<VmError> for ExecError {
    fn from(err: VmError) -> Self {
        ExecError::Vm(err)
    }
}

impl From<LoadClassError> for ExecError {
    fn from(err: LoadClassError) -> Self {
        ExecError::Vm(VmError::Load(err))
    }
}

impl From<ConstantPoolError> for ExecError {
    fn from(err: ConstantPoolError) -> Self {
        ExecError::Vm(VmError::ConstantPool(err))
    }
}

impl From<DescriptorError> for ExecError {
    fn from(err: DescriptorError) -> Self {
        ExecError::Vm(VmError::Descriptor(err))
    }
}

/// A `(defining class, method)` pair produced by method resolution.
pub struct ResolvedMethod {
    pub class: Rc<ClassFile>,
    method_index: usize,
}

impl ResolvedMethod {
    #[must_use]
    pub fn method(&self) -> &MethodInfo {
        &self.class.methods[self.method_index]
    }
}

/// The virtual machine: loader, output sink, and the process-wide state
/// shared by every frame.
pub struct Vm {
    loader: Box<dyn ClassLoader>,
    /// The sink the intercepted print-stream natives write to.
    pub stdout: Rc<RefCell<dyn Write>>,
    frame_depth: usize,
    static_fields: IndexMap<String, IndexMap<String, Value>>,
    /// Classes whose `<clinit>` has started. Marked before running so
    /// recursive triggering cannot re-enter.
    initialized_classes: HashSet<String>,
}

impl Vm {
    #[must_use]
    pub fn new(loader: Box<dyn ClassLoader>) -> Vm {
        Vm::with_stdout(loader, Rc::new(RefCell::new(std::io::stdout())))
    }

    #[must_use]
    pub fn with_stdout(loader: Box<dyn ClassLoader>, stdout: Rc<RefCell<dyn Write>>) -> Vm {
        Vm {
            loader,
            stdout,
            frame_depth: 0,
            static_fields: IndexMap::new(),
            initialized_classes: HashSet::new(),
        }
    }

    pub fn load_class(&mut self, name: &str) -> Result<Rc<ClassFile>, ExecError> {
        Ok(self.loader.load_class(name)?)
    }

    /// Finds and executes `main:([Ljava/lang/String;)V` of the given class.
    pub fn run_main(&mut self, main_class: &str) -> Result<(), ExecError> {
        let cf = self.loader.load_class(main_class)?;
        let method_index = cf
            .methods
            .iter()
            .position(|m| m.name == "main" && m.descriptor == "([Ljava/lang/String;)V")
            .ok_or_else(|| VmError::MainMethodNotFound {
                class_name: main_class.to_owned(),
            })?;

        self.ensure_initialized(main_class)?;

        // The args array is not constructed; main receives null.
        eval::eval_method(self, &cf, &cf.methods[method_index], vec![Value::Null])?;
        Ok(())
    }

    pub(crate) fn enter_frame(&mut self) -> Result<(), ExecError> {
        self.frame_depth += 1;
        if self.frame_depth > MAX_FRAME_DEPTH {
            self.frame_depth -= 1;
            return Err(JavaThrowable::new(exception::class_names::STACK_OVERFLOW).into());
        }
        Ok(())
    }

    pub(crate) fn exit_frame(&mut self) {
        self.frame_depth = self.frame_depth.saturating_sub(1);
    }

    /// Runs `<clinit>` of a class (and its superclasses) once per process.
    ///
    /// A class that cannot be loaded is tolerated and left unmarked; this
    /// allows bootstrap classes to reference optional dependencies. A Java
    /// exception thrown by `<clinit>` propagates unchanged so handlers
    /// above can still catch it.
    pub fn ensure_initialized(&mut self, class_name: &str) -> Result<(), ExecError> {
        if self.initialized_classes.contains(class_name) {
            return Ok(());
        }
        self.initialized_classes.insert(class_name.to_owned());

        let cf = match self.loader.load_class(class_name) {
            Ok(cf) => cf,
            Err(_) => {
                self.initialized_classes.remove(class_name);
                return Ok(());
            }
        };

        if let Some(super_name) = cf.super_class_name() {
            let super_name = super_name.to_owned();
            self.ensure_initialized(&super_name)?;
        }

        if let Some(clinit) = cf.find_method("<clinit>", "()V") {
            tracing::debug!("running <clinit> of {}", class_name);
            eval::eval_method(self, &cf, clinit, Vec::new()).map_err(|err| match err {
                ExecError::Java(exc) => ExecError::Java(exc),
                ExecError::Vm(source) => ExecError::Vm(VmError::ClassInit {
                    class_name: class_name.to_owned(),
                    source: Box::new(source),
                }),
            })?;
        }
        Ok(())
    }

    #[must_use]
    pub fn get_static_field(&self, class_name: &str, field_name: &str) -> Option<Value> {
        self.static_fields
            .get(class_name)
            .and_then(|fields| fields.get(field_name))
            .cloned()
    }

    pub fn set_static_field(&mut self, class_name: &str, field_name: &str, value: Value) {
        self.static_fields
            .entry(class_name.to_owned())
            .or_default()
            .insert(field_name.to_owned(), value);
    }

    /// Resolves a method starting from `class_name`: first the superclass
    /// chain, then the same chain again searching declared interfaces
    /// recursively for a default implementation.
    pub fn resolve_method(
        &mut self,
        class_name: &str,
        method_name: &str,
        descriptor: &str,
    ) -> Result<ResolvedMethod, ExecError> {
        let mut current = class_name.to_owned();
        loop {
            let cf = self.loader.load_class(&current)?;
            if let Some(index) = cf
                .methods
                .iter()
                .position(|m| m.name == method_name && m.descriptor == descriptor)
            {
                return Ok(ResolvedMethod {
                    class: cf,
                    method_index: index,
                });
            }
            match cf.super_class_name() {
                Some(super_name) => current = super_name.to_owned(),
                None => break,
            }
        }

        let mut current = class_name.to_owned();
        loop {
            let cf = match self.loader.load_class(&current) {
                Ok(cf) => cf,
                Err(_) => break,
            };
            for interface_index in &cf.interfaces {
                let Ok(interface_name) = cf.constant_pool.get_class_name(*interface_index) else {
                    continue;
                };
                let interface_name = interface_name.to_owned();
                if let Ok(resolved) = self.resolve_method(&interface_name, method_name, descriptor)
                {
                    return Ok(resolved);
                }
            }
            match cf.super_class_name() {
                Some(super_name) => current = super_name.to_owned(),
                None => break,
            }
        }

        Err(VmError::MethodNotFound {
            class_name: class_name.to_owned(),
            method_name: method_name.to_owned(),
            descriptor: descriptor.to_owned(),
        }
        .into())
    }

    pub fn call_resolved(
        &mut self,
        resolved: &ResolvedMethod,
        args: Vec<Value>,
    ) -> Result<Option<Value>, ExecError> {
        eval::eval_method(self, &resolved.class, resolved.method(), args)
    }

    /// Dispatches to a lambda proxy's target with the captured arguments
    /// prepended.
    pub fn invoke_lambda_target(
        &mut self,
        target: &LambdaTarget,
        call_args: Vec<Value>,
    ) -> Result<Option<Value>, ExecError> {
        let resolved = self.resolve_method(
            &target.target_class,
            &target.target_method,
            &target.target_descriptor,
        )?;
        let mut full_args = Vec::with_capacity(target.captured_args.len() + call_args.len());
        full_args.extend(target.captured_args.iter().cloned());
        full_args.extend(call_args);
        self.call_resolved(&resolved, full_args)
    }

    /// The `instanceof`/`checkcast`/catch assignability relation: reflexive,
    /// walks the superclass chain, and searches interfaces recursively.
    pub fn is_instance_of(&mut self, object_class: &str, target_class: &str) -> bool {
        let mut visited = HashSet::new();
        self.is_instance_of_inner(object_class, target_class, &mut visited)
    }

    fn is_instance_of_inner(
        &mut self,
        object_class: &str,
        target_class: &str,
        visited: &mut HashSet<String>,
    ) -> bool {
        if object_class == target_class {
            return true;
        }
        if !visited.insert(object_class.to_owned()) {
            return false;
        }

        let mut current = object_class.to_owned();
        loop {
            let Ok(cf) = self.loader.load_class(&current) else {
                return false;
            };
            for interface_index in &cf.interfaces {
                let Ok(interface_name) = cf.constant_pool.get_class_name(*interface_index) else {
                    continue;
                };
                let interface_name = interface_name.to_owned();
                if interface_name == target_class
                    || self.is_instance_of_inner(&interface_name, target_class, visited)
                {
                    return true;
                }
            }
            match cf.super_class_name() {
                Some(super_name) if super_name == target_class => return true,
                Some(super_name) => current = super_name.to_owned(),
                None => return false,
            }
        }
    }

    /// Assignability of a runtime value to a named class, covering the
    /// host-represented receiver kinds.
    pub fn value_is_instance_of(&mut self, value: &Value, target_class: &str) -> bool {
        use crate::value::Reference;
        match value {
            Value::Ref(Reference::Object(obj)) => {
                let class_name = obj.borrow().class_name.clone();
                self.is_instance_of(&class_name, target_class)
            }
            Value::Ref(Reference::String(_)) => {
                target_class == "java/lang/String"
                    || self.is_instance_of("java/lang/String", target_class)
            }
            // Arrays are assignable to Object and to any array class; the
            // component relation is not modelled.
            Value::Ref(Reference::Array(_)) => {
                target_class == "java/lang/Object" || target_class.starts_with('[')
            }
            Value::Ref(Reference::PrintStream) => {
                target_class == "java/io/PrintStream"
                    || self.is_instance_of("java/io/PrintStream", target_class)
            }
            _ => false,
        }
    }

    /// Searches a method's exception table for the first handler covering
    /// `pc` whose catch type matches the thrown class. Entry order wins.
    pub fn find_exception_handler(
        &mut self,
        handlers: &[ExceptionHandler],
        pc: usize,
        exc: &JavaThrowable,
        pool: &ConstantPool,
    ) -> Option<ExceptionHandler> {
        let exc_class = exc.class_name();
        for handler in handlers {
            if pc < usize::from(handler.start_pc) || pc >= usize::from(handler.end_pc) {
                continue;
            }
            if handler.catch_type == 0 {
                return Some(handler.clone());
            }
            let Ok(catch_class) = pool.get_class_name(handler.catch_type) else {
                continue;
            };
            let catch_class = catch_class.to_owned();
            if self.is_instance_of(&exc_class, &catch_class) {
                return Some(handler.clone());
            }
        }
        None
    }
}
