//! The five invocation forms and their argument marshaling.

use lattejvm_base::constant_pool::ConstantPoolEntry;
use lattejvm_base::descriptor::{is_void_return, MethodDescriptor};

use crate::class_instance::{ArrayInstance, ClassInstance, LambdaTarget};
use crate::eval::Frame;
use crate::exception::{class_names, JavaThrowable};
use crate::natives;
use crate::value::{Reference, Value};
use crate::{ExecError, Vm, VmError};

/// Pops exactly as many values as the descriptor declares, in reverse.
fn pop_args(frame: &mut Frame<'_>, descriptor: &str) -> Result<Vec<Value>, ExecError> {
    let desc = MethodDescriptor::parse(descriptor)?;
    let count = desc.param_count();
    let mut args = vec![Value::Null; count];
    for slot in args.iter_mut().rev() {
        *slot = frame.pop()?;
    }
    Ok(args)
}

/// Pushes a call's result when the descriptor declares one.
fn push_return(
    frame: &mut Frame<'_>,
    descriptor: &str,
    result: Option<Value>,
) -> Result<(), ExecError> {
    if !is_void_return(descriptor) {
        frame.push(result.unwrap_or(Value::Null))?;
    }
    Ok(())
}

fn null_pointer() -> ExecError {
    JavaThrowable::new(class_names::NULL_POINTER).into()
}

pub(crate) fn invoke_virtual(vm: &mut Vm, frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let index = frame.read_u16()?;
    let mref = frame.class.constant_pool.resolve_methodref(index)?;

    let args = pop_args(frame, &mref.descriptor)?;
    let receiver = frame.pop()?;

    // The sentinel System.out stream is handled before any resolution.
    if let Some(Reference::PrintStream) = receiver.as_reference()? {
        natives::print_stream::handle(vm, &mref.method_name, &mref.descriptor, &args)?;
        return Ok(());
    }

    // Array clone is the only virtual call arrays receive.
    if let Some(Reference::Array(array)) = receiver.as_reference()? {
        if mref.method_name == "clone" {
            let copy = ArrayInstance {
                elements: array.borrow().elements.clone(),
            };
            frame.push(Value::array(copy))?;
            return Ok(());
        }
    }

    // Host strings have no class file to resolve against.
    if let Some(Reference::String(text)) = receiver.as_reference()? {
        let text = std::rc::Rc::clone(text);
        let result = natives::string::handle_method(&text, &mref.method_name, &mref.descriptor, &args)?;
        return push_return(frame, &mref.descriptor, result);
    }

    if receiver.is_null() {
        return Err(null_pointer());
    }

    let Some(Reference::Object(object)) = receiver.as_reference()? else {
        return Err(VmError::ExpectedValue {
            expected: "object",
            got: receiver.kind_name(),
        }
        .into());
    };
    let object = std::rc::Rc::clone(object);
    let class_name = object.borrow().class_name.clone();

    if class_name == "java/lang/StringBuilder" {
        let result = natives::string_builder::handle(
            &receiver,
            &object,
            &mref.method_name,
            &mref.descriptor,
            &args,
        )?;
        return push_return(frame, &mref.descriptor, result);
    }

    if class_name == "java/util/ArrayList" && mref.method_name == "sort" {
        natives::sort::array_list_sort(vm, &object, &args)?;
        return Ok(());
    }

    if let Some(result) =
        natives::boxed::try_handle(&object, &mref.method_name, &mref.descriptor, &args)?
    {
        return push_return(frame, &mref.descriptor, result);
    }

    // A lambda proxy diverts its interface method to the recorded target.
    let lambda = object.borrow().lambda_target.clone();
    if let Some(target) = lambda {
        if target.method_name == mref.method_name {
            let result = vm.invoke_lambda_target(&target, args)?;
            return push_return(frame, &mref.descriptor, result);
        }
    }

    // Dispatch target comes from the receiver's runtime class, not the
    // pool's.
    let resolved = vm.resolve_method(&class_name, &mref.method_name, &mref.descriptor)?;
    let mut full_args = Vec::with_capacity(args.len() + 1);
    full_args.push(receiver);
    full_args.extend(args);
    let result = vm.call_resolved(&resolved, full_args)?;
    push_return(frame, &mref.descriptor, result)
}

pub(crate) fn invoke_special(vm: &mut Vm, frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let index = frame.read_u16()?;
    let mref = frame.class.constant_pool.resolve_methodref(index)?;

    let args = pop_args(frame, &mref.descriptor)?;
    let receiver = frame.pop()?;

    // Object.<init> does nothing worth interpreting.
    if mref.class_name == "java/lang/Object" && mref.method_name == "<init>" {
        return Ok(());
    }

    if mref.class_name == "java/lang/StringBuilder" {
        if let Some(Reference::Object(object)) = receiver.as_reference()? {
            let object = std::rc::Rc::clone(object);
            natives::string_builder::handle(
                &receiver,
                &object,
                &mref.method_name,
                &mref.descriptor,
                &args,
            )?;
            return Ok(());
        }
    }

    // No virtual override: resolution starts at the pool's class.
    let resolved = vm.resolve_method(&mref.class_name, &mref.method_name, &mref.descriptor)?;
    let mut full_args = Vec::with_capacity(args.len() + 1);
    full_args.push(receiver);
    full_args.extend(args);
    let result = vm.call_resolved(&resolved, full_args)?;
    push_return(frame, &mref.descriptor, result)
}

pub(crate) fn invoke_static(vm: &mut Vm, frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let index = frame.read_u16()?;
    // Interface statics carry an InterfaceMethodref.
    let mref = frame.class.constant_pool.resolve_any_methodref(index)?;

    vm.ensure_initialized(&mref.class_name)?;

    let args = pop_args(frame, &mref.descriptor)?;

    if mref.class_name == "java/security/AccessController" && mref.method_name == "doPrivileged" {
        return do_privileged(vm, frame, &mref.descriptor, args);
    }

    if mref.class_name == "java/util/Collections" && mref.method_name == "sort" {
        return natives::sort::collections_sort(vm, &mref.descriptor, &args);
    }

    if mref.class_name == "java/lang/Integer" && mref.method_name == "compare" {
        let b = args[1].as_int()?;
        let a = args[0].as_int()?;
        frame.push(Value::Int(match a.cmp(&b) {
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => 1,
        }))?;
        return Ok(());
    }

    // Boxing goes through a synthesized {value} object instead of the
    // JDK's valueOf caches.
    if let Some(boxed) = natives::boxed::try_value_of(&mref.class_name, &mref.descriptor, &args)? {
        frame.push(boxed)?;
        return Ok(());
    }

    if mref.class_name == "java/lang/String" && mref.method_name == "valueOf" {
        let result = natives::string::handle_value_of(&mref.descriptor, &args)?;
        frame.push(result)?;
        return Ok(());
    }

    let resolved = vm.resolve_method(&mref.class_name, &mref.method_name, &mref.descriptor)?;
    let result = vm.call_resolved(&resolved, args)?;
    push_return(frame, &mref.descriptor, result)
}

/// `AccessController.doPrivileged` just runs the action; there is no
/// security manager to consult.
fn do_privileged(
    vm: &mut Vm,
    frame: &mut Frame<'_>,
    descriptor: &str,
    args: Vec<Value>,
) -> Result<(), ExecError> {
    let action = args
        .into_iter()
        .next()
        .ok_or_else(|| VmError::Native("doPrivileged called without an action".to_owned()))?;
    if action.is_null() {
        return Err(null_pointer());
    }

    if let Some(Reference::Object(object)) = action.as_reference()? {
        let object = std::rc::Rc::clone(object);
        let lambda = object.borrow().lambda_target.clone();
        if let Some(target) = lambda {
            let result = vm.invoke_lambda_target(&target, Vec::new())?;
            return push_return(frame, descriptor, result);
        }

        let class_name = object.borrow().class_name.clone();
        let resolved = vm.resolve_method(&class_name, "run", "()Ljava/lang/Object;")?;
        let result = vm.call_resolved(&resolved, vec![action])?;
        return push_return(frame, descriptor, result);
    }

    push_return(frame, descriptor, None)
}

pub(crate) fn invoke_interface(vm: &mut Vm, frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let index = frame.read_u16()?;
    let _count = frame.read_u8()?;
    let _reserved = frame.read_u8()?;
    let mref = frame.class.constant_pool.resolve_interface_methodref(index)?;

    let args = pop_args(frame, &mref.descriptor)?;
    let receiver = frame.pop()?;

    if receiver.is_null() {
        return Err(null_pointer());
    }

    // CharSequence and friends on a host string.
    if let Some(Reference::String(text)) = receiver.as_reference()? {
        let text = std::rc::Rc::clone(text);
        let result = natives::string::handle_method(&text, &mref.method_name, &mref.descriptor, &args)?;
        return push_return(frame, &mref.descriptor, result);
    }

    let Some(Reference::Object(object)) = receiver.as_reference()? else {
        return Err(VmError::ExpectedValue {
            expected: "object",
            got: receiver.kind_name(),
        }
        .into());
    };
    let object = std::rc::Rc::clone(object);

    let lambda = object.borrow().lambda_target.clone();
    if let Some(target) = lambda {
        if target.method_name == mref.method_name {
            let result = vm.invoke_lambda_target(&target, args)?;
            return push_return(frame, &mref.descriptor, result);
        }
    }

    let class_name = object.borrow().class_name.clone();
    let resolved = vm.resolve_method(&class_name, &mref.method_name, &mref.descriptor)?;
    let mut full_args = Vec::with_capacity(args.len() + 1);
    full_args.push(receiver);
    full_args.extend(args);
    let result = vm.call_resolved(&resolved, full_args)?;
    push_return(frame, &mref.descriptor, result)
}

pub(crate) fn invoke_dynamic(frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let index = frame.read_u16()?;
    let _reserved = frame.read_u16()?;

    let pool = &frame.class.constant_pool;
    let ConstantPoolEntry::InvokeDynamic {
        bootstrap_method_attr_index,
        name_and_type_index,
    } = *pool.get(index)?
    else {
        return Err(VmError::InvalidInvokeDynamic {
            index,
            reason: "entry is not InvokeDynamic",
        }
        .into());
    };

    let (call_site_name, call_site_desc) = pool.get_name_and_type(name_and_type_index)?;
    let call_site_name = call_site_name.to_owned();
    let call_site_desc = call_site_desc.to_owned();

    let bsm = frame
        .class
        .bootstrap_methods
        .get(usize::from(bootstrap_method_attr_index))
        .ok_or(VmError::InvalidInvokeDynamic {
            index,
            reason: "bootstrap method index out of range",
        })?
        .clone();

    let ConstantPoolEntry::MethodHandle {
        reference_kind,
        reference_index,
    } = *pool.get(bsm.method_ref)?
    else {
        return Err(VmError::InvalidInvokeDynamic {
            index,
            reason: "bootstrap method is not a MethodHandle",
        }
        .into());
    };
    // REF_invokeStatic, the only kind bootstrap methods use.
    if reference_kind != 6 {
        return Err(VmError::InvalidInvokeDynamic {
            index,
            reason: "bootstrap handle is not REF_invokeStatic",
        }
        .into());
    }
    let bsm_ref = pool.resolve_any_methodref(reference_index)?;

    let key = format!("{}.{}", bsm_ref.class_name, bsm_ref.method_name);
    match key.as_str() {
        "java/lang/invoke/LambdaMetafactory.metafactory" => {
            lambda_metafactory(frame, &bsm, &call_site_name, &call_site_desc)
        }
        "java/lang/invoke/StringConcatFactory.makeConcatWithConstants" => {
            string_concat(frame, &bsm, &call_site_desc)
        }
        _ => Err(VmError::UnsupportedBootstrapMethod(key).into()),
    }
}

/// Synthesizes a lambda proxy: a heap object named after the functional
/// interface, with a target record instead of a generated class.
fn lambda_metafactory(
    frame: &mut Frame<'_>,
    bsm: &lattejvm_base::class::BootstrapMethod,
    call_site_name: &str,
    call_site_desc: &str,
) -> Result<(), ExecError> {
    let pool = &frame.class.constant_pool;
    if bsm.arguments.len() < 3 {
        return Err(VmError::InvalidInvokeDynamic {
            index: bsm.method_ref,
            reason: "metafactory expects three static arguments",
        }
        .into());
    }

    // The second static argument is the handle to the implementation.
    let ConstantPoolEntry::MethodHandle {
        reference_kind,
        reference_index,
    } = *pool.get(bsm.arguments[1])?
    else {
        return Err(VmError::InvalidInvokeDynamic {
            index: bsm.arguments[1],
            reason: "metafactory implementation is not a MethodHandle",
        }
        .into());
    };
    // invokevirtual / invokestatic / invokespecial implementations.
    if !matches!(reference_kind, 5..=7) {
        return Err(VmError::InvalidInvokeDynamic {
            index: bsm.arguments[1],
            reason: "unsupported implementation handle kind",
        }
        .into());
    }
    let impl_ref = pool.resolve_any_methodref(reference_index)?;

    // The functional interface is the call-site descriptor's return type.
    let interface_name = call_site_desc
        .find(")L")
        .map(|at| call_site_desc[at + 2..].trim_end_matches(';').to_owned())
        .unwrap_or_default();

    let captured_args = pop_args(frame, call_site_desc)?;

    let mut instance = ClassInstance::new(interface_name.clone());
    instance.lambda_target = Some(LambdaTarget {
        interface_name,
        method_name: call_site_name.to_owned(),
        target_class: impl_ref.class_name,
        target_method: impl_ref.method_name,
        target_descriptor: impl_ref.descriptor,
        captured_args,
        reference_kind,
    });
    frame.push(Value::object(instance))?;
    Ok(())
}

/// Builds the concatenation described by the recipe string: `\x01` marks
/// an argument hole, `\x02` a constant hole, anything else is verbatim.
fn string_concat(
    frame: &mut Frame<'_>,
    bsm: &lattejvm_base::class::BootstrapMethod,
    call_site_desc: &str,
) -> Result<(), ExecError> {
    let pool = &frame.class.constant_pool;

    let recipe = match bsm.arguments.first() {
        Some(&index) => match pool.get(index)? {
            ConstantPoolEntry::String { string_index } => {
                pool.get_utf8(*string_index)?.to_owned()
            }
            _ => String::new(),
        },
        None => String::new(),
    };

    let mut constants = Vec::new();
    for &index in bsm.arguments.iter().skip(1) {
        let text = match pool.get(index)? {
            ConstantPoolEntry::String { string_index } => pool.get_utf8(*string_index)?.to_owned(),
            ConstantPoolEntry::Integer(v) => v.to_string(),
            _ => String::new(),
        };
        constants.push(text);
    }

    let args = pop_args(frame, call_site_desc)?;

    let mut result = String::with_capacity(recipe.len());
    let mut arg_index = 0;
    let mut const_index = 0;
    for ch in recipe.chars() {
        match ch {
            '\u{1}' => {
                if let Some(arg) = args.get(arg_index) {
                    result.push_str(&crate::util::value_to_string(arg));
                    arg_index += 1;
                }
            }
            '\u{2}' => {
                if let Some(text) = constants.get(const_index) {
                    result.push_str(text);
                    const_index += 1;
                }
            }
            other => result.push(other),
        }
    }

    frame.push(Value::string(result))?;
    Ok(())
}
