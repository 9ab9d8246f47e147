//! Constant pushes, local-variable traffic, operand-stack manipulation,
//! array element access, and field access.

use lattejvm_base::constant_pool::ConstantPoolEntry;
use lattejvm_base::descriptor::FieldKind;

use crate::class_instance::ClassInstance;
use crate::eval::Frame;
use crate::exception::{class_names, JavaThrowable};
use crate::value::{Reference, Value};
use crate::{ExecError, Vm, VmError};

/// `ldc`/`ldc_w`/`ldc2_w`: pushes a value built from the referenced pool
/// entry. Class entries push a synthesized `Class` mirror.
pub(crate) fn push_constant(frame: &mut Frame<'_>, index: u16) -> Result<(), ExecError> {
    let value = match frame.class.constant_pool.get(index)? {
        ConstantPoolEntry::Integer(v) => Value::Int(*v),
        ConstantPoolEntry::Float(v) => Value::Float(*v),
        ConstantPoolEntry::Long(v) => Value::Long(*v),
        ConstantPoolEntry::Double(v) => Value::Double(*v),
        ConstantPoolEntry::String { string_index } => {
            let text = frame.class.constant_pool.get_utf8(*string_index)?;
            Value::string(text)
        }
        ConstantPoolEntry::Class { name_index } => {
            let name = frame.class.constant_pool.get_utf8(*name_index)?;
            Value::object(ClassInstance::class_mirror(name))
        }
        _ => {
            return Err(VmError::ConstantPool(
                lattejvm_base::constant_pool::ConstantPoolError::UnexpectedKind {
                    index,
                    expected: "loadable constant",
                },
            )
            .into())
        }
    };
    frame.push(value)?;
    Ok(())
}

fn local_index(frame: &mut Frame<'_>, index: Option<usize>) -> Result<usize, VmError> {
    match index {
        Some(index) => Ok(index),
        None => Ok(usize::from(frame.read_u8()?)),
    }
}

pub(crate) fn load_int(frame: &mut Frame<'_>, index: Option<usize>) -> Result<(), ExecError> {
    let index = local_index(frame, index)?;
    let value = frame.local(index)?;
    value.as_int()?;
    frame.push(value)?;
    Ok(())
}

pub(crate) fn load_long(frame: &mut Frame<'_>, index: Option<usize>) -> Result<(), ExecError> {
    let index = local_index(frame, index)?;
    let value = frame.local(index)?;
    value.as_long()?;
    frame.push(value)?;
    Ok(())
}

pub(crate) fn load_float(frame: &mut Frame<'_>, index: Option<usize>) -> Result<(), ExecError> {
    let index = local_index(frame, index)?;
    let value = frame.local(index)?;
    value.as_float()?;
    frame.push(value)?;
    Ok(())
}

pub(crate) fn load_double(frame: &mut Frame<'_>, index: Option<usize>) -> Result<(), ExecError> {
    let index = local_index(frame, index)?;
    let value = frame.local(index)?;
    value.as_double()?;
    frame.push(value)?;
    Ok(())
}

pub(crate) fn load_reference(frame: &mut Frame<'_>, index: Option<usize>) -> Result<(), ExecError> {
    let index = local_index(frame, index)?;
    let value = frame.local(index)?;
    if !value.is_reference() {
        return Err(VmError::ExpectedValue {
            expected: "reference",
            got: value.kind_name(),
        }
        .into());
    }
    frame.push(value)?;
    Ok(())
}

pub(crate) fn store_int(frame: &mut Frame<'_>, index: Option<usize>) -> Result<(), ExecError> {
    let index = local_index(frame, index)?;
    let value = frame.pop()?;
    value.as_int()?;
    frame.set_local(index, value)?;
    Ok(())
}

pub(crate) fn store_long(frame: &mut Frame<'_>, index: Option<usize>) -> Result<(), ExecError> {
    let index = local_index(frame, index)?;
    let value = frame.pop()?;
    value.as_long()?;
    frame.set_local(index, value)?;
    Ok(())
}

pub(crate) fn store_float(frame: &mut Frame<'_>, index: Option<usize>) -> Result<(), ExecError> {
    let index = local_index(frame, index)?;
    let value = frame.pop()?;
    value.as_float()?;
    frame.set_local(index, value)?;
    Ok(())
}

pub(crate) fn store_double(frame: &mut Frame<'_>, index: Option<usize>) -> Result<(), ExecError> {
    let index = local_index(frame, index)?;
    let value = frame.pop()?;
    value.as_double()?;
    frame.set_local(index, value)?;
    Ok(())
}

pub(crate) fn store_reference(
    frame: &mut Frame<'_>,
    index: Option<usize>,
) -> Result<(), ExecError> {
    let index = local_index(frame, index)?;
    let value = frame.pop()?;
    if !value.is_reference() {
        return Err(VmError::ExpectedValue {
            expected: "reference",
            got: value.kind_name(),
        }
        .into());
    }
    frame.set_local(index, value)?;
    Ok(())
}

fn is_category_2(value: &Value) -> bool {
    matches!(value, Value::Long(_) | Value::Double(_))
}

/// `pop2` discards one long/double (a single slot here) or two
/// category-1 values.
pub(crate) fn pop2(frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let top = frame.pop()?;
    if !is_category_2(&top) {
        frame.pop()?;
    }
    Ok(())
}

pub(crate) fn dup(frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let top = frame.peek()?.clone();
    frame.push(top)?;
    Ok(())
}

pub(crate) fn dup_x1(frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let v1 = frame.pop()?;
    let v2 = frame.pop()?;
    frame.push(v1.clone())?;
    frame.push(v2)?;
    frame.push(v1)?;
    Ok(())
}

pub(crate) fn dup_x2(frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let v1 = frame.pop()?;
    let v2 = frame.pop()?;
    if is_category_2(&v2) {
        // value2 is a single-slot long/double: behaves as dup_x1.
        frame.push(v1.clone())?;
        frame.push(v2)?;
        frame.push(v1)?;
    } else {
        let v3 = frame.pop()?;
        frame.push(v1.clone())?;
        frame.push(v3)?;
        frame.push(v2)?;
        frame.push(v1)?;
    }
    Ok(())
}

/// `dup2` duplicates one long/double or the top two category-1 values.
pub(crate) fn dup2(frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let v1 = frame.pop()?;
    if is_category_2(&v1) {
        frame.push(v1.clone())?;
        frame.push(v1)?;
    } else {
        let v2 = frame.pop()?;
        frame.push(v2.clone())?;
        frame.push(v1.clone())?;
        frame.push(v2)?;
        frame.push(v1)?;
    }
    Ok(())
}

pub(crate) fn dup2_x1(frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let v1 = frame.pop()?;
    if is_category_2(&v1) {
        let v2 = frame.pop()?;
        frame.push(v1.clone())?;
        frame.push(v2)?;
        frame.push(v1)?;
    } else {
        let v2 = frame.pop()?;
        let v3 = frame.pop()?;
        frame.push(v2.clone())?;
        frame.push(v1.clone())?;
        frame.push(v3)?;
        frame.push(v2)?;
        frame.push(v1)?;
    }
    Ok(())
}

pub(crate) fn swap(frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let v1 = frame.pop()?;
    let v2 = frame.pop()?;
    frame.push(v1)?;
    frame.push(v2)?;
    Ok(())
}

fn null_pointer() -> ExecError {
    JavaThrowable::new(class_names::NULL_POINTER).into()
}

fn pop_array(
    frame: &mut Frame<'_>,
) -> Result<std::rc::Rc<std::cell::RefCell<crate::class_instance::ArrayInstance>>, ExecError> {
    let value = frame.pop()?;
    let kind = value.kind_name();
    match value.into_reference()? {
        None => Err(null_pointer()),
        Some(Reference::Array(arr)) => Ok(arr),
        Some(_) => Err(VmError::ExpectedValue {
            expected: "array",
            got: kind,
        }
        .into()),
    }
}

/// Shared by every `*aload` opcode: the element kind is enforced by the
/// bytecode, not re-checked here.
pub(crate) fn array_load(frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let index = frame.pop()?.as_int()?;
    let array = pop_array(frame)?;
    let array = array.borrow();
    let element = usize::try_from(index)
        .ok()
        .and_then(|i| array.elements.get(i))
        .ok_or_else(|| {
            ExecError::Java(JavaThrowable::with_message(
                class_names::ARRAY_INDEX_OUT_OF_BOUNDS,
                &format!("Index {} out of bounds for length {}", index, array.len()),
            ))
        })?;
    let element = element.clone();
    drop(array);
    frame.push(element)?;
    Ok(())
}

pub(crate) fn array_store(frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let value = frame.pop()?;
    let index = frame.pop()?.as_int()?;
    let array = pop_array(frame)?;
    let mut array = array.borrow_mut();
    let length = array.len();
    let slot = usize::try_from(index)
        .ok()
        .and_then(|i| array.elements.get_mut(i))
        .ok_or_else(|| {
            ExecError::Java(JavaThrowable::with_message(
                class_names::ARRAY_INDEX_OUT_OF_BOUNDS,
                &format!("Index {index} out of bounds for length {length}"),
            ))
        })?;
    *slot = value;
    Ok(())
}

pub(crate) fn array_length(frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let array = pop_array(frame)?;
    let length = array.borrow().len();
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    frame.push(Value::Int(length as i32))?;
    Ok(())
}

pub(crate) fn getstatic(vm: &mut Vm, frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let index = frame.read_u16()?;
    let fref = frame.class.constant_pool.resolve_fieldref(index)?;

    vm.ensure_initialized(&fref.class_name)?;

    // System.out resolves to the sentinel print stream bound to the VM's
    // output sink.
    if fref.class_name == "java/lang/System" && fref.field_name == "out" {
        frame.push(Value::Ref(Reference::PrintStream))?;
        return Ok(());
    }

    let value = vm
        .get_static_field(&fref.class_name, &fref.field_name)
        .unwrap_or_else(|| Value::default_for_kind(FieldKind::from_descriptor(&fref.descriptor)));
    frame.push(value)?;
    Ok(())
}

pub(crate) fn putstatic(vm: &mut Vm, frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let index = frame.read_u16()?;
    let fref = frame.class.constant_pool.resolve_fieldref(index)?;

    vm.ensure_initialized(&fref.class_name)?;

    let value = frame.pop()?;
    vm.set_static_field(&fref.class_name, &fref.field_name, value);
    Ok(())
}

pub(crate) fn getfield(frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let index = frame.read_u16()?;
    let fref = frame.class.constant_pool.resolve_fieldref(index)?;

    let object = frame.pop()?;
    let Some(reference) = object.as_reference()? else {
        return Err(null_pointer());
    };
    let Some(instance) = reference.as_object() else {
        return Err(VmError::ExpectedValue {
            expected: "object",
            got: object.kind_name(),
        }
        .into());
    };

    let value = instance
        .borrow()
        .fields
        .get(&fref.field_name)
        .cloned()
        .unwrap_or_else(|| Value::default_for_kind(FieldKind::from_descriptor(&fref.descriptor)));
    frame.push(value)?;
    Ok(())
}

pub(crate) fn putfield(frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let index = frame.read_u16()?;
    let fref = frame.class.constant_pool.resolve_fieldref(index)?;

    let value = frame.pop()?;
    let object = frame.pop()?;
    let Some(reference) = object.as_reference()? else {
        return Err(null_pointer());
    };
    let Some(instance) = reference.as_object() else {
        return Err(VmError::ExpectedValue {
            expected: "object",
            got: object.kind_name(),
        }
        .into());
    };

    instance.borrow_mut().fields.insert(fref.field_name, value);
    Ok(())
}
