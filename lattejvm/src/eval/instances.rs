//! Object and array creation, `checkcast`, and `instanceof`.

use lattejvm_base::descriptor::FieldKind;

use crate::class_instance::{ArrayInstance, ClassInstance};
use crate::eval::Frame;
use crate::exception::{class_names, JavaThrowable};
use crate::value::Value;
use crate::{ExecError, Vm, VmError};

/// `new`: runs `<clinit>` if needed and allocates an instance with an
/// empty field map. The constructor is invoked by the following
/// `invokespecial`, not here.
pub(crate) fn new_instance(vm: &mut Vm, frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let index = frame.read_u16()?;
    let class_name = frame
        .class
        .constant_pool
        .get_class_name(index)?
        .to_owned();

    vm.ensure_initialized(&class_name)?;

    let mut instance = ClassInstance::new(class_name.clone());
    if class_name == "java/lang/StringBuilder" {
        // StringBuilder is backed by a host string rather than char[].
        instance
            .fields
            .insert("_buffer".to_owned(), Value::string(""));
    }
    frame.push(Value::object(instance))?;
    Ok(())
}

fn check_length(length: i32) -> Result<usize, ExecError> {
    usize::try_from(length).map_err(|_| {
        ExecError::Java(JavaThrowable::with_message(
            class_names::NEGATIVE_ARRAY_SIZE,
            &length.to_string(),
        ))
    })
}

/// `newarray`: primitive arrays, with elements set to the type zero.
pub(crate) fn newarray(frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let atype = frame.read_u8()?;
    let length = check_length(frame.pop()?.as_int()?)?;

    let zero = match atype {
        // boolean, char, byte, short, int share the int cell
        4 | 5 | 8 | 9 | 10 => Value::Int(0),
        6 => Value::Float(0.0),
        7 => Value::Double(0.0),
        11 => Value::Long(0),
        _ => {
            return Err(VmError::ExpectedValue {
                expected: "newarray primitive type code",
                got: "unknown",
            }
            .into())
        }
    };

    frame.push(Value::array(ArrayInstance::new_filled(length, zero)))?;
    Ok(())
}

/// `anewarray`: reference arrays, elements null.
pub(crate) fn anewarray(frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let index = frame.read_u16()?;
    // The component class is named by the pool entry; validated, unused.
    frame.class.constant_pool.get_class_name(index)?;

    let length = check_length(frame.pop()?.as_int()?)?;
    frame.push(Value::array(ArrayInstance::new_reference(length)))?;
    Ok(())
}

/// `multianewarray` for one or two dimensions. Deeper nesting is out of
/// scope.
pub(crate) fn multianewarray(frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let index = frame.read_u16()?;
    let dimensions = frame.read_u8()?;
    let array_class = frame
        .class
        .constant_pool
        .get_class_name(index)?
        .to_owned();

    match dimensions {
        1 => {
            let length = check_length(frame.pop()?.as_int()?)?;
            let component = array_class.strip_prefix('[').unwrap_or("");
            let zero = Value::default_for_kind(FieldKind::from_descriptor(component));
            frame.push(Value::array(ArrayInstance::new_filled(length, zero)))?;
        }
        2 => {
            // Counts are popped innermost-first; they were pushed
            // outermost-first.
            let inner_length = check_length(frame.pop()?.as_int()?)?;
            let outer_length = check_length(frame.pop()?.as_int()?)?;

            let component = array_class
                .strip_prefix("[[")
                .unwrap_or("");
            let zero = Value::default_for_kind(FieldKind::from_descriptor(component));

            let mut outer = ArrayInstance::new_reference(outer_length);
            for slot in &mut outer.elements {
                *slot = Value::array(ArrayInstance::new_filled(inner_length, zero.clone()));
            }
            frame.push(Value::array(outer))?;
        }
        other => return Err(VmError::UnsupportedMultiArrayDimensions(other).into()),
    }
    Ok(())
}

/// `checkcast`: leaves the reference on the stack; raises
/// `ClassCastException` for a non-null reference that is not assignable.
pub(crate) fn checkcast(vm: &mut Vm, frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let index = frame.read_u16()?;
    let target = frame
        .class
        .constant_pool
        .get_class_name(index)?
        .to_owned();

    let value = frame.peek()?.clone();
    if value.is_null() {
        return Ok(());
    }
    value.as_reference()?;
    if !vm.value_is_instance_of(&value, &target) {
        return Err(JavaThrowable::with_message(
            class_names::CLASS_CAST,
            &format!("{} cannot be cast to {}", value.kind_name(), target),
        )
        .into());
    }
    Ok(())
}

/// `instanceof`: pushes 1/0 with the same assignability relation;
/// null is always 0.
pub(crate) fn instance_of(vm: &mut Vm, frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let index = frame.read_u16()?;
    let target = frame
        .class
        .constant_pool
        .get_class_name(index)?
        .to_owned();

    let value = frame.pop()?;
    value.as_reference()?;
    let result = if value.is_null() {
        0
    } else if vm.value_is_instance_of(&value, &target) {
        1
    } else {
        0
    };
    frame.push(Value::Int(result))?;
    Ok(())
}
