//! Branches, switches, returns, and `athrow`.
//!
//! Branch offsets are signed and relative to the opcode's own pc, not the
//! byte following the operand.

use crate::eval::{Frame, InstOutcome};
use crate::exception::{class_names, JavaThrowable};
use crate::value::{Reference, Value};
use crate::{ExecError, VmError};

fn branch_to(frame: &mut Frame<'_>, opcode_pc: usize, offset: i64) -> Result<(), VmError> {
    let target = i64::try_from(opcode_pc).unwrap_or(i64::MAX) + offset;
    let in_range = usize::try_from(target)
        .map(|t| t < frame.code.len())
        .unwrap_or(false);
    if !in_range {
        return Err(VmError::BranchOutOfBounds {
            pc: opcode_pc,
            target,
        });
    }
    #[allow(clippy::cast_sign_loss)]
    {
        frame.pc = target as usize;
    }
    Ok(())
}

pub(crate) fn branch_unary(
    frame: &mut Frame<'_>,
    opcode_pc: usize,
    cond: impl Fn(i32) -> bool,
) -> Result<(), ExecError> {
    let offset = i64::from(frame.read_i16()?);
    let value = frame.pop()?.as_int()?;
    if cond(value) {
        branch_to(frame, opcode_pc, offset)?;
    }
    Ok(())
}

pub(crate) fn branch_binary(
    frame: &mut Frame<'_>,
    opcode_pc: usize,
    cond: impl Fn(i32, i32) -> bool,
) -> Result<(), ExecError> {
    let offset = i64::from(frame.read_i16()?);
    let v2 = frame.pop()?.as_int()?;
    let v1 = frame.pop()?.as_int()?;
    if cond(v1, v2) {
        branch_to(frame, opcode_pc, offset)?;
    }
    Ok(())
}

/// `if_acmpeq`/`if_acmpne`: reference identity, with null equal to null.
pub(crate) fn branch_acmp(
    frame: &mut Frame<'_>,
    opcode_pc: usize,
    branch_if_equal: bool,
) -> Result<(), ExecError> {
    let offset = i64::from(frame.read_i16()?);
    let v2 = frame.pop()?;
    let v1 = frame.pop()?;
    v1.as_reference()?;
    v2.as_reference()?;
    if v1.ref_eq(&v2) == branch_if_equal {
        branch_to(frame, opcode_pc, offset)?;
    }
    Ok(())
}

pub(crate) fn branch_null(
    frame: &mut Frame<'_>,
    opcode_pc: usize,
    branch_if_null: bool,
) -> Result<(), ExecError> {
    let offset = i64::from(frame.read_i16()?);
    let value = frame.pop()?;
    value.as_reference()?;
    if value.is_null() == branch_if_null {
        branch_to(frame, opcode_pc, offset)?;
    }
    Ok(())
}

pub(crate) fn goto(frame: &mut Frame<'_>, opcode_pc: usize, wide: bool) -> Result<(), ExecError> {
    let offset = if wide {
        i64::from(frame.read_i32()?)
    } else {
        i64::from(frame.read_i16()?)
    };
    branch_to(frame, opcode_pc, offset)?;
    Ok(())
}

/// Skips the padding that aligns switch operands to the next 4-byte
/// boundary from the start of the code array.
fn skip_switch_padding(frame: &mut Frame<'_>) -> Result<(), VmError> {
    while frame.pc % 4 != 0 {
        frame.read_u8()?;
    }
    Ok(())
}

pub(crate) fn tableswitch(frame: &mut Frame<'_>, opcode_pc: usize) -> Result<(), ExecError> {
    skip_switch_padding(frame)?;
    let default = i64::from(frame.read_i32()?);
    let low = i64::from(frame.read_i32()?);
    let high = i64::from(frame.read_i32()?);

    let key = i64::from(frame.pop()?.as_int()?);
    let mut chosen = default;
    let mut entry = low;
    while entry <= high {
        let offset = i64::from(frame.read_i32()?);
        if entry == key {
            chosen = offset;
        }
        entry += 1;
    }

    branch_to(frame, opcode_pc, chosen)?;
    Ok(())
}

pub(crate) fn lookupswitch(frame: &mut Frame<'_>, opcode_pc: usize) -> Result<(), ExecError> {
    skip_switch_padding(frame)?;
    let default = i64::from(frame.read_i32()?);
    let npairs = frame.read_i32()?;

    let key = frame.pop()?.as_int()?;
    let mut chosen = default;
    for _ in 0..npairs {
        let match_value = frame.read_i32()?;
        let offset = i64::from(frame.read_i32()?);
        if match_value == key {
            chosen = offset;
        }
    }

    branch_to(frame, opcode_pc, chosen)?;
    Ok(())
}

/// The `ireturn`/`lreturn`/`freturn`/`dreturn`/`areturn` family.
pub(crate) fn typed_return(
    frame: &mut Frame<'_>,
    expected: &'static str,
) -> Result<InstOutcome, ExecError> {
    let value = frame.pop()?;
    let matches = match expected {
        "int" => value.as_int().is_ok(),
        "long" => value.as_long().is_ok(),
        "float" => value.as_float().is_ok(),
        "double" => value.as_double().is_ok(),
        _ => value.is_reference(),
    };
    if !matches {
        return Err(VmError::ExpectedValue {
            expected,
            got: value.kind_name(),
        }
        .into());
    }
    Ok(InstOutcome::Return(Some(value)))
}

pub(crate) fn athrow(frame: &mut Frame<'_>) -> Result<InstOutcome, ExecError> {
    let value = frame.pop()?;
    let kind = value.kind_name();
    match value.into_reference()? {
        None => Err(JavaThrowable::new(class_names::NULL_POINTER).into()),
        Some(Reference::Object(object)) => Err(JavaThrowable::from_object(object).into()),
        Some(_) => Err(VmError::ExpectedThrowable { got: kind }.into()),
    }
}
