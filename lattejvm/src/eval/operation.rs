//! Arithmetic, bitwise, shift, conversion, and comparison opcodes.
//!
//! Integer arithmetic follows two's-complement wrap-around semantics
//! (`Int.MIN / -1 == Int.MIN`). Shift amounts are masked to 5 bits for
//! `int` and 6 bits for `long`.

use crate::eval::{op, Frame};
use crate::exception::{class_names, JavaThrowable};
use crate::value::Value;
use crate::{ExecError, VmError};

pub(crate) fn int_binop(
    frame: &mut Frame<'_>,
    f: impl Fn(i32, i32) -> i32,
) -> Result<(), ExecError> {
    let v2 = frame.pop()?.as_int()?;
    let v1 = frame.pop()?.as_int()?;
    frame.push(Value::Int(f(v1, v2)))?;
    Ok(())
}

pub(crate) fn long_binop(
    frame: &mut Frame<'_>,
    f: impl Fn(i64, i64) -> i64,
) -> Result<(), ExecError> {
    let v2 = frame.pop()?.as_long()?;
    let v1 = frame.pop()?.as_long()?;
    frame.push(Value::Long(f(v1, v2)))?;
    Ok(())
}

pub(crate) fn float_binop(
    frame: &mut Frame<'_>,
    f: impl Fn(f32, f32) -> f32,
) -> Result<(), ExecError> {
    let v2 = frame.pop()?.as_float()?;
    let v1 = frame.pop()?.as_float()?;
    frame.push(Value::Float(f(v1, v2)))?;
    Ok(())
}

pub(crate) fn double_binop(
    frame: &mut Frame<'_>,
    f: impl Fn(f64, f64) -> f64,
) -> Result<(), ExecError> {
    let v2 = frame.pop()?.as_double()?;
    let v1 = frame.pop()?.as_double()?;
    frame.push(Value::Double(f(v1, v2)))?;
    Ok(())
}

fn division_by_zero() -> ExecError {
    JavaThrowable::with_message(class_names::ARITHMETIC, "/ by zero").into()
}

pub(crate) fn int_div(frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let v2 = frame.pop()?.as_int()?;
    let v1 = frame.pop()?.as_int()?;
    if v2 == 0 {
        return Err(division_by_zero());
    }
    frame.push(Value::Int(v1.wrapping_div(v2)))?;
    Ok(())
}

pub(crate) fn int_rem(frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let v2 = frame.pop()?.as_int()?;
    let v1 = frame.pop()?.as_int()?;
    if v2 == 0 {
        return Err(division_by_zero());
    }
    frame.push(Value::Int(v1.wrapping_rem(v2)))?;
    Ok(())
}

pub(crate) fn int_neg(frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let v = frame.pop()?.as_int()?;
    frame.push(Value::Int(v.wrapping_neg()))?;
    Ok(())
}

pub(crate) fn long_div(frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let v2 = frame.pop()?.as_long()?;
    let v1 = frame.pop()?.as_long()?;
    if v2 == 0 {
        return Err(division_by_zero());
    }
    frame.push(Value::Long(v1.wrapping_div(v2)))?;
    Ok(())
}

pub(crate) fn long_rem(frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let v2 = frame.pop()?.as_long()?;
    let v1 = frame.pop()?.as_long()?;
    if v2 == 0 {
        return Err(division_by_zero());
    }
    frame.push(Value::Long(v1.wrapping_rem(v2)))?;
    Ok(())
}

pub(crate) fn long_neg(frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let v = frame.pop()?.as_long()?;
    frame.push(Value::Long(v.wrapping_neg()))?;
    Ok(())
}

pub(crate) fn float_neg(frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let v = frame.pop()?.as_float()?;
    frame.push(Value::Float(-v))?;
    Ok(())
}

pub(crate) fn double_neg(frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let v = frame.pop()?.as_double()?;
    frame.push(Value::Double(-v))?;
    Ok(())
}

pub(crate) fn int_shift(
    frame: &mut Frame<'_>,
    f: impl Fn(i32, u32) -> i32,
) -> Result<(), ExecError> {
    let amount = frame.pop()?.as_int()?;
    let value = frame.pop()?.as_int()?;
    #[allow(clippy::cast_sign_loss)]
    let amount = (amount as u32) & 0x1F;
    frame.push(Value::Int(f(value, amount)))?;
    Ok(())
}

pub(crate) fn int_ushr(frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let amount = frame.pop()?.as_int()?;
    let value = frame.pop()?.as_int()?;
    #[allow(clippy::cast_sign_loss)]
    let amount = (amount as u32) & 0x1F;
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
    frame.push(Value::Int(((value as u32) >> amount) as i32))?;
    Ok(())
}

pub(crate) fn long_shift(
    frame: &mut Frame<'_>,
    f: impl Fn(i64, u32) -> i64,
) -> Result<(), ExecError> {
    // The shift amount is an int even for long shifts.
    let amount = frame.pop()?.as_int()?;
    let value = frame.pop()?.as_long()?;
    #[allow(clippy::cast_sign_loss)]
    let amount = (amount as u32) & 0x3F;
    frame.push(Value::Long(f(value, amount)))?;
    Ok(())
}

pub(crate) fn long_ushr(frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let amount = frame.pop()?.as_int()?;
    let value = frame.pop()?.as_long()?;
    #[allow(clippy::cast_sign_loss)]
    let amount = (amount as u32) & 0x3F;
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
    frame.push(Value::Long(((value as u64) >> amount) as i64))?;
    Ok(())
}

pub(crate) fn iinc(frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let index = usize::from(frame.read_u8()?);
    let delta = i32::from(frame.read_i8()?);
    let value = frame.local(index)?.as_int()?;
    frame.set_local(index, Value::Int(value.wrapping_add(delta)))?;
    Ok(())
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_lossless,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss
)]
pub(crate) fn convert(frame: &mut Frame<'_>, opcode: u8) -> Result<(), ExecError> {
    let result = match opcode {
        op::I2L => Value::Long(i64::from(frame.pop()?.as_int()?)),
        op::I2F => Value::Float(frame.pop()?.as_int()? as f32),
        op::I2D => Value::Double(f64::from(frame.pop()?.as_int()?)),
        op::L2I => Value::Int(frame.pop()?.as_long()? as i32),
        op::L2F => Value::Float(frame.pop()?.as_long()? as f32),
        op::L2D => Value::Double(frame.pop()?.as_long()? as f64),
        // `as` from float to int saturates and maps NaN to 0, matching the
        // f2i/d2i contract.
        op::F2I => Value::Int(frame.pop()?.as_float()? as i32),
        op::F2L => Value::Long(frame.pop()?.as_float()? as i64),
        op::F2D => Value::Double(f64::from(frame.pop()?.as_float()?)),
        op::D2I => Value::Int(frame.pop()?.as_double()? as i32),
        op::D2L => Value::Long(frame.pop()?.as_double()? as i64),
        op::D2F => Value::Float(frame.pop()?.as_double()? as f32),
        op::I2B => Value::Int(i32::from(frame.pop()?.as_int()? as i8)),
        op::I2C => Value::Int(i32::from(frame.pop()?.as_int()? as u16)),
        op::I2S => Value::Int(i32::from(frame.pop()?.as_int()? as i16)),
        _ => {
            return Err(VmError::UnknownOpcode {
                opcode,
                pc: frame.pc,
            }
            .into())
        }
    };
    frame.push(result)?;
    Ok(())
}

pub(crate) fn lcmp(frame: &mut Frame<'_>) -> Result<(), ExecError> {
    let v2 = frame.pop()?.as_long()?;
    let v1 = frame.pop()?.as_long()?;
    frame.push(Value::Int(match v1.cmp(&v2) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }))?;
    Ok(())
}

/// `fcmpl`/`fcmpg`: −1/0/1, with `nan_result` used when either side is NaN.
pub(crate) fn fcmp(frame: &mut Frame<'_>, nan_result: i32) -> Result<(), ExecError> {
    let v2 = frame.pop()?.as_float()?;
    let v1 = frame.pop()?.as_float()?;
    let result = match v1.partial_cmp(&v2) {
        None => nan_result,
        Some(std::cmp::Ordering::Less) => -1,
        Some(std::cmp::Ordering::Equal) => 0,
        Some(std::cmp::Ordering::Greater) => 1,
    };
    frame.push(Value::Int(result))?;
    Ok(())
}

pub(crate) fn dcmp(frame: &mut Frame<'_>, nan_result: i32) -> Result<(), ExecError> {
    let v2 = frame.pop()?.as_double()?;
    let v1 = frame.pop()?.as_double()?;
    let result = match v1.partial_cmp(&v2) {
        None => nan_result,
        Some(std::cmp::Ordering::Less) => -1,
        Some(std::cmp::Ordering::Equal) => 0,
        Some(std::cmp::Ordering::Greater) => 1,
    };
    frame.push(Value::Int(result))?;
    Ok(())
}
