//! Arithmetic instruction handlers.
//!
//! Integer arithmetic wraps on overflow. Integer division or remainder by
//! zero throws `ArithmeticException`; float arithmetic follows IEEE 754.

use crate::class::ARITHMETIC_CLASS;
use crate::dispatch::ControlFlow;
use crate::error::VmError;
use crate::frame::Frame;
use crate::value::Value;
use spindle_compiler::BinaryOp;
use spindle_core::Kind;
use std::cmp::Ordering;

fn divide_by_zero() -> ControlFlow {
    ControlFlow::Throw(Value::exception(ARITHMETIC_CLASS, "/ by zero"))
}

macro_rules! integer_op {
    ($name:ident, $ty:ty) => {
        /// `None` on division by zero.
        fn $name(op: BinaryOp, a: $ty, b: $ty) -> Option<$ty> {
            Some(match op {
                BinaryOp::Add => a.wrapping_add(b),
                BinaryOp::Sub => a.wrapping_sub(b),
                BinaryOp::Mul => a.wrapping_mul(b),
                BinaryOp::Div if b == 0 => return None,
                BinaryOp::Rem if b == 0 => return None,
                BinaryOp::Div => a.wrapping_div(b),
                BinaryOp::Rem => a.wrapping_rem(b),
                BinaryOp::And => a & b,
                BinaryOp::Or => a | b,
                BinaryOp::Xor => a ^ b,
                // Shift distances are masked to the operand width.
                BinaryOp::Shl => a.wrapping_shl(b as u32),
                BinaryOp::Shr => a.wrapping_shr(b as u32),
            })
        }
    };
}

integer_op!(int_op, i32);
integer_op!(long_op, i64);

macro_rules! float_op {
    ($name:ident, $ty:ty) => {
        /// `None` for bitwise operators.
        fn $name(op: BinaryOp, a: $ty, b: $ty) -> Option<$ty> {
            match op {
                BinaryOp::Add => Some(a + b),
                BinaryOp::Sub => Some(a - b),
                BinaryOp::Mul => Some(a * b),
                BinaryOp::Div => Some(a / b),
                BinaryOp::Rem => Some(a % b),
                _ => None,
            }
        }
    };
}

float_op!(float_op, f32);
float_op!(double_op, f64);

/// `a op b` for two operands of `kind`.
pub fn binary(frame: &mut Frame<'_>, op: BinaryOp, kind: Kind) -> Result<ControlFlow, VmError> {
    let b = frame.pop_kind(kind)?;
    let a = frame.pop_kind(kind)?;
    let result = match (a, b) {
        (Value::Int(a), Value::Int(b)) => match int_op(op, a, b) {
            Some(v) => Value::Int(v),
            None => return Ok(divide_by_zero()),
        },
        (Value::Long(a), Value::Long(b)) => match long_op(op, a, b) {
            Some(v) => Value::Long(v),
            None => return Ok(divide_by_zero()),
        },
        (Value::Float(a), Value::Float(b)) => match float_op(op, a, b) {
            Some(v) => Value::Float(v),
            None => return Err(frame.invalid(format!("{} on float", op.name()))),
        },
        (Value::Double(a), Value::Double(b)) => match double_op(op, a, b) {
            Some(v) => Value::Double(v),
            None => return Err(frame.invalid(format!("{} on double", op.name()))),
        },
        _ => return Err(frame.invalid(format!("{} on {kind}", op.name()))),
    };
    frame.push(result);
    Ok(ControlFlow::Continue)
}

/// `-a`.
pub fn negate(frame: &mut Frame<'_>, kind: Kind) -> Result<ControlFlow, VmError> {
    let result = match frame.pop_kind(kind)? {
        Value::Int(v) => Value::Int(v.wrapping_neg()),
        Value::Long(v) => Value::Long(v.wrapping_neg()),
        Value::Float(v) => Value::Float(-v),
        Value::Double(v) => Value::Double(-v),
        _ => return Err(frame.invalid("negate on ref")),
    };
    frame.push(result);
    Ok(ControlFlow::Continue)
}

/// Ordering of two numeric values of the same kind. NaN compares as `None`.
pub fn ordering(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Long(a), Value::Long(b)) => Some(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
        _ => None,
    }
}

/// Push -1, 0 or 1. Unordered floats compare as less.
pub fn compare(frame: &mut Frame<'_>, kind: Kind) -> Result<ControlFlow, VmError> {
    if kind == Kind::Ref {
        return Err(frame.invalid("compare on ref"));
    }
    let b = frame.pop_kind(kind)?;
    let a = frame.pop_kind(kind)?;
    let result = ordering(&a, &b).unwrap_or(Ordering::Less);
    frame.push(Value::Int(result as i32));
    Ok(ControlFlow::Continue)
}

/// Numeric conversion. Float to integer conversions saturate; NaN becomes 0.
pub fn convert(frame: &mut Frame<'_>, from: Kind, to: Kind) -> Result<ControlFlow, VmError> {
    let value = frame.pop_kind(from)?;
    let wide = match value {
        Value::Int(v) => Wide::Integer(i64::from(v)),
        Value::Long(v) => Wide::Integer(v),
        Value::Float(v) => Wide::Real(f64::from(v)),
        Value::Double(v) => Wide::Real(v),
        _ => return Err(frame.invalid(format!("convert {from} to {to}"))),
    };
    let result = match (wide, to) {
        (Wide::Integer(v), Kind::Int) => Value::Int(v as i32),
        (Wide::Integer(v), Kind::Long) => Value::Long(v),
        (Wide::Integer(v), Kind::Float) => Value::Float(v as f32),
        (Wide::Integer(v), Kind::Double) => Value::Double(v as f64),
        (Wide::Real(v), Kind::Int) => Value::Int(v as i32),
        (Wide::Real(v), Kind::Long) => Value::Long(v as i64),
        (Wide::Real(v), Kind::Float) => Value::Float(v as f32),
        (Wide::Real(v), Kind::Double) => Value::Double(v),
        (_, Kind::Ref) => return Err(frame.invalid(format!("convert {from} to ref"))),
    };
    frame.push(result);
    Ok(ControlFlow::Continue)
}

enum Wide {
    Integer(i64),
    Real(f64),
}
