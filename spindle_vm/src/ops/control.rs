//! Control flow instruction handlers.

use super::arithmetic::ordering;
use crate::dispatch::ControlFlow;
use crate::error::VmError;
use crate::frame::Frame;
use spindle_compiler::{Condition, Label};
use spindle_core::Kind;

#[inline]
fn jump_if(taken: bool, target: Label) -> ControlFlow {
    if taken {
        ControlFlow::Jump(target)
    } else {
        ControlFlow::Continue
    }
}

/// Compare an int against zero.
pub fn branch(frame: &mut Frame<'_>, cond: Condition, target: Label) -> Result<ControlFlow, VmError> {
    let value = frame.pop_int()?;
    Ok(jump_if(cond.holds(value.cmp(&0)), target))
}

/// Compare two operands. References compare by identity and support only
/// `eq` and `ne`; unordered floats take only `ne`.
pub fn branch_compare(
    frame: &mut Frame<'_>,
    cond: Condition,
    kind: Kind,
    target: Label,
) -> Result<ControlFlow, VmError> {
    let b = frame.pop_kind(kind)?;
    let a = frame.pop_kind(kind)?;
    let taken = if kind == Kind::Ref {
        match cond {
            Condition::Eq => a.same(&b),
            Condition::Ne => !a.same(&b),
            _ => return Err(frame.invalid(format!("if_acmp{}", cond.name()))),
        }
    } else {
        match ordering(&a, &b) {
            Some(order) => cond.holds(order),
            None => cond == Condition::Ne,
        }
    };
    Ok(jump_if(taken, target))
}

/// Jump on null or non-null.
pub fn branch_null(frame: &mut Frame<'_>, is_null: bool, target: Label) -> Result<ControlFlow, VmError> {
    let value = frame.pop_kind(Kind::Ref)?;
    Ok(jump_if(value.is_null() == is_null, target))
}

/// Dense jump table.
pub fn table_switch(
    frame: &mut Frame<'_>,
    low: i32,
    default: Label,
    targets: &[Label],
) -> Result<ControlFlow, VmError> {
    let key = frame.pop_int()?;
    let index = i64::from(key) - i64::from(low);
    let target = usize::try_from(index)
        .ok()
        .and_then(|i| targets.get(i))
        .copied()
        .unwrap_or(default);
    Ok(ControlFlow::Jump(target))
}
