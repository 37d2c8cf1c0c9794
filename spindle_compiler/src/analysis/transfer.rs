//! Per-instruction effects on an abstract frame.

use super::frame::{Frame, Slot};
use crate::bytecode::{Directive, Instruction, Intrinsic, LocalIndex};
use spindle_core::types::EXECUTOR_CLASS;
use spindle_core::{Kind, SpindleError, SpindleResult, ValueType};
use std::sync::Arc;

/// Applies instruction effects to frames, reporting verification errors
/// against one procedure.
pub(crate) struct Transfer<'a> {
    pub procedure: &'a Arc<str>,
}

impl Transfer<'_> {
    fn error(&self, at: usize, message: impl Into<String>) -> SpindleError {
        SpindleError::verify(self.procedure, at, message)
    }

    // =========================================================================
    // Stack Helpers
    // =========================================================================

    fn pop(&self, frame: &mut Frame, at: usize) -> SpindleResult<Slot> {
        frame
            .stack
            .pop()
            .ok_or_else(|| self.error(at, "operand stack underflow"))
    }

    fn pop_kind(&self, frame: &mut Frame, kind: Kind, at: usize) -> SpindleResult<Slot> {
        let slot = self.pop(frame, at)?;
        if !slot.accepts(kind) {
            return Err(self.error(at, format!("expected {kind} operand, found {slot}")));
        }
        Ok(slot)
    }

    fn pop_initialized(&self, frame: &mut Frame, at: usize) -> SpindleResult<Slot> {
        let slot = self.pop(frame, at)?;
        if !slot.is_initialized() {
            return Err(self.error(at, format!("operand {slot} is not initialized")));
        }
        Ok(slot)
    }

    fn pop_reference(&self, frame: &mut Frame, at: usize) -> SpindleResult<Slot> {
        let slot = self.pop_initialized(frame, at)?;
        if !slot.accepts(Kind::Ref) {
            return Err(self.error(at, format!("expected reference operand, found {slot}")));
        }
        Ok(slot)
    }

    fn pop_n(&self, frame: &mut Frame, count: u16, at: usize) -> SpindleResult<()> {
        for _ in 0..count {
            self.pop_initialized(frame, at)?;
        }
        Ok(())
    }

    fn local<'f>(&self, frame: &'f Frame, slot: LocalIndex, at: usize) -> SpindleResult<&'f Slot> {
        frame
            .locals
            .get(usize::from(slot))
            .ok_or_else(|| self.error(at, format!("local {slot} out of range")))
    }

    fn store(&self, frame: &mut Frame, slot: LocalIndex, value: Slot, at: usize) -> SpindleResult<()> {
        let index = usize::from(slot);
        let wide = value.is_wide();
        let limit = if wide { index + 1 } else { index };
        if limit >= frame.locals.len() {
            return Err(self.error(at, format!("local {slot} out of range")));
        }
        // Overwriting the second half of a wide value invalidates its first half.
        if index > 0 && frame.locals[index - 1].is_wide() {
            frame.locals[index - 1] = Slot::Top;
        }
        frame.locals[index] = value;
        if wide {
            frame.locals[index + 1] = Slot::Top;
        }
        Ok(())
    }

    // =========================================================================
    // Effects
    // =========================================================================

    /// Apply the effect of `instruction` (at index `at`) to `frame`.
    pub fn apply(&self, frame: &mut Frame, instruction: &Instruction, at: usize) -> SpindleResult<()> {
        match instruction {
            Instruction::Label(_) | Instruction::Line(_) | Instruction::Nop => {}
            Instruction::Const(constant) => {
                let slot = constant.value_type().map_or(Slot::Null, Slot::Value);
                frame.stack.push(slot);
            }
            Instruction::Load { slot, kind } => {
                let value = self.local(frame, *slot, at)?.clone();
                if !value.accepts(*kind) {
                    return Err(self.error(at, format!("load {kind} from local {slot} holding {value}")));
                }
                frame.stack.push(value);
            }
            Instruction::Store { slot, kind } => {
                let value = self.pop_kind(frame, *kind, at)?;
                self.store(frame, *slot, value, at)?;
            }
            Instruction::Increment { slot, .. } => {
                let value = self.local(frame, *slot, at)?;
                if *value != Slot::Value(ValueType::Int) {
                    return Err(self.error(at, format!("increment of local {slot} holding {value}")));
                }
            }
            Instruction::Pop => {
                self.pop(frame, at)?;
            }
            Instruction::Dup => {
                let top = frame
                    .stack
                    .last()
                    .cloned()
                    .ok_or_else(|| self.error(at, "dup on empty stack"))?;
                frame.stack.push(top);
            }
            Instruction::Swap => {
                let a = self.pop(frame, at)?;
                let b = self.pop(frame, at)?;
                frame.stack.push(a);
                frame.stack.push(b);
            }
            Instruction::Binary { kind, .. } => {
                if *kind == Kind::Ref {
                    return Err(self.error(at, "arithmetic on references"));
                }
                self.pop_kind(frame, *kind, at)?;
                self.pop_kind(frame, *kind, at)?;
                frame.stack.push(Slot::Value(ValueType::from(*kind)));
            }
            Instruction::Negate(kind) => {
                if *kind == Kind::Ref {
                    return Err(self.error(at, "negation of a reference"));
                }
                self.pop_kind(frame, *kind, at)?;
                frame.stack.push(Slot::Value(ValueType::from(*kind)));
            }
            Instruction::Compare(kind) => {
                self.pop_kind(frame, *kind, at)?;
                self.pop_kind(frame, *kind, at)?;
                frame.stack.push(Slot::Value(ValueType::Int));
            }
            Instruction::Convert { from, to } => {
                if *from == Kind::Ref || *to == Kind::Ref {
                    return Err(self.error(at, "numeric conversion involving a reference"));
                }
                self.pop_kind(frame, *from, at)?;
                frame.stack.push(Slot::Value(ValueType::from(*to)));
            }
            Instruction::Cast(ty) => {
                self.pop_initialized(frame, at)?;
                frame.stack.push(Slot::Value(ty.clone()));
            }
            Instruction::Jump(_) => {}
            Instruction::Branch { .. } | Instruction::TableSwitch { .. } => {
                self.pop_kind(frame, Kind::Int, at)?;
            }
            Instruction::BranchCompare { kind, .. } => {
                self.pop_kind(frame, *kind, at)?;
                self.pop_kind(frame, *kind, at)?;
            }
            Instruction::BranchNull { .. } => {
                self.pop_kind(frame, Kind::Ref, at)?;
            }
            Instruction::New(class) => {
                frame.stack.push(Slot::Uninit {
                    class: Arc::clone(class),
                    site: at,
                });
            }
            Instruction::Construct { class, argc } => {
                self.pop_n(frame, *argc, at)?;
                match self.pop(frame, at)? {
                    Slot::Uninit { site, .. } => frame.initialize(site, class),
                    other => {
                        return Err(self.error(at, format!("construct on {other}")));
                    }
                }
            }
            Instruction::GetMember { ty, .. } => {
                let object = self.pop_initialized(frame, at)?;
                if !object.accepts(Kind::Ref) {
                    return Err(self.error(at, format!("member access on {object}")));
                }
                frame.stack.push(Slot::Value(ty.clone()));
            }
            Instruction::Invoke { argc, returns, .. } => {
                self.pop_n(frame, *argc, at)?;
                if let Some(ty) = returns {
                    frame.stack.push(Slot::Value(ty.clone()));
                }
            }
            Instruction::Throw => {
                self.pop_reference(frame, at)?;
            }
            Instruction::Return => {}
            Instruction::ReturnValue(kind) => {
                self.pop_kind(frame, *kind, at)?;
            }
            Instruction::Directive(directive) => self.apply_directive(frame, directive, at)?,
            Instruction::Intrinsic(intrinsic) => self.apply_intrinsic(frame, intrinsic, at)?,
        }
        Ok(())
    }

    fn apply_directive(&self, frame: &mut Frame, directive: &Directive, at: usize) -> SpindleResult<()> {
        match directive {
            Directive::Await => {
                self.pop_reference(frame, at)?;
                frame.stack.push(Slot::Value(ValueType::object()));
            }
            Directive::Yield | Directive::YieldAll => {
                self.pop_reference(frame, at)?;
            }
            Directive::Ret { with_value } => {
                if *with_value {
                    self.pop_initialized(frame, at)?;
                }
                frame.stack.push(Slot::Value(ValueType::object()));
            }
            Directive::CurrentExecutor => {
                frame
                    .stack
                    .push(Slot::Value(ValueType::reference(EXECUTOR_CLASS)));
            }
        }
        Ok(())
    }

    fn apply_intrinsic(&self, frame: &mut Frame, intrinsic: &Intrinsic, at: usize) -> SpindleResult<()> {
        match intrinsic {
            Intrinsic::Suspend { .. } => {
                self.pop_reference(frame, at)?;
            }
            Intrinsic::Complete => {
                self.pop_initialized(frame, at)?;
            }
            Intrinsic::CompleteError => {
                self.pop_kind(frame, Kind::Ref, at)?;
            }
            Intrinsic::CurrentExecutor => {
                frame
                    .stack
                    .push(Slot::Value(ValueType::reference(EXECUTOR_CLASS)));
            }
            Intrinsic::Launch { object, argc } => {
                self.pop_n(frame, *argc, at)?;
                frame
                    .stack
                    .push(Slot::Value(ValueType::Reference(Arc::clone(object))));
            }
            Intrinsic::GetField { ty, .. } => {
                frame.stack.push(Slot::Value(ty.clone()));
            }
            Intrinsic::PutField { ty, .. } => {
                self.pop_kind(frame, ty.kind(), at)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Constant;

    fn run(frame: &mut Frame, code: &[Instruction]) -> SpindleResult<()> {
        let name: Arc<str> = Arc::from("T.p");
        let transfer = Transfer { procedure: &name };
        for (at, instruction) in code.iter().enumerate() {
            transfer.apply(frame, instruction, at)?;
        }
        Ok(())
    }

    #[test]
    fn test_wide_store_clears_neighbours() {
        let mut frame = Frame::entry(&[], 4);
        run(
            &mut frame,
            &[
                Instruction::Const(Constant::Int(1)),
                Instruction::Store { slot: 1, kind: Kind::Int },
                Instruction::Const(Constant::Long(2)),
                Instruction::Store { slot: 0, kind: Kind::Long },
            ],
        )
        .unwrap();
        assert_eq!(frame.locals[0], Slot::Value(ValueType::Long));
        assert_eq!(frame.locals[1], Slot::Top);

        run(
            &mut frame,
            &[
                Instruction::Const(Constant::Int(1)),
                Instruction::Store { slot: 1, kind: Kind::Int },
            ],
        )
        .unwrap();
        assert_eq!(frame.locals[0], Slot::Top);
    }

    #[test]
    fn test_load_kind_mismatch() {
        let mut frame = Frame::entry(&[ValueType::Int], 1);
        let result = run(&mut frame, &[Instruction::Load { slot: 0, kind: Kind::Long }]);
        assert!(matches!(result, Err(SpindleError::Verify { .. })));
    }

    #[test]
    fn test_construct_initializes_duplicates() {
        let mut frame = Frame::entry(&[], 0);
        run(
            &mut frame,
            &[
                Instruction::New(Arc::from("Pair")),
                Instruction::Dup,
                Instruction::Const(Constant::Int(1)),
                Instruction::Construct {
                    class: Arc::from("Pair"),
                    argc: 1,
                },
            ],
        )
        .unwrap();
        assert_eq!(frame.stack, vec![Slot::Value(ValueType::reference("Pair"))]);
    }

    #[test]
    fn test_uninitialized_argument_rejected() {
        let mut frame = Frame::entry(&[], 0);
        let result = run(
            &mut frame,
            &[
                Instruction::New(Arc::from("Pair")),
                Instruction::Invoke {
                    target: Arc::from("f"),
                    argc: 1,
                    returns: None,
                },
            ],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_await_pushes_object() {
        let mut frame = Frame::entry(&[ValueType::reference("Task")], 1);
        run(
            &mut frame,
            &[
                Instruction::Load { slot: 0, kind: Kind::Ref },
                Instruction::Directive(Directive::Await),
            ],
        )
        .unwrap();
        assert_eq!(frame.stack, vec![Slot::Value(ValueType::object())]);
    }
}
