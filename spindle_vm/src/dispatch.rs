//! Instruction dispatch and the main execution loop.
//!
//! One [`Interpreter::run`] call executes one procedure invocation. Nested
//! invocations recurse on the host stack, bounded by [`MAX_CALL_DEPTH`].
//! Every instruction handler returns a [`ControlFlow`] that tells the loop
//! what to do next.

use crate::error::{Interrupt, VmError};
use crate::frame::{Compiled, Frame, MAX_CALL_DEPTH};
use crate::machine;
use crate::ops::{arithmetic, control, objects};
use crate::value::Value;
use crate::vm::Program;
use spindle_compiler::{Constant, Instruction, Intrinsic, Label};
use spindle_core::types::OBJECT_CLASS;
use spindle_core::{Kind, ValueType};
use std::sync::Arc;

/// Control flow result from executing one instruction.
#[derive(Debug, Clone)]
pub(crate) enum ControlFlow {
    // =========================================================================
    // Normal Execution
    // =========================================================================
    /// Continue to the next instruction.
    Continue,

    /// Transfer to a label.
    Jump(Label),

    /// Leave the procedure.
    Return(Option<Value>),

    // =========================================================================
    // Exception Handling
    // =========================================================================
    /// Throw a value. The loop searches the exception table of the current
    /// procedure and either enters a handler or propagates to the caller.
    Throw(Value),
}

/// Executes the state-object intrinsics of a step procedure.
///
/// Plain procedures run with [`NoContext`], which rejects them.
pub(crate) trait StepContext {
    /// Execute `intrinsic` against the running state object.
    fn intrinsic(&mut self, intrinsic: &Intrinsic, frame: &mut Frame<'_>)
    -> Result<ControlFlow, VmError>;
}

/// Context of a procedure that is not a step procedure.
pub(crate) struct NoContext;

impl StepContext for NoContext {
    fn intrinsic(
        &mut self,
        intrinsic: &Intrinsic,
        frame: &mut Frame<'_>,
    ) -> Result<ControlFlow, VmError> {
        Err(misplaced(intrinsic, frame))
    }
}

/// Fault for an intrinsic the running context does not support.
pub(crate) fn misplaced(intrinsic: &Intrinsic, frame: &Frame<'_>) -> VmError {
    VmError::MisplacedIntrinsic {
        procedure: Arc::clone(&frame.code.name),
        intrinsic: Instruction::Intrinsic(intrinsic.clone()).to_string(),
    }
}

// =============================================================================
// Interpreter
// =============================================================================

/// Executes procedures of a program.
pub(crate) struct Interpreter<'p> {
    program: &'p Arc<Program>,
    depth: usize,
}

impl<'p> Interpreter<'p> {
    /// Interpreter at call depth zero.
    pub(crate) fn new(program: &'p Arc<Program>) -> Self {
        Self { program, depth: 0 }
    }

    /// Run `code` with `args` until it returns or throws.
    pub(crate) fn run(
        &self,
        code: &Compiled,
        args: Vec<Value>,
        context: &mut dyn StepContext,
    ) -> Result<Option<Value>, Interrupt> {
        let mut frame = Frame::new(code, args)?;
        let instructions = &code.procedure.code;

        while let Some(instruction) = instructions.get(frame.pc) {
            frame.at = frame.pc;
            frame.pc += 1;

            match self.execute(instruction, &mut frame, context)? {
                ControlFlow::Continue => {}
                ControlFlow::Jump(label) => frame.pc = code.target(label)?,
                ControlFlow::Return(value) => return Ok(value),
                ControlFlow::Throw(exception) => {
                    let exception = if exception.is_null() {
                        Value::null_pointer("thrown value")
                    } else {
                        exception
                    };
                    let class = exception.class_name().unwrap_or(OBJECT_CLASS);
                    let handler = code.handler_for(frame.at, class, &self.program.classes());
                    match handler {
                        Some(target) => {
                            tracing::trace!(procedure = %code.name, at = frame.at, target, "entering handler");
                            frame.clear_stack();
                            frame.push(exception);
                            frame.pc = target;
                        }
                        None => return Err(Interrupt::Throw(exception)),
                    }
                }
            }
        }

        Err(VmError::FellOffEnd {
            procedure: Arc::clone(&code.name),
        }
        .into())
    }

    fn execute(
        &self,
        instruction: &Instruction,
        frame: &mut Frame<'_>,
        context: &mut dyn StepContext,
    ) -> Result<ControlFlow, VmError> {
        match instruction {
            Instruction::Label(_) | Instruction::Line(_) | Instruction::Nop => {}

            // Data
            Instruction::Const(constant) => frame.push(match constant {
                Constant::Null => Value::Null,
                Constant::Int(v) => Value::Int(*v),
                Constant::Long(v) => Value::Long(*v),
                Constant::Float(v) => Value::Float(*v),
                Constant::Double(v) => Value::Double(*v),
                Constant::Str(s) => Value::Str(Arc::clone(s)),
            }),
            Instruction::Load { slot, kind } => {
                let value = frame.load(*slot, *kind)?;
                frame.push(value);
            }
            Instruction::Store { slot, kind } => {
                let value = frame.pop()?;
                frame.store(*slot, *kind, value)?;
            }
            Instruction::Increment { slot, delta } => {
                let local = frame.int_local(*slot)?;
                *local = local.wrapping_add(*delta);
            }
            Instruction::Pop => {
                frame.pop()?;
            }
            Instruction::Dup => {
                let top = frame.peek()?.clone();
                frame.push(top);
            }
            Instruction::Swap => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                frame.push(b);
                frame.push(a);
            }

            // Arithmetic
            Instruction::Binary { op, kind } => return arithmetic::binary(frame, *op, *kind),
            Instruction::Negate(kind) => return arithmetic::negate(frame, *kind),
            Instruction::Compare(kind) => return arithmetic::compare(frame, *kind),
            Instruction::Convert { from, to } => return arithmetic::convert(frame, *from, *to),
            Instruction::Cast(ty) => return objects::cast(frame, ty, &self.program.classes()),

            // Control
            Instruction::Jump(target) => return Ok(ControlFlow::Jump(*target)),
            Instruction::Branch { cond, target } => return control::branch(frame, *cond, *target),
            Instruction::BranchCompare { cond, kind, target } => {
                return control::branch_compare(frame, *cond, *kind, *target);
            }
            Instruction::BranchNull { is_null, target } => {
                return control::branch_null(frame, *is_null, *target);
            }
            Instruction::TableSwitch {
                low,
                default,
                targets,
            } => return control::table_switch(frame, *low, *default, targets),

            // Objects
            Instruction::New(class) => return objects::new(frame, class, &self.program.classes()),
            Instruction::Construct { class, argc } => return objects::construct(frame, class, *argc),
            Instruction::GetMember { index, ty } => return objects::get_member(frame, *index, ty),
            Instruction::Invoke {
                target,
                argc,
                returns,
            } => return self.invoke(frame, target, *argc, returns.as_ref()),

            // Exit
            Instruction::Throw => {
                let exception = frame.pop_kind(Kind::Ref)?;
                return Ok(ControlFlow::Throw(exception));
            }
            Instruction::Return => return Ok(ControlFlow::Return(None)),
            Instruction::ReturnValue(kind) => {
                let value = frame.pop_kind(*kind)?;
                return Ok(ControlFlow::Return(Some(value)));
            }

            // Coroutines
            Instruction::Directive(_) => {
                return Err(VmError::UntransformedDirective {
                    procedure: Arc::clone(&frame.code.name),
                    directive: instruction.to_string(),
                });
            }
            Instruction::Intrinsic(Intrinsic::Launch { object, argc }) => {
                let args = frame.pop_n(usize::from(*argc))?;
                let handle = machine::launch(self.program, object, args)?;
                frame.push(handle);
            }
            Instruction::Intrinsic(intrinsic) => return context.intrinsic(intrinsic, frame),
        }
        Ok(ControlFlow::Continue)
    }

    /// Call a native or a procedure. Natives shadow procedures of the same
    /// name.
    fn invoke(
        &self,
        frame: &mut Frame<'_>,
        target: &Arc<str>,
        argc: u16,
        returns: Option<&ValueType>,
    ) -> Result<ControlFlow, VmError> {
        let args = frame.pop_n(usize::from(argc))?;

        let result = if let Some(native) = self.program.native(target) {
            if native.arity != args.len() {
                return Err(VmError::Arity {
                    target: Arc::clone(target),
                    expected: native.arity,
                    found: args.len(),
                });
            }
            match (native.function)(&args) {
                Ok(value) => value,
                Err(exception) => return Ok(ControlFlow::Throw(exception)),
            }
        } else {
            let callee = self
                .program
                .procedure(target)
                .ok_or_else(|| VmError::UnknownTarget {
                    target: Arc::clone(target),
                })?;
            if self.depth + 1 >= MAX_CALL_DEPTH {
                return Err(VmError::StackOverflow {
                    depth: MAX_CALL_DEPTH,
                });
            }
            let nested = Interpreter {
                program: self.program,
                depth: self.depth + 1,
            };
            match nested.run(&callee, args, &mut NoContext) {
                Ok(value) => value,
                Err(Interrupt::Throw(exception)) => return Ok(ControlFlow::Throw(exception)),
                Err(Interrupt::Fault(fault)) => return Err(fault),
            }
        };

        if returns.is_some() {
            frame.push(result.unwrap_or(Value::Null));
        }
        Ok(ControlFlow::Continue)
    }
}
