//! State-object instances and the bodies that drive their step procedures.
//!
//! `%launch` creates an [`Instance`]: the loaded definition plus one value
//! per field. Tasks wrap it in a [`TaskMachine`], generators in a
//! [`GeneratorMachine`]. Each step runs the step procedure once with the
//! state id and the resume value; the intrinsics it executes leave exactly
//! one signal behind, which becomes the runtime's step result.

use crate::dispatch::{ControlFlow, Interpreter, StepContext, misplaced};
use crate::error::{Interrupt, Thrown, VmError};
use crate::frame::Frame;
use crate::native::{awaitable_of, cast_error};
use crate::value::{GeneratorCell, Value};
use crate::vm::{LoadedObject, Program};
use spindle_compiler::{FieldId, FieldRole, Intrinsic, ProcedureKind, SuspendKind};
use spindle_core::types::ILLEGAL_STATE_CLASS;
use spindle_core::{CoroutineMetadata, ValueType};
use spindle_runtime::{
    AwaitableRef, BoxError, ExecutorRef, GenStep, Generator, GeneratorBody, Resume, RuntimeError,
    Step, Task, TaskBody,
};
use std::sync::Arc;

/// Create an unstarted task or generator for the state object `object`.
pub(crate) fn launch(
    program: &Arc<Program>,
    object: &Arc<str>,
    args: Vec<Value>,
) -> Result<Value, VmError> {
    let loaded = program
        .object(object)
        .ok_or_else(|| VmError::UnknownStateObject {
            object: Arc::clone(object),
        })?;
    let instance = Instance::new(loaded, args)?;
    tracing::trace!(object = %object, "launched state object");

    let program = Arc::clone(program);
    Ok(match instance.object.def.kind {
        ProcedureKind::Generator => Value::Generator(GeneratorCell::new(Generator::new(
            GeneratorMachine { program, instance },
        ))),
        _ => Value::Task(Task::new(TaskMachine { program, instance })),
    })
}

/// Step argument for a state id. Ids that do not fit reach the dispatcher's
/// default branch.
fn state_arg(state: u32) -> Value {
    Value::Int(i32::try_from(state).unwrap_or(-1))
}

// =============================================================================
// Instance
// =============================================================================

/// A state-object instance: definition plus field values.
struct Instance {
    object: Arc<LoadedObject>,
    fields: Vec<Value>,
}

impl Instance {
    fn new(object: Arc<LoadedObject>, args: Vec<Value>) -> Result<Self, VmError> {
        let def = &object.def;
        if args.len() != def.argument_count() {
            return Err(VmError::Arity {
                target: Arc::clone(&def.name),
                expected: def.argument_count(),
                found: args.len(),
            });
        }
        let fields = def
            .fields
            .iter()
            .map(|field| match field.role {
                FieldRole::Argument(n) => args.get(usize::from(n)).cloned().unwrap_or_default(),
                FieldRole::Spill => Value::zero(field.ty.kind()),
            })
            .collect();
        Ok(Self { object, fields })
    }
}

/// Field access shared by both contexts.
fn field_access(
    object: &LoadedObject,
    fields: &mut [Value],
    intrinsic: &Intrinsic,
    frame: &mut Frame<'_>,
) -> Option<Result<ControlFlow, VmError>> {
    let bad_field = |field: FieldId| VmError::BadField {
        object: Arc::clone(&object.def.name),
        field: field.0,
    };
    let result = match intrinsic {
        Intrinsic::GetField { field, ty } => get_field(fields, *field, ty, frame, bad_field),
        Intrinsic::PutField { field, ty } => put_field(fields, *field, ty, frame, bad_field),
        _ => return None,
    };
    Some(result.map(|()| ControlFlow::Continue))
}

fn get_field(
    fields: &[Value],
    field: FieldId,
    ty: &ValueType,
    frame: &mut Frame<'_>,
    bad_field: impl Fn(FieldId) -> VmError,
) -> Result<(), VmError> {
    let value = fields.get(field.index()).ok_or_else(|| bad_field(field))?;
    if !value.fits(ty.kind()) {
        return Err(frame.mismatch(ty.kind(), value));
    }
    frame.push(value.clone());
    Ok(())
}

fn put_field(
    fields: &mut [Value],
    field: FieldId,
    ty: &ValueType,
    frame: &mut Frame<'_>,
    bad_field: impl Fn(FieldId) -> VmError,
) -> Result<(), VmError> {
    let value = frame.pop_kind(ty.kind())?;
    let slot = fields.get_mut(field.index()).ok_or_else(|| bad_field(field))?;
    *slot = value;
    Ok(())
}

/// Fault for a step procedure that signalled twice in one step.
fn second_signal(frame: &Frame<'_>, intrinsic: &Intrinsic) -> VmError {
    frame.invalid(format!(
        "{} after the step already signalled",
        spindle_compiler::Instruction::Intrinsic(intrinsic.clone())
    ))
}

// =============================================================================
// Task Machine
// =============================================================================

enum TaskSignal {
    Await { state: u32, awaitable: AwaitableRef<Value> },
    Complete(Value),
    Error(Value),
}

struct TaskContext<'a> {
    object: &'a LoadedObject,
    fields: &'a mut [Value],
    executor: &'a ExecutorRef,
    signal: Option<TaskSignal>,
}

impl TaskContext<'_> {
    fn signal(
        &mut self,
        signal: TaskSignal,
        intrinsic: &Intrinsic,
        frame: &Frame<'_>,
    ) -> Result<ControlFlow, VmError> {
        if self.signal.is_some() {
            return Err(second_signal(frame, intrinsic));
        }
        self.signal = Some(signal);
        Ok(ControlFlow::Continue)
    }
}

impl StepContext for TaskContext<'_> {
    fn intrinsic(
        &mut self,
        intrinsic: &Intrinsic,
        frame: &mut Frame<'_>,
    ) -> Result<ControlFlow, VmError> {
        if let Some(result) = field_access(self.object, self.fields, intrinsic, frame) {
            return result;
        }
        match intrinsic {
            Intrinsic::Suspend {
                kind: SuspendKind::Await,
                state,
            } => {
                let operand = frame.pop()?;
                match awaitable_of(&operand) {
                    Ok(awaitable) => self.signal(
                        TaskSignal::Await {
                            state: *state,
                            awaitable,
                        },
                        intrinsic,
                        frame,
                    ),
                    Err(exception) => Ok(ControlFlow::Throw(exception)),
                }
            }
            Intrinsic::Complete => {
                let value = frame.pop()?;
                self.signal(TaskSignal::Complete(value), intrinsic, frame)
            }
            Intrinsic::CompleteError => {
                let exception = frame.pop()?;
                self.signal(TaskSignal::Error(exception), intrinsic, frame)
            }
            Intrinsic::CurrentExecutor => {
                frame.push(Value::Executor(Arc::clone(self.executor)));
                Ok(ControlFlow::Continue)
            }
            _ => Err(misplaced(intrinsic, frame)),
        }
    }
}

/// Drives a task state object.
struct TaskMachine {
    program: Arc<Program>,
    instance: Instance,
}

impl TaskBody for TaskMachine {
    type Output = Value;
    type Input = Value;

    fn step(&mut self, state: u32, resume: Resume<Value>, executor: &ExecutorRef) -> Step<Value, Value> {
        let object = Arc::clone(&self.instance.object);
        let (flag, value) = match resume {
            Resume::Start => (0, Value::Null),
            Resume::Value(value) => (0, value),
            Resume::Error(error) => (1, Thrown::value_of(&error)),
        };

        let mut context = TaskContext {
            object: &object,
            fields: &mut self.instance.fields,
            executor,
            signal: None,
        };
        let args = vec![state_arg(state), Value::Int(flag), value];
        let result = Interpreter::new(&self.program).run(&object.step, args, &mut context);

        match (result, context.signal) {
            (Ok(_), Some(TaskSignal::Await { state, awaitable })) => Step::Await { state, awaitable },
            (Ok(_), Some(TaskSignal::Complete(value))) => Step::Return(value),
            (Ok(_), Some(TaskSignal::Error(exception))) => Step::Throw(Thrown(exception).boxed()),
            (Ok(_), None) => {
                tracing::warn!(object = %object.def.name, state, "step returned without a signal");
                Step::Throw(
                    RuntimeError::step_fault(format!(
                        "{} returned from state {state} without suspending or completing",
                        object.def.name
                    ))
                    .boxed(),
                )
            }
            (Err(Interrupt::Throw(exception)), _) => Step::Throw(Thrown(exception).boxed()),
            (Err(Interrupt::Fault(fault)), _) => {
                tracing::warn!(object = %object.def.name, state, error = %fault, "step faulted");
                Step::Throw(Arc::new(fault))
            }
        }
    }

    fn metadata(&self) -> Option<Arc<CoroutineMetadata>> {
        Some(Arc::clone(&self.instance.object.def.metadata))
    }
}

// =============================================================================
// Generator Machine
// =============================================================================

enum GenSignal {
    Yield { state: u32, value: Value },
    YieldAll { state: u32, generator: Generator<Value> },
}

struct GeneratorContext<'a> {
    object: &'a LoadedObject,
    fields: &'a mut [Value],
    signal: Option<GenSignal>,
}

impl StepContext for GeneratorContext<'_> {
    fn intrinsic(
        &mut self,
        intrinsic: &Intrinsic,
        frame: &mut Frame<'_>,
    ) -> Result<ControlFlow, VmError> {
        if let Some(result) = field_access(self.object, self.fields, intrinsic, frame) {
            return result;
        }
        let Intrinsic::Suspend { kind, state } = intrinsic else {
            return Err(misplaced(intrinsic, frame));
        };
        let operand = frame.pop()?;
        let signal = match kind {
            SuspendKind::Yield => GenSignal::Yield {
                state: *state,
                value: operand,
            },
            SuspendKind::YieldAll => {
                let generator = match &operand {
                    Value::Generator(cell) => cell.take(),
                    Value::Null => {
                        return Ok(ControlFlow::Throw(Value::null_pointer("delegated generator")));
                    }
                    other => return Ok(ControlFlow::Throw(cast_error("Generator", other))),
                };
                let Some(generator) = generator else {
                    return Ok(ControlFlow::Throw(Value::exception(
                        ILLEGAL_STATE_CLASS,
                        "generator already consumed",
                    )));
                };
                GenSignal::YieldAll {
                    state: *state,
                    generator,
                }
            }
            SuspendKind::Await => return Err(misplaced(intrinsic, frame)),
        };
        if self.signal.is_some() {
            return Err(second_signal(frame, intrinsic));
        }
        self.signal = Some(signal);
        Ok(ControlFlow::Continue)
    }
}

/// Drives a generator state object.
struct GeneratorMachine {
    program: Arc<Program>,
    instance: Instance,
}

impl GeneratorBody for GeneratorMachine {
    type Item = Value;

    fn step(&mut self, state: u32, error: Option<BoxError>) -> GenStep<Value> {
        let object = Arc::clone(&self.instance.object);
        let error = error.map_or(Value::Null, |e| Thrown::value_of(&e));

        let mut context = GeneratorContext {
            object: &object,
            fields: &mut self.instance.fields,
            signal: None,
        };
        let args = vec![state_arg(state), error];
        let result = Interpreter::new(&self.program).run(&object.step, args, &mut context);

        match (result, context.signal) {
            (Ok(_), Some(GenSignal::Yield { state, value })) => GenStep::Yield { state, value },
            (Ok(_), Some(GenSignal::YieldAll { state, generator })) => {
                GenStep::YieldAll { state, generator }
            }
            (Ok(_), None) => GenStep::Return,
            (Err(Interrupt::Throw(exception)), _) => GenStep::Throw(Thrown(exception).boxed()),
            (Err(Interrupt::Fault(fault)), _) => {
                tracing::warn!(object = %object.def.name, state, error = %fault, "step faulted");
                GenStep::Throw(Arc::new(fault))
            }
        }
    }

    fn metadata(&self) -> Option<Arc<CoroutineMetadata>> {
        Some(Arc::clone(&self.instance.object.def.metadata))
    }
}
