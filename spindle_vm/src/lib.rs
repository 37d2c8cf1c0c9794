//! Interpreter for Spindle IR.
//!
//! Executes plain procedures directly and drives transformed coroutines on
//! the Spindle runtime:
//!
//! - **Dispatch loop**: one host call per procedure invocation, with
//!   exception tables resolved to instruction indices at load time
//! - **State objects**: `%launch` creates a task or generator whose steps
//!   run the generated step procedure against the object's fields
//! - **Natives**: host closures callable by name from interpreted code
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                        Vm                        │
//! ├──────────────────────────────────────────────────┤
//! │  Transformer ──► Program (shared, RwLock tables) │
//! │                  ├─ procedures  (Compiled)       │
//! │                  ├─ state objects (step + defs)  │
//! │                  ├─ natives                      │
//! │                  └─ classes                      │
//! │                                                  │
//! │  Interpreter ──► Frame (locals + operand stack)  │
//! │       │                                          │
//! │       └─ %launch ──► TaskMachine / GeneratorMachine
//! │                      (spindle_runtime bodies)    │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use spindle_compiler::{Directive, Instruction, ProcedureBuilder, ProcedureKind};
//! use spindle_core::{Kind, ValueType};
//! use spindle_vm::{Value, Vm};
//!
//! let mut b = ProcedureBuilder::new("Demo", "answer");
//! b.set_kind(ProcedureKind::Task);
//! b.emit_int(41);
//! b.emit_invoke("Async.ready", 1, Some(ValueType::object()));
//! b.emit_directive(Directive::Await);
//! b.emit_invoke("Unbox.int", 1, Some(ValueType::Int));
//! b.emit_int(1);
//! b.emit(Instruction::Binary { op: spindle_compiler::BinaryOp::Add, kind: Kind::Int });
//! b.emit_directive(Directive::Ret { with_value: true });
//! b.emit(Instruction::ReturnValue(Kind::Ref));
//!
//! let vm = Vm::new();
//! vm.load_procedure(b.finish().unwrap()).unwrap();
//! let task = vm.spawn("Demo.answer", vec![], &spindle_runtime::eager()).unwrap();
//! assert_eq!(task.wait().unwrap(), Value::Int(42));
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod class;
pub mod error;
pub mod frame;
pub mod native;
pub mod value;
pub mod vm;

// Execution
pub(crate) mod dispatch;
mod machine;
pub(crate) mod ops;

// Re-exports
pub use class::{Class, ClassTable};
pub use error::{Interrupt, Thrown, VmError};
pub use frame::{Compiled, MAX_CALL_DEPTH};
pub use native::{Native, NativeFn, NativeResult, NativeTable};
pub use value::{GeneratorCell, Object, Value};
pub use vm::{LoadedObject, Program, Vm};
