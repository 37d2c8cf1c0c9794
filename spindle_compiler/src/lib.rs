//! Coroutine compiler for Spindle.
//!
//! This crate rewrites stack-machine procedures that contain suspend points
//! into re-entrant state machines.
//!
//! # Architecture
//!
//! ```text
//! Procedure (with directives) → Analysis → Suspension Codegen → StateObjectDef + launcher
//! ```
//!
//! # Key Types
//!
//! - [`Procedure`] - A procedure body in the stack-machine IR
//! - [`ProcedureBuilder`] - High-level API for procedure construction
//! - [`Analyzer`] - Type-state and liveness analysis
//! - [`Transformer`] - Turns a task or generator into a state object
//!
//! # Example
//!
//! ```
//! use spindle_compiler::{Directive, Instruction, ProcedureBuilder, ProcedureKind, TransformConfig};
//! use spindle_core::{Kind, ValueType};
//!
//! let mut b = ProcedureBuilder::new("Demo", "answer");
//! b.set_kind(ProcedureKind::Task);
//! b.emit_invoke("Demo.fetch", 0, Some(ValueType::reference("Future")));
//! b.emit_directive(Directive::Await);
//! b.emit_directive(Directive::Ret { with_value: true });
//! b.emit(Instruction::ReturnValue(Kind::Ref));
//! let procedure = b.finish().unwrap();
//!
//! let out = spindle_compiler::transform(&procedure, TransformConfig::default()).unwrap();
//! assert_eq!(out.state_object.resume_table.len(), 1);
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod analysis;
pub mod bytecode;
pub mod transform;

// Re-export main types
pub use analysis::{Analysis, Analyzer, LiveLocal, LiveValue, Snapshot, StackEntry, analyze};
pub use bytecode::{
    BinaryOp, Condition, Constant, Directive, ExceptionRegion, FieldId, Instruction, Intrinsic,
    Label, LocalIndex, LocalRange, Procedure, ProcedureBuilder, ProcedureKind, SuspendKind,
    disassemble,
};
pub use transform::{
    FieldDef, FieldRole, ResumePoint, ResumeTable, StateObjectDef, StepLayout, TransformConfig,
    TransformOutput, Transformer, transform,
};
