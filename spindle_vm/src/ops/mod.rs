//! Instruction handler modules.
//!
//! Organized by category. Each handler takes the current frame and the
//! instruction operands, returning a ControlFlow.

pub mod arithmetic;
pub mod control;
pub mod objects;
