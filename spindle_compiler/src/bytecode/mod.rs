//! Stack-machine IR: instructions, procedures, builder and disassembler.

mod builder;
mod disasm;
mod instruction;
mod procedure;

pub use builder::ProcedureBuilder;
pub use disasm::disassemble;
pub use instruction::{
    BinaryOp, Condition, Constant, Directive, FieldId, Instruction, Intrinsic, Label, LocalIndex,
    SuspendKind,
};
pub use procedure::{ExceptionRegion, LocalRange, Procedure, ProcedureKind};
