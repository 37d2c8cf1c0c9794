//! Procedure builder for instruction emission.
//!
//! The `ProcedureBuilder` provides a high-level API for constructing
//! procedures with local allocation, label management and line tracking.
//! The transformer uses the same builder to assemble generated step
//! procedures, so hand-written and generated code share one assembly path.

use super::instruction::{
    BinaryOp, Condition, Constant, Directive, Instruction, Intrinsic, Label, LocalIndex,
};
use super::procedure::{ExceptionRegion, LocalRange, Procedure, ProcedureKind};
use spindle_core::{Kind, SpindleError, SpindleResult, ValueType};
use std::sync::Arc;

/// Builder for constructing procedures.
///
/// # Example
/// ```ignore
/// let mut b = ProcedureBuilder::new("Math", "twice");
/// let x = b.add_param(ValueType::Int);
/// b.emit_load(x, Kind::Int);
/// b.emit_const(Constant::Int(2));
/// b.emit(Instruction::Binary { op: BinaryOp::Mul, kind: Kind::Int });
/// b.emit(Instruction::ReturnValue(Kind::Int));
/// let procedure = b.finish()?;
/// ```
#[derive(Debug)]
pub struct ProcedureBuilder {
    owner: Arc<str>,
    name: Arc<str>,
    kind: ProcedureKind,
    params: Vec<ValueType>,
    returns: Option<ValueType>,
    source_file: Option<Arc<str>>,

    /// Emitted instructions.
    code: Vec<Instruction>,
    /// Exception table in priority order.
    regions: Vec<ExceptionRegion>,
    /// Named local debug ranges.
    local_ranges: Vec<LocalRange>,

    /// Next free local index.
    next_local: LocalIndex,
    /// Label counter.
    next_label: u32,
    /// Last line emitted.
    current_line: Option<u32>,
}

impl ProcedureBuilder {
    /// Create a builder for `owner.name`.
    pub fn new(owner: impl Into<Arc<str>>, name: impl Into<Arc<str>>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            kind: ProcedureKind::Plain,
            params: Vec::new(),
            returns: None,
            source_file: None,
            code: Vec::new(),
            regions: Vec::new(),
            local_ranges: Vec::new(),
            next_local: 0,
            next_label: 0,
            current_line: None,
        }
    }

    // =========================================================================
    // Signature
    // =========================================================================

    /// Set the driver kind.
    pub fn set_kind(&mut self, kind: ProcedureKind) {
        self.kind = kind;
    }

    /// Set the return type.
    pub fn set_returns(&mut self, returns: Option<ValueType>) {
        self.returns = returns;
    }

    /// Set the source file.
    pub fn set_source_file(&mut self, file: impl Into<Arc<str>>) {
        self.source_file = Some(file.into());
    }

    /// Append a parameter and return its local index.
    ///
    /// Parameters must be declared before any other local.
    pub fn add_param(&mut self, ty: ValueType) -> LocalIndex {
        debug_assert_eq!(
            self.next_local,
            self.params.iter().map(ValueType::width).sum::<u16>(),
            "parameters must precede locals"
        );
        let slot = self.next_local;
        self.next_local += ty.width();
        self.params.push(ty);
        slot
    }

    /// Allocate a fresh local of the given type.
    pub fn alloc_local(&mut self, ty: &ValueType) -> LocalIndex {
        let slot = self.next_local;
        self.next_local += ty.width();
        slot
    }

    /// Reserve `count` local indices without a type.
    pub fn reserve_locals(&mut self, count: u16) -> LocalIndex {
        let slot = self.next_local;
        self.next_local += count;
        slot
    }

    /// Record the debug range of a named local.
    pub fn add_local_range(&mut self, range: LocalRange) {
        self.local_ranges.push(range);
    }

    // =========================================================================
    // Labels and Regions
    // =========================================================================

    /// Create a new unbound label.
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Bind a label at the current position.
    pub fn bind_label(&mut self, label: Label) {
        self.code.push(Instruction::Label(label));
    }

    /// Mark the source line of the following instructions.
    ///
    /// Consecutive marks for the same line are collapsed.
    pub fn mark_line(&mut self, line: u32) {
        if self.current_line != Some(line) {
            self.current_line = Some(line);
            self.code.push(Instruction::Line(line));
        }
    }

    /// Append an exception region (lower priority than those already added).
    pub fn add_region(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<Arc<str>>,
    ) {
        self.regions.push(ExceptionRegion {
            start,
            end,
            handler,
            catch_type,
        });
    }

    // =========================================================================
    // Emission
    // =========================================================================

    /// Emit a raw instruction.
    #[inline]
    pub fn emit(&mut self, instruction: Instruction) {
        if let Instruction::Line(line) = instruction {
            self.mark_line(line);
            return;
        }
        self.code.push(instruction);
    }

    /// Emit a constant.
    #[inline]
    pub fn emit_const(&mut self, constant: Constant) {
        self.emit(Instruction::Const(constant));
    }

    /// Emit an int constant.
    #[inline]
    pub fn emit_int(&mut self, value: i32) {
        self.emit_const(Constant::Int(value));
    }

    /// Emit a local load.
    #[inline]
    pub fn emit_load(&mut self, slot: LocalIndex, kind: Kind) {
        self.emit(Instruction::Load { slot, kind });
    }

    /// Emit a local store.
    #[inline]
    pub fn emit_store(&mut self, slot: LocalIndex, kind: Kind) {
        self.emit(Instruction::Store { slot, kind });
    }

    /// Emit a binary operation.
    #[inline]
    pub fn emit_binary(&mut self, op: BinaryOp, kind: Kind) {
        self.emit(Instruction::Binary { op, kind });
    }

    /// Emit an unconditional jump.
    #[inline]
    pub fn emit_jump(&mut self, target: Label) {
        self.emit(Instruction::Jump(target));
    }

    /// Emit a compare-against-zero branch.
    #[inline]
    pub fn emit_branch(&mut self, cond: Condition, target: Label) {
        self.emit(Instruction::Branch { cond, target });
    }

    /// Emit a call.
    pub fn emit_invoke(
        &mut self,
        target: impl Into<Arc<str>>,
        argc: u16,
        returns: Option<ValueType>,
    ) {
        self.emit(Instruction::Invoke {
            target: target.into(),
            argc,
            returns,
        });
    }

    /// Emit a coroutine directive.
    #[inline]
    pub fn emit_directive(&mut self, directive: Directive) {
        self.emit(Instruction::Directive(directive));
    }

    /// Emit an intrinsic.
    #[inline]
    pub fn emit_intrinsic(&mut self, intrinsic: Intrinsic) {
        self.emit(Instruction::Intrinsic(intrinsic));
    }

    /// Emit `new class; dup; <message>; construct class/1; throw`.
    pub fn emit_throw_new(&mut self, class: impl Into<Arc<str>>, message: impl Into<Arc<str>>) {
        let class = class.into();
        self.emit(Instruction::New(Arc::clone(&class)));
        self.emit(Instruction::Dup);
        self.emit_const(Constant::Str(message.into()));
        self.emit(Instruction::Construct { class, argc: 1 });
        self.emit(Instruction::Throw);
    }

    /// Number of instructions emitted so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Returns true if nothing has been emitted.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Finish building and validate the procedure.
    pub fn finish(self) -> SpindleResult<Procedure> {
        let mut max_locals = self.next_local;
        for instruction in &self.code {
            let top = match instruction {
                Instruction::Load { slot, kind } | Instruction::Store { slot, kind } => {
                    slot.checked_add(kind.width())
                }
                Instruction::Increment { slot, .. } => slot.checked_add(1),
                _ => continue,
            };
            let top = top.ok_or_else(|| {
                SpindleError::build(
                    &Arc::from(format!("{}.{}", self.owner, self.name)),
                    "local index overflow",
                )
            })?;
            max_locals = max_locals.max(top);
        }

        let procedure = Procedure {
            owner: self.owner,
            name: self.name,
            kind: self.kind,
            params: self.params,
            returns: self.returns,
            code: self.code,
            regions: self.regions,
            local_ranges: self.local_ranges,
            max_locals,
            source_file: self.source_file,
        };
        procedure.validate()?;
        Ok(procedure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_then_locals() {
        let mut b = ProcedureBuilder::new("T", "p");
        assert_eq!(b.add_param(ValueType::Long), 0);
        assert_eq!(b.add_param(ValueType::Int), 2);
        assert_eq!(b.alloc_local(&ValueType::Double), 3);
        assert_eq!(b.alloc_local(&ValueType::object()), 5);
        b.emit(Instruction::Return);
        let p = b.finish().unwrap();
        assert_eq!(p.max_locals, 6);
        assert_eq!(p.params.len(), 2);
    }

    #[test]
    fn test_max_locals_from_code() {
        let mut b = ProcedureBuilder::new("T", "p");
        b.emit_int(1);
        b.emit(Instruction::Convert {
            from: Kind::Int,
            to: Kind::Long,
        });
        b.emit_store(7, Kind::Long);
        b.emit(Instruction::Return);
        let p = b.finish().unwrap();
        assert_eq!(p.max_locals, 9);
    }

    #[test]
    fn test_line_marks_collapse() {
        let mut b = ProcedureBuilder::new("T", "p");
        b.mark_line(3);
        b.mark_line(3);
        b.emit(Instruction::Line(3));
        b.mark_line(4);
        b.emit(Instruction::Return);
        let p = b.finish().unwrap();
        let lines = p
            .code
            .iter()
            .filter(|i| matches!(i, Instruction::Line(_)))
            .count();
        assert_eq!(lines, 2);
    }

    #[test]
    fn test_finish_rejects_unbound_label() {
        let mut b = ProcedureBuilder::new("T", "p");
        let target = b.new_label();
        b.emit_jump(target);
        assert!(b.finish().is_err());
    }

    #[test]
    fn test_throw_new_sequence() {
        let mut b = ProcedureBuilder::new("T", "p");
        b.emit_throw_new("Boom", "bad");
        let p = b.finish().unwrap();
        assert_eq!(p.code.len(), 5);
        assert_eq!(p.code[4], Instruction::Throw);
    }
}
