//! Generated state objects.
//!
//! The transformer turns one coroutine procedure into a state object
//! definition: captured arguments and pooled spill slots as fields, one
//! re-entrant step procedure, and a resume table mapping state ids to the
//! labels the step procedure's dispatcher jumps to.
//!
//! # Step Procedure Layout
//!
//! ```text
//! task step(state: int, is_error: int, value: Object)
//!   local 0   state id
//!   local 1   1 if `value` is an error delivered at resume
//!   local 2   resume value or error
//!   local 3   scratch (operand parked while the stack is spilled)
//!   local 4+  original locals
//!
//! generator step(state: int, error: Throwable)
//!   local 0   state id
//!   local 1   error delivered at resume, or null
//!   local 2   scratch
//!   local 3+  original locals
//! ```

use crate::bytecode::{
    FieldId, Label, LocalIndex, Procedure, ProcedureKind, SuspendKind, disassemble,
};
use spindle_core::types::{GENERATOR_CLASS, TASK_CLASS};
use spindle_core::{CoroutineMetadata, ValueType};
use std::fmt::{self, Write};
use std::sync::Arc;

/// Maximum number of suspend points in one procedure.
pub const MAX_RESUME_POINTS: usize = 65536;

// =============================================================================
// Step Layout
// =============================================================================

/// Reserved locals of a step procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepLayout {
    /// Local holding the state id.
    pub state: LocalIndex,
    /// Local holding the error flag (tasks only).
    pub error_flag: Option<LocalIndex>,
    /// Local holding the resume value or error.
    pub resume: LocalIndex,
    /// Scratch local for the suspension operand.
    pub scratch: LocalIndex,
    /// Offset added to every original local index.
    pub offset: LocalIndex,
}

impl StepLayout {
    /// Layout of task step procedures.
    pub const TASK: Self = Self {
        state: 0,
        error_flag: Some(1),
        resume: 2,
        scratch: 3,
        offset: 4,
    };

    /// Layout of generator step procedures.
    pub const GENERATOR: Self = Self {
        state: 0,
        error_flag: None,
        resume: 1,
        scratch: 2,
        offset: 3,
    };

    /// Layout for a coroutine kind.
    pub const fn for_kind(kind: ProcedureKind) -> Self {
        match kind {
            ProcedureKind::Generator => Self::GENERATOR,
            _ => Self::TASK,
        }
    }

    /// Parameter types of the step procedure.
    pub fn params(&self) -> Vec<ValueType> {
        match self.error_flag {
            Some(_) => vec![ValueType::Int, ValueType::Int, ValueType::object()],
            None => vec![ValueType::Int, ValueType::throwable()],
        }
    }
}

// =============================================================================
// Fields
// =============================================================================

/// Why a field exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    /// Captured argument `n`, fixed at construction.
    Argument(u16),
    /// Pooled spill slot.
    Spill,
}

/// A state-object field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Field id, equal to its position.
    pub id: FieldId,
    /// Field name.
    pub name: Arc<str>,
    /// Field type.
    pub ty: ValueType,
    /// Role.
    pub role: FieldRole,
}

// =============================================================================
// Resume Table
// =============================================================================

/// A genuine suspend point, as recorded in the resume table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePoint {
    /// State id (1-based).
    pub state: u32,
    /// Label the dispatcher jumps to.
    pub label: Label,
    /// Suspension kind.
    pub kind: SuspendKind,
    /// Source line of the suspend point.
    pub line: u32,
    /// Number of locals and stack entries persisted in fields.
    pub spilled: usize,
}

/// State id -> dispatch label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeTable {
    entry: Label,
    points: Vec<ResumePoint>,
}

impl ResumeTable {
    /// Table with only the entry state.
    pub fn new(entry: Label) -> Self {
        Self {
            entry,
            points: Vec::new(),
        }
    }

    /// Append the next suspend point and return its state id.
    pub fn add(&mut self, mut point: ResumePoint) -> u32 {
        let state = u32::try_from(self.points.len() + 1).unwrap_or(u32::MAX);
        point.state = state;
        self.points.push(point);
        state
    }

    /// Dispatch label for a state id.
    pub fn label(&self, state: u32) -> Option<Label> {
        if state == 0 {
            return Some(self.entry);
        }
        self.get(state).map(|p| p.label)
    }

    /// Suspend point for a state id (0 has none).
    pub fn get(&self, state: u32) -> Option<&ResumePoint> {
        let index = usize::try_from(state).ok()?.checked_sub(1)?;
        self.points.get(index)
    }

    /// Dispatch labels in state order, entry first.
    pub fn dispatch_labels(&self) -> Vec<Label> {
        std::iter::once(self.entry)
            .chain(self.points.iter().map(|p| p.label))
            .collect()
    }

    /// Genuine suspend points.
    pub fn points(&self) -> &[ResumePoint] {
        &self.points
    }

    /// Number of genuine suspend points.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns true if the procedure never suspends.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

// =============================================================================
// State Object Definition
// =============================================================================

/// Everything the runtime needs to instantiate and step a transformed
/// coroutine.
#[derive(Debug, Clone)]
pub struct StateObjectDef {
    /// Generated name, `Owner$name$Coro$N`.
    pub name: Arc<str>,
    /// Task or generator.
    pub kind: ProcedureKind,
    /// Arguments first, then spill slots.
    pub fields: Vec<FieldDef>,
    /// Re-entrant step procedure.
    pub step: Procedure,
    /// Reserved locals of `step`.
    pub layout: StepLayout,
    /// Resume dispatch table.
    pub resume_table: ResumeTable,
    /// Diagnostics.
    pub metadata: Arc<CoroutineMetadata>,
}

impl StateObjectDef {
    /// Number of captured arguments.
    pub fn argument_count(&self) -> usize {
        self.fields
            .iter()
            .filter(|f| matches!(f.role, FieldRole::Argument(_)))
            .count()
    }

    /// Spill fields.
    pub fn spill_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.role == FieldRole::Spill)
    }

    /// Field by id.
    pub fn field(&self, id: FieldId) -> Option<&FieldDef> {
        self.fields.get(id.index())
    }

    /// Class of the values launching this object produces.
    pub fn handle_class(&self) -> &'static str {
        match self.kind {
            ProcedureKind::Generator => GENERATOR_CLASS,
            _ => TASK_CLASS,
        }
    }

    /// Listing of fields, resume table and step procedure.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "state object {} ({self})", self.name);
        for field in &self.fields {
            let role = match field.role {
                FieldRole::Argument(i) => format!("arg {i}"),
                FieldRole::Spill => "spill".to_owned(),
            };
            let _ = writeln!(out, "  field {} {}: {} [{role}]", field.id, field.name, field.ty);
        }
        let labels = self.resume_table.dispatch_labels();
        for (state, label) in labels.iter().enumerate() {
            let _ = writeln!(out, "  state {state} -> {label}");
        }
        out.push_str(&disassemble(&self.step));
        out
    }
}

impl fmt::Display for StateObjectDef {
    /// `Task[Owner.name(int, long)]`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.handle_class(), self.metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_table_assigns_sequential_states() {
        let mut table = ResumeTable::new(Label(0));
        let point = |label| ResumePoint {
            state: 0,
            label: Label(label),
            kind: SuspendKind::Await,
            line: 0,
            spilled: 0,
        };
        assert_eq!(table.add(point(5)), 1);
        assert_eq!(table.add(point(7)), 2);
        assert_eq!(table.label(0), Some(Label(0)));
        assert_eq!(table.label(2), Some(Label(7)));
        assert_eq!(table.label(3), None);
        assert_eq!(table.dispatch_labels(), vec![Label(0), Label(5), Label(7)]);
    }

    #[test]
    fn test_layouts() {
        assert_eq!(StepLayout::for_kind(ProcedureKind::Task).offset, 4);
        assert_eq!(StepLayout::for_kind(ProcedureKind::Generator).offset, 3);
        assert_eq!(StepLayout::TASK.params().len(), 3);
        assert_eq!(StepLayout::GENERATOR.params().len(), 2);
    }
}
