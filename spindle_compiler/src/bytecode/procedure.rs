//! Procedures and their exception tables.

use super::instruction::{Instruction, Label, LocalIndex};
use rustc_hash::FxHashMap;
use spindle_core::{SpindleError, SpindleResult, ValueType};
use std::sync::Arc;

/// How a procedure is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProcedureKind {
    /// Ordinary procedure, called synchronously.
    #[default]
    Plain,
    /// Coroutine body producing a single result through a task.
    Task,
    /// Coroutine body producing a lazy sequence.
    Generator,
}

impl ProcedureKind {
    /// Returns true for task and generator bodies.
    #[inline]
    pub const fn is_coroutine(self) -> bool {
        matches!(self, Self::Task | Self::Generator)
    }
}

/// A protected region: exceptions escaping `[start, end)` transfer to
/// `handler` when they match `catch_type` (`None` catches everything).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRegion {
    /// First covered position.
    pub start: Label,
    /// First position past the region.
    pub end: Label,
    /// Handler entry.
    pub handler: Label,
    /// Caught class, `None` for catch-all.
    pub catch_type: Option<Arc<str>>,
}

/// Debug range of a named local binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRange {
    /// Binding name.
    pub name: Arc<str>,
    /// Local index.
    pub slot: LocalIndex,
    /// Declared type.
    pub ty: ValueType,
    /// Scope start.
    pub start: Label,
    /// Scope end.
    pub end: Label,
}

/// A procedure body.
#[derive(Debug, Clone, PartialEq)]
pub struct Procedure {
    /// Declaring entity.
    pub owner: Arc<str>,
    /// Procedure name.
    pub name: Arc<str>,
    /// Driver kind.
    pub kind: ProcedureKind,
    /// Parameter types; parameters occupy the first locals in order.
    pub params: Vec<ValueType>,
    /// Return type, `None` for void.
    pub returns: Option<ValueType>,
    /// Instruction stream.
    pub code: Vec<Instruction>,
    /// Exception table, in priority order.
    pub regions: Vec<ExceptionRegion>,
    /// Debug ranges of named locals.
    pub local_ranges: Vec<LocalRange>,
    /// Number of local indices used.
    pub max_locals: u16,
    /// Source file, when known.
    pub source_file: Option<Arc<str>>,
}

impl Procedure {
    /// `owner.name`.
    pub fn qualified_name(&self) -> Arc<str> {
        Arc::from(format!("{}.{}", self.owner, self.name))
    }

    /// Local index of each parameter.
    pub fn param_slots(&self) -> Vec<LocalIndex> {
        let mut slots = Vec::with_capacity(self.params.len());
        let mut next: LocalIndex = 0;
        for param in &self.params {
            slots.push(next);
            next += param.width();
        }
        slots
    }

    /// Number of local indices the parameters occupy.
    pub fn param_width(&self) -> u16 {
        self.params.iter().map(ValueType::width).sum()
    }

    /// Map from label to the index of its `Label` instruction.
    ///
    /// Fails if a label is bound twice.
    pub fn label_positions(&self) -> SpindleResult<FxHashMap<Label, usize>> {
        let mut positions = FxHashMap::default();
        for (index, instruction) in self.code.iter().enumerate() {
            if let Instruction::Label(label) = instruction {
                if positions.insert(*label, index).is_some() {
                    return Err(SpindleError::build(
                        &self.qualified_name(),
                        format!("label {label} bound twice"),
                    ));
                }
            }
        }
        Ok(positions)
    }

    /// Check that every referenced label is bound and every region is
    /// well-formed.
    pub fn validate(&self) -> SpindleResult<()> {
        let name = self.qualified_name();
        let positions = self.label_positions()?;
        let resolve = |label: Label| {
            positions
                .get(&label)
                .copied()
                .ok_or_else(|| SpindleError::build(&name, format!("label {label} is never bound")))
        };

        for instruction in &self.code {
            for target in instruction.jump_targets() {
                resolve(target)?;
            }
        }
        for (index, region) in self.regions.iter().enumerate() {
            let start = resolve(region.start)?;
            let end = resolve(region.end)?;
            resolve(region.handler)?;
            if end < start {
                return Err(SpindleError::region(
                    &name,
                    index,
                    format!("end {} precedes start {}", region.end, region.start),
                ));
            }
        }
        if self.param_width() > self.max_locals {
            return Err(SpindleError::build(
                &name,
                "parameters exceed max_locals",
            ));
        }
        Ok(())
    }
}
