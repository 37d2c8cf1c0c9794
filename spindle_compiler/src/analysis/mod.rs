//! Live-range analysis.
//!
//! Abstract interpretation of a procedure body. For every reachable
//! instruction the analyzer computes the [`Frame`] on entry: the type of every
//! local binding and operand-stack entry. Suspension codegen uses the frame at
//! each suspend point to decide what must be spilled and how it is restored.
//!
//! # Algorithm
//!
//! ```text
//! worklist = [0]                      frames[0] = entry frame (parameters)
//! while let Some(i) = worklist.pop():
//!     out = transfer(frames[i], code[i])
//!     for s in successors(i):          merge out into frames[s]
//!     for h in handlers covering i:    merge {locals, [exception]} into frames[h]
//!     (any target whose frame changed goes back on the worklist)
//! ```
//!
//! A merge that cannot reconcile two operand stacks is fatal: the procedure
//! violates the structural assumptions the transformer relies on.
//!
//! A second, backward pass computes local liveness so that bindings which are
//! occupied but never read again are not persisted across a suspend point.

mod frame;
mod liveness;
mod transfer;

pub use frame::{Frame, Slot};
pub use liveness::{LocalSet, Liveness};

use crate::bytecode::{Instruction, Label, LocalIndex, Procedure};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use spindle_core::{SpindleError, SpindleResult, ValueType};
use std::sync::Arc;
use transfer::Transfer;

// =============================================================================
// Snapshots
// =============================================================================

/// Content of an occupied local binding at a program point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveValue {
    /// The null literal.
    Null,
    /// An initialized value.
    Value(ValueType),
    /// An object of the class whose constructor has not run.
    Uninitialized {
        /// Class being constructed.
        class: Arc<str>,
        /// Index of the `New` that allocated it.
        site: usize,
    },
}

impl LiveValue {
    /// Type of the binding, `None` for the null literal.
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Self::Null => None,
            Self::Value(ty) => Some(ty.clone()),
            Self::Uninitialized { class, .. } => Some(ValueType::Reference(Arc::clone(class))),
        }
    }

    /// Returns false for placeholders under construction.
    pub fn is_initialized(&self) -> bool {
        !matches!(self, Self::Uninitialized { .. })
    }
}

/// An occupied local binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveLocal {
    /// Local index.
    pub index: LocalIndex,
    /// Content.
    pub value: LiveValue,
}

/// An operand-stack entry. Contiguous copies of one placeholder are grouped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackEntry {
    /// The null literal.
    Null,
    /// An initialized value.
    Regular(ValueType),
    /// `count` contiguous copies of one object under construction.
    Uninitialized {
        /// Class being constructed.
        class: Arc<str>,
        /// Index of the `New` that allocated it.
        site: usize,
        /// Number of contiguous copies.
        count: u16,
    },
}

impl StackEntry {
    /// Number of raw stack positions this entry covers.
    #[inline]
    pub fn positions(&self) -> usize {
        match self {
            Self::Uninitialized { count, .. } => usize::from(*count),
            _ => 1,
        }
    }
}

/// Occupied locals and stack at one program point.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Snapshot {
    /// Occupied locals in index order.
    pub locals: Vec<LiveLocal>,
    /// Stack entries, bottom first.
    pub stack: Vec<StackEntry>,
}

impl Snapshot {
    /// Number of raw operand-stack positions.
    pub fn stack_height(&self) -> usize {
        self.stack.iter().map(StackEntry::positions).sum()
    }
}

// =============================================================================
// Analysis
// =============================================================================

/// Result of analyzing one procedure.
#[derive(Debug, Clone)]
pub struct Analysis {
    frames: Vec<Option<Frame>>,
    liveness: Option<Liveness>,
}

impl Analysis {
    /// Entry frame of instruction `index`, `None` if unreachable.
    #[inline]
    pub fn frame(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index).and_then(Option::as_ref)
    }

    /// Returns true if some path reaches instruction `index`.
    #[inline]
    pub fn is_reachable(&self, index: usize) -> bool {
        self.frame(index).is_some()
    }

    /// Liveness results, when computed.
    #[inline]
    pub fn liveness(&self) -> Option<&Liveness> {
        self.liveness.as_ref()
    }

    /// Occupied locals and stack before instruction `index`.
    ///
    /// When liveness was computed, locals that are never read again are left
    /// out.
    pub fn snapshot(&self, index: usize) -> Option<Snapshot> {
        let frame = self.frame(index)?;
        let live = self.liveness.as_ref().and_then(|l| l.live_in(index));

        let mut locals = Vec::new();
        for (i, slot) in frame.locals.iter().enumerate() {
            let Ok(local) = LocalIndex::try_from(i) else {
                break;
            };
            if live.is_some_and(|set| !set.contains(local)) {
                continue;
            }
            let value = match slot {
                Slot::Top => continue,
                Slot::Null => LiveValue::Null,
                Slot::Value(ty) => LiveValue::Value(ty.clone()),
                Slot::Uninit { class, site } => LiveValue::Uninitialized {
                    class: Arc::clone(class),
                    site: *site,
                },
            };
            locals.push(LiveLocal {
                index: local,
                value,
            });
        }

        let mut stack: Vec<StackEntry> = Vec::new();
        let mut last_site = None;
        for slot in &frame.stack {
            match slot {
                Slot::Uninit { class, site } => {
                    if last_site == Some(*site) {
                        if let Some(StackEntry::Uninitialized { count, .. }) = stack.last_mut() {
                            *count += 1;
                            continue;
                        }
                    }
                    last_site = Some(*site);
                    stack.push(StackEntry::Uninitialized {
                        class: Arc::clone(class),
                        site: *site,
                        count: 1,
                    });
                    continue;
                }
                // Loads reject `Top`, so it never reaches the stack.
                Slot::Null | Slot::Top => stack.push(StackEntry::Null),
                Slot::Value(ty) => stack.push(StackEntry::Regular(ty.clone())),
            }
            last_site = None;
        }

        Some(Snapshot { locals, stack })
    }
}

// =============================================================================
// Analyzer
// =============================================================================

struct ResolvedRegion {
    start: usize,
    end: usize,
    handler: usize,
    catch: ValueType,
}

/// Forward type analysis with optional backward liveness.
pub struct Analyzer<'p> {
    procedure: &'p Procedure,
    name: Arc<str>,
    labels: FxHashMap<Label, usize>,
    regions: Vec<ResolvedRegion>,
    prune_dead_locals: bool,
}

impl<'p> Analyzer<'p> {
    /// Prepare an analyzer for `procedure`.
    pub fn new(procedure: &'p Procedure) -> SpindleResult<Self> {
        let name = procedure.qualified_name();
        let labels = procedure.label_positions()?;
        let resolve = |label: Label| {
            labels
                .get(&label)
                .copied()
                .ok_or_else(|| SpindleError::build(&name, format!("label {label} is never bound")))
        };
        let mut regions = Vec::with_capacity(procedure.regions.len());
        for region in &procedure.regions {
            regions.push(ResolvedRegion {
                start: resolve(region.start)?,
                end: resolve(region.end)?,
                handler: resolve(region.handler)?,
                catch: region
                    .catch_type
                    .as_ref()
                    .map_or_else(ValueType::throwable, |c| ValueType::Reference(Arc::clone(c))),
            });
        }
        Ok(Self {
            procedure,
            name,
            labels,
            regions,
            prune_dead_locals: true,
        })
    }

    /// Whether to drop occupied-but-dead locals from snapshots.
    #[must_use]
    pub fn prune_dead_locals(mut self, prune: bool) -> Self {
        self.prune_dead_locals = prune;
        self
    }

    fn target(&self, label: Label) -> SpindleResult<usize> {
        self.labels
            .get(&label)
            .copied()
            .ok_or_else(|| SpindleError::build(&self.name, format!("label {label} is never bound")))
    }

    /// Normal-flow successors of instruction `index`.
    fn successors(&self, index: usize) -> SpindleResult<SmallVec<[usize; 4]>> {
        let code = &self.procedure.code;
        let instruction = &code[index];
        let mut out = SmallVec::new();
        for label in instruction.jump_targets() {
            out.push(self.target(label)?);
        }
        if !instruction.is_terminal() {
            if index + 1 >= code.len() {
                return Err(SpindleError::verify(
                    &self.name,
                    index,
                    "control falls off the end of the procedure",
                ));
            }
            out.push(index + 1);
        }
        Ok(out)
    }

    /// Handlers whose region covers instruction `index`.
    fn handlers(&self, index: usize) -> impl Iterator<Item = &ResolvedRegion> {
        self.regions
            .iter()
            .filter(move |r| r.start <= index && index < r.end)
    }

    /// Run the analysis.
    pub fn run(self) -> SpindleResult<Analysis> {
        let code = &self.procedure.code;
        if code.is_empty() {
            return Err(SpindleError::verify(&self.name, 0, "empty procedure"));
        }

        let transfer = Transfer {
            procedure: &self.name,
        };
        let mut frames: Vec<Option<Frame>> = vec![None; code.len()];
        frames[0] = Some(Frame::entry(&self.procedure.params, self.procedure.max_locals));
        let mut worklist = vec![0usize];

        while let Some(index) = worklist.pop() {
            let Some(before) = frames[index].clone() else {
                continue;
            };
            let mut after = before.clone();
            transfer.apply(&mut after, &code[index], index)?;

            if !code[index].is_pseudo() {
                let handler_frames: Vec<(usize, Frame)> = self
                    .handlers(index)
                    .map(|region| {
                        let locals = Frame::join_locals(&before.locals, &after.locals);
                        (region.handler, Frame::handler(locals, region.catch.clone()))
                    })
                    .collect();
                for (handler, frame) in handler_frames {
                    self.flow(&mut frames, &mut worklist, handler, frame)?;
                }
            }

            for succ in self.successors(index)? {
                self.flow(&mut frames, &mut worklist, succ, after.clone())?;
            }
        }

        let liveness = if self.prune_dead_locals {
            let mut edges = Vec::with_capacity(code.len());
            for index in 0..code.len() {
                let mut succ = if frames[index].is_some() {
                    self.successors(index)?
                } else {
                    SmallVec::new()
                };
                if !code[index].is_pseudo() {
                    succ.extend(self.handlers(index).map(|r| r.handler));
                }
                edges.push(succ);
            }
            Some(Liveness::compute(code, &edges))
        } else {
            None
        };

        tracing::trace!(
            procedure = %self.name,
            reachable = frames.iter().filter(|f| f.is_some()).count(),
            total = code.len(),
            "analysis complete"
        );
        Ok(Analysis { frames, liveness })
    }

    fn flow(
        &self,
        frames: &mut [Option<Frame>],
        worklist: &mut Vec<usize>,
        target: usize,
        incoming: Frame,
    ) -> SpindleResult<()> {
        match &mut frames[target] {
            Some(existing) => {
                if existing.merge(&incoming, &self.name, target)? {
                    worklist.push(target);
                }
            }
            slot @ None => {
                *slot = Some(incoming);
                worklist.push(target);
            }
        }
        Ok(())
    }
}

/// Analyze `procedure` with dead-local pruning enabled.
pub fn analyze(procedure: &Procedure) -> SpindleResult<Analysis> {
    Analyzer::new(procedure)?.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{
        BinaryOp, Condition, Constant, Directive, ProcedureBuilder, ProcedureKind,
    };
    use spindle_core::Kind;

    // ════════════════════════════════════════════════════════════════════════
    // Helpers
    // ════════════════════════════════════════════════════════════════════════

    fn await_index(procedure: &Procedure) -> usize {
        procedure
            .code
            .iter()
            .position(|i| matches!(i, Instruction::Directive(Directive::Await)))
            .unwrap()
    }

    // ════════════════════════════════════════════════════════════════════════
    // Frames
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_snapshot_at_await_lists_locals_and_stack() {
        let mut b = ProcedureBuilder::new("T", "p");
        b.set_kind(ProcedureKind::Task);
        let x = b.add_param(ValueType::Int);
        let big = b.alloc_local(&ValueType::Long);
        b.emit_const(Constant::Long(5));
        b.emit_store(big, Kind::Long);
        b.emit_load(x, Kind::Int);
        b.emit_const(Constant::Null);
        b.emit(Instruction::Directive(Directive::Await));
        b.emit(Instruction::Pop);
        b.emit(Instruction::Pop);
        b.emit_load(big, Kind::Long);
        b.emit(Instruction::Pop);
        b.emit(Instruction::Return);
        let p = b.finish().unwrap();

        let analysis = analyze(&p).unwrap();
        let snapshot = analysis.snapshot(await_index(&p)).unwrap();
        // `x` is occupied but never read again.
        assert_eq!(
            snapshot.locals,
            vec![LiveLocal {
                index: big,
                value: LiveValue::Value(ValueType::Long)
            }]
        );
        assert_eq!(
            snapshot.stack,
            vec![StackEntry::Regular(ValueType::Int), StackEntry::Null]
        );
    }

    #[test]
    fn test_without_pruning_all_occupied_locals_are_listed() {
        let mut b = ProcedureBuilder::new("T", "p");
        let x = b.add_param(ValueType::Int);
        let y = b.add_param(ValueType::object());
        b.emit_load(y, Kind::Ref);
        b.emit(Instruction::Directive(Directive::Await));
        b.emit(Instruction::Pop);
        b.emit(Instruction::Return);
        let p = b.finish().unwrap();

        let analysis = Analyzer::new(&p)
            .unwrap()
            .prune_dead_locals(false)
            .run()
            .unwrap();
        let snapshot = analysis.snapshot(await_index(&p)).unwrap();
        let indices: Vec<_> = snapshot.locals.iter().map(|l| l.index).collect();
        assert_eq!(indices, vec![x, y]);
        assert!(analysis.liveness().is_none());
    }

    #[test]
    fn test_uninitialized_copies_are_grouped() {
        let mut b = ProcedureBuilder::new("T", "p");
        let t = b.add_param(ValueType::reference("Task"));
        b.emit(Instruction::New(Arc::from("Box")));
        b.emit(Instruction::Dup);
        b.emit_load(t, Kind::Ref);
        b.emit(Instruction::Directive(Directive::Await));
        b.emit(Instruction::Construct {
            class: Arc::from("Box"),
            argc: 1,
        });
        b.emit(Instruction::Pop);
        b.emit(Instruction::Return);
        let p = b.finish().unwrap();

        let analysis = analyze(&p).unwrap();
        let snapshot = analysis.snapshot(await_index(&p)).unwrap();
        assert_eq!(
            snapshot.stack,
            vec![
                StackEntry::Uninitialized {
                    class: Arc::from("Box"),
                    site: 0,
                    count: 2
                },
                StackEntry::Regular(ValueType::reference("Task")),
            ]
        );
        assert_eq!(snapshot.stack_height(), 3);
    }

    // ════════════════════════════════════════════════════════════════════════
    // Joins
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_branch_join_merges_reference_types() {
        let mut b = ProcedureBuilder::new("T", "p");
        let flag = b.add_param(ValueType::Int);
        let out = b.alloc_local(&ValueType::object());
        let other = b.new_label();
        let join = b.new_label();
        b.emit_load(flag, Kind::Int);
        b.emit_branch(Condition::Eq, other);
        b.emit_invoke("makeA", 0, Some(ValueType::reference("A")));
        b.emit_store(out, Kind::Ref);
        b.emit_jump(join);
        b.bind_label(other);
        b.emit_invoke("makeB", 0, Some(ValueType::reference("B")));
        b.emit_store(out, Kind::Ref);
        b.bind_label(join);
        b.emit_load(out, Kind::Ref);
        b.emit(Instruction::ReturnValue(Kind::Ref));
        let p = b.finish().unwrap();

        let join_index = p
            .code
            .iter()
            .position(|i| *i == Instruction::Label(join))
            .unwrap();
        let analysis = analyze(&p).unwrap();
        let frame = analysis.frame(join_index).unwrap();
        assert_eq!(frame.locals[usize::from(out)], Slot::Value(ValueType::object()));
    }

    #[test]
    fn test_stack_mismatch_at_join_is_fatal() {
        let mut b = ProcedureBuilder::new("T", "p");
        let flag = b.add_param(ValueType::Int);
        let join = b.new_label();
        b.emit_int(1);
        b.emit_load(flag, Kind::Int);
        b.emit_branch(Condition::Eq, join);
        b.emit_int(2);
        b.bind_label(join);
        b.emit(Instruction::Return);
        let p = b.finish().unwrap();

        assert!(matches!(analyze(&p), Err(SpindleError::Merge { .. })));
    }

    #[test]
    fn test_falling_off_the_end_is_rejected() {
        let mut b = ProcedureBuilder::new("T", "p");
        b.emit_int(1);
        b.emit(Instruction::Pop);
        let p = b.finish().unwrap();
        assert!(matches!(analyze(&p), Err(SpindleError::Verify { .. })));
    }

    // ════════════════════════════════════════════════════════════════════════
    // Exception Edges
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_handler_sees_exception_and_locals() {
        let mut b = ProcedureBuilder::new("T", "p");
        let x = b.add_param(ValueType::Int);
        let start = b.new_label();
        let end = b.new_label();
        let handler = b.new_label();
        b.bind_label(start);
        b.emit_load(x, Kind::Int);
        b.emit_int(0);
        b.emit_binary(BinaryOp::Div, Kind::Int);
        b.emit(Instruction::ReturnValue(Kind::Int));
        b.bind_label(end);
        b.bind_label(handler);
        b.emit(Instruction::Pop);
        b.emit_load(x, Kind::Int);
        b.emit(Instruction::ReturnValue(Kind::Int));
        b.add_region(start, end, handler, Some(Arc::from("ArithmeticException")));
        let p = b.finish().unwrap();

        let handler_index = p
            .code
            .iter()
            .position(|i| *i == Instruction::Label(handler))
            .unwrap();
        let analysis = analyze(&p).unwrap();
        let frame = analysis.frame(handler_index).unwrap();
        assert_eq!(
            frame.stack,
            vec![Slot::Value(ValueType::reference("ArithmeticException"))]
        );
        assert_eq!(frame.locals[0], Slot::Value(ValueType::Int));

        // The handler reads `x`, so it is live inside the region.
        let liveness = analysis.liveness().unwrap();
        let div = p
            .code
            .iter()
            .position(|i| matches!(i, Instruction::Binary { .. }))
            .unwrap();
        assert!(liveness.live_in(div).unwrap().contains(x));
    }

    #[test]
    fn test_unreachable_code_has_no_frame() {
        let mut b = ProcedureBuilder::new("T", "p");
        b.emit(Instruction::Return);
        b.emit_int(1);
        b.emit(Instruction::ReturnValue(Kind::Int));
        let p = b.finish().unwrap();
        let analysis = analyze(&p).unwrap();
        assert!(analysis.is_reachable(0));
        assert!(!analysis.is_reachable(1));
        assert!(analysis.snapshot(1).is_none());
    }
}
