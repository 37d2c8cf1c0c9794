//! Suspension codegen.
//!
//! Rewrites a coroutine body into the re-entrant step procedure of its state
//! object. The output has this shape:
//!
//! ```text
//! top:        iload state
//!             tableswitch 0 [entry, resume1, ..., resumeN] default invalid
//! invalid:    throw IllegalStateException
//! entry:      %getfield arg_i ; store local_i + K     (for each parameter)
//!             <original body, locals shifted by K>
//!
//!   at every suspend point k:
//! suspend_k:  spill live locals        -> fields
//!             park operand in scratch, spill stack top-down, reload operand
//!             %suspend kind -> k
//!             return
//! resume_k:   restore locals           <- fields
//!             restore stack bottom-up  <- fields / null / new+dup
//!             rethrow the resume error, if any
//!             push the resume value    (await only)
//!
//! catcher:    %complete_error ; return                (tasks only)
//! ```
//!
//! Null and uninitialized entries are not spilled: restoring them re-issues
//! the `null` constant, or `new` followed by one `dup` per extra copy. All
//! copies of one placeholder, in locals and on the stack, come from a single
//! `new`, so the constructor call after resume initializes every one of them.

use super::allocator::{Occupancy, SlotPool};
use super::regions::RegionSplitter;
use super::state_object::{ResumePoint, ResumeTable, StepLayout};
use crate::analysis::{Analysis, LiveValue, Snapshot, StackEntry};
use crate::bytecode::{
    Condition, Constant, Directive, FieldId, Instruction, Intrinsic, Label, LocalIndex,
    LocalRange, Procedure, ProcedureBuilder, ProcedureKind, SuspendKind,
};
use rustc_hash::FxHashMap;
use spindle_core::types::ILLEGAL_STATE_CLASS;
use spindle_core::{Kind, SpindleError, SpindleResult, ValueType};
use std::sync::Arc;

// =============================================================================
// Suspend Points
// =============================================================================

/// A designated suspend operation in the original body.
#[derive(Debug, Clone)]
pub struct SuspendPoint {
    /// State id (1-based; 0 is the entry).
    pub state: u32,
    /// Instruction index of the directive.
    pub index: usize,
    /// Suspension kind.
    pub kind: SuspendKind,
    /// Source line of the directive.
    pub line: u32,
    /// Live locals and stack before the directive.
    pub snapshot: Snapshot,
    /// Output label where the spill code starts.
    pub suspend_label: Label,
    /// Output label where the restore code starts.
    pub resume_label: Label,
}

/// How one value is persisted across a suspension.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Save {
    /// Copied into a pooled field.
    Field { field: FieldId, ty: ValueType },
    /// Re-synthesized as the null literal.
    Null,
    /// Re-synthesized as `count` copies of the placeholder allocated at
    /// `site`.
    Uninit {
        class: Arc<str>,
        site: usize,
        count: u16,
    },
}

/// Save actions for one suspend point.
#[derive(Debug, Default)]
struct SpillPlan {
    /// Locals in index order.
    locals: Vec<(LocalIndex, Save)>,
    /// Stack entries below the operand, bottom first.
    stack: Vec<Save>,
}

impl SpillPlan {
    fn spilled(&self) -> usize {
        self.locals
            .iter()
            .map(|(_, save)| save)
            .chain(&self.stack)
            .filter(|save| matches!(save, Save::Field { .. }))
            .count()
    }
}

// =============================================================================
// Label Cloning
// =============================================================================

/// Maps every label of the original body to a fresh output label.
struct LabelCloner {
    map: FxHashMap<Label, Label>,
}

impl LabelCloner {
    fn new(procedure: &Procedure, builder: &mut ProcedureBuilder) -> Self {
        let mut map = FxHashMap::default();
        for instruction in &procedure.code {
            if let Instruction::Label(label) = instruction {
                map.entry(*label).or_insert_with(|| builder.new_label());
            }
        }
        Self { map }
    }

    /// Output label for an original label. Every referenced label is bound
    /// in a validated procedure, so the fallback is never taken.
    fn get(&self, label: Label) -> Label {
        self.map.get(&label).copied().unwrap_or(label)
    }
}

// =============================================================================
// Generated Code
// =============================================================================

/// Output of codegen for one procedure.
#[derive(Debug)]
pub struct GeneratedStep {
    /// The re-entrant step procedure.
    pub step: Procedure,
    /// Spill slot pool.
    pub pool: SlotPool,
    /// Resume dispatch table.
    pub resume_table: ResumeTable,
    /// Source line of every genuine suspend point, in state order.
    pub suspend_lines: Vec<u32>,
}

/// Generates the step procedure of one coroutine.
pub struct SuspensionCodegen<'a> {
    procedure: &'a Procedure,
    analysis: &'a Analysis,
    name: Arc<str>,
    layout: StepLayout,
    builder: ProcedureBuilder,
    labels: LabelCloner,
    pool: SlotPool,
    splitter: RegionSplitter,
    points: Vec<SuspendPoint>,
    point_at: FxHashMap<usize, usize>,
}

impl<'a> SuspensionCodegen<'a> {
    /// Prepare codegen for `procedure`, which must be a task or generator
    /// body that `analysis` was computed for.
    pub fn new(
        procedure: &'a Procedure,
        analysis: &'a Analysis,
        object_name: &Arc<str>,
    ) -> SpindleResult<Self> {
        let name = procedure.qualified_name();
        if !procedure.kind.is_coroutine() {
            return Err(SpindleError::structural(
                &name,
                "only task and generator procedures can be transformed",
            ));
        }
        procedure.validate()?;

        let layout = StepLayout::for_kind(procedure.kind);
        let mut builder = ProcedureBuilder::new(Arc::clone(object_name), "step");
        for param in layout.params() {
            builder.add_param(param);
        }
        builder.reserve_locals(layout.offset - builder_width(&layout));
        builder.reserve_locals(procedure.max_locals);
        if let Some(file) = &procedure.source_file {
            builder.set_source_file(Arc::clone(file));
        }

        let labels = LabelCloner::new(procedure, &mut builder);
        let argc = u16::try_from(procedure.params.len()).map_err(|_| {
            SpindleError::structural(&name, "too many parameters")
        })?;

        let mut codegen = Self {
            procedure,
            analysis,
            name: Arc::clone(&name),
            layout,
            builder,
            labels,
            pool: SlotPool::with_base(argc),
            splitter: RegionSplitter::new(name, &procedure.regions),
            points: Vec::new(),
            point_at: FxHashMap::default(),
        };
        codegen.collect_suspend_points()?;
        Ok(codegen)
    }

    /// Suspend points discovered in the body.
    pub fn suspend_points(&self) -> &[SuspendPoint] {
        &self.points
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    fn collect_suspend_points(&mut self) -> SpindleResult<()> {
        let is_task = self.procedure.kind == ProcedureKind::Task;
        let mut line = 0u32;
        for (index, instruction) in self.procedure.code.iter().enumerate() {
            let directive = match instruction {
                Instruction::Line(l) => {
                    line = *l;
                    continue;
                }
                Instruction::Intrinsic(_) => {
                    return Err(SpindleError::structural(
                        &self.name,
                        format!("intrinsic in source body at #{index}"),
                    ));
                }
                Instruction::Directive(d) => d,
                _ => continue,
            };

            let kind = match directive {
                Directive::Await if is_task => SuspendKind::Await,
                Directive::Yield if !is_task => SuspendKind::Yield,
                Directive::YieldAll if !is_task => SuspendKind::YieldAll,
                Directive::Ret { .. } => continue,
                Directive::CurrentExecutor if is_task => continue,
                other => {
                    let owner = if is_task { "task" } else { "generator" };
                    return Err(SpindleError::structural(
                        &self.name,
                        format!("{other:?} is not allowed in a {owner} body (#{index})"),
                    ));
                }
            };

            let Some(snapshot) = self.analysis.snapshot(index) else {
                continue;
            };
            let state = u32::try_from(self.points.len() + 1).map_err(|_| {
                SpindleError::structural(&self.name, "too many suspend points")
            })?;
            let suspend_label = self.builder.new_label();
            let resume_label = self.builder.new_label();
            self.point_at.insert(index, self.points.len());
            self.points.push(SuspendPoint {
                state,
                index,
                kind,
                line,
                snapshot,
                suspend_label,
                resume_label,
            });
        }
        if self.points.len() > super::state_object::MAX_RESUME_POINTS {
            return Err(SpindleError::structural(&self.name, "too many suspend points"));
        }
        Ok(())
    }

    // =========================================================================
    // Emission
    // =========================================================================

    /// Generate the step procedure.
    pub fn generate(mut self) -> SpindleResult<GeneratedStep> {
        let top = self.builder.new_label();
        let invalid = self.builder.new_label();
        let entry = self.builder.new_label();
        let catcher = self.builder.new_label();

        let mut resume_table = ResumeTable::new(entry);
        let mut plans = Vec::with_capacity(self.points.len());
        for point in &self.points {
            let plan = plan_spills(&self.name, point, &mut self.pool)?;
            resume_table.add(ResumePoint {
                state: point.state,
                label: point.resume_label,
                kind: point.kind,
                line: point.line,
                spilled: plan.spilled(),
            });
            plans.push(plan);
        }

        // Dispatcher.
        self.builder.bind_label(top);
        self.builder.emit_load(self.layout.state, Kind::Int);
        self.builder.emit(Instruction::TableSwitch {
            low: 0,
            default: invalid,
            targets: resume_table.dispatch_labels(),
        });
        self.builder.bind_label(invalid);
        self.builder
            .emit_throw_new(ILLEGAL_STATE_CLASS, "invalid resume state");

        // State 0: unpack captured arguments.
        self.builder.bind_label(entry);
        let slots = self.procedure.param_slots();
        for (i, (ty, slot)) in self.procedure.params.iter().zip(slots).enumerate() {
            let field = FieldId(u16::try_from(i).unwrap_or(u16::MAX));
            self.builder.emit_intrinsic(Intrinsic::GetField {
                field,
                ty: ty.clone(),
            });
            self.builder
                .emit_store(slot + self.layout.offset, ty.kind());
        }

        self.emit_body(&plans)?;

        let is_task = self.procedure.kind == ProcedureKind::Task;
        if is_task {
            self.builder.bind_label(catcher);
            self.builder.emit_intrinsic(Intrinsic::CompleteError);
            self.builder.emit(Instruction::Return);
        }

        let labels = &self.labels;
        let regions = self.splitter.finish(|l| labels.get(l))?;
        for region in regions {
            self.builder
                .add_region(region.start, region.end, region.handler, region.catch_type);
        }
        if is_task {
            self.builder.add_region(top, catcher, catcher, None);
        }

        for range in &self.procedure.local_ranges {
            self.builder.add_local_range(LocalRange {
                name: Arc::clone(&range.name),
                slot: range.slot + self.layout.offset,
                ty: range.ty.clone(),
                start: self.labels.get(range.start),
                end: self.labels.get(range.end),
            });
        }

        let suspend_lines = self.points.iter().map(|p| p.line).collect();
        Ok(GeneratedStep {
            step: self.builder.finish()?,
            pool: self.pool,
            resume_table,
            suspend_lines,
        })
    }

    fn emit_body(&mut self, plans: &[SpillPlan]) -> SpindleResult<()> {
        let procedure = self.procedure;
        let offset = self.layout.offset;
        // Set after a ret directive; the return that consumes its marker is dropped.
        let mut skip_return = false;

        for (index, instruction) in procedure.code.iter().enumerate() {
            if skip_return && *instruction == Instruction::ReturnValue(Kind::Ref) {
                skip_return = false;
                continue;
            }

            match instruction {
                Instruction::Label(label) => {
                    let emitted = self.labels.get(*label);
                    self.builder.bind_label(emitted);
                    self.splitter.on_label(*label, emitted)?;
                }
                Instruction::Line(line) => self.builder.mark_line(*line),
                Instruction::Directive(Directive::Ret { with_value }) => {
                    self.check_ret(index)?;
                    if self.analysis.is_reachable(index) {
                        self.emit_ret(*with_value);
                    } else {
                        self.builder.emit(Instruction::Nop);
                    }
                    skip_return = true;
                }
                Instruction::Directive(Directive::CurrentExecutor) => {
                    self.builder
                        .emit_intrinsic(Intrinsic::CurrentExecutor);
                }
                Instruction::Directive(_) => match self.point_at.get(&index) {
                    Some(&point) => self.emit_suspend(point, &plans[point]),
                    None => self.builder.emit(Instruction::Nop),
                },
                Instruction::Return | Instruction::ReturnValue(_)
                    if self.analysis.is_reachable(index) =>
                {
                    return Err(SpindleError::structural(
                        &self.name,
                        format!("coroutine body returns without the ret directive (#{index})"),
                    ));
                }
                other => {
                    let labels = &self.labels;
                    let rewritten = other.offset_locals(offset).map_labels(|l| labels.get(l));
                    self.builder.emit(rewritten);
                }
            }
        }
        Ok(())
    }

    /// The ret directive must be returned immediately.
    fn check_ret(&self, index: usize) -> SpindleResult<()> {
        let next = self.procedure.code[index + 1..]
            .iter()
            .find(|i| !matches!(i, Instruction::Line(_)));
        match next {
            Some(Instruction::ReturnValue(Kind::Ref)) => Ok(()),
            _ => Err(SpindleError::structural(
                &self.name,
                format!("ret directive at #{index} is not the direct subject of a return"),
            )),
        }
    }

    fn emit_ret(&mut self, with_value: bool) {
        match self.procedure.kind {
            ProcedureKind::Generator => {
                if with_value {
                    self.builder.emit(Instruction::Pop);
                }
            }
            _ => {
                if !with_value {
                    self.builder.emit_const(Constant::Null);
                }
                self.builder.emit_intrinsic(Intrinsic::Complete);
            }
        }
        self.builder.emit(Instruction::Return);
    }

    fn emit_suspend(&mut self, point_index: usize, plan: &SpillPlan) {
        let offset = self.layout.offset;
        let scratch = self.layout.scratch;
        let point = &self.points[point_index];
        let (state, kind) = (point.state, point.kind);
        let (suspend_label, resume_label) = (point.suspend_label, point.resume_label);

        self.builder.bind_label(suspend_label);
        self.splitter.on_suspend(suspend_label, resume_label);

        // Save: locals, then the stack beneath the operand, top-down.
        for (index, save) in &plan.locals {
            if let Save::Field { field, ty } = save {
                self.builder.emit_load(index + offset, ty.kind());
                self.builder.emit_intrinsic(Intrinsic::PutField {
                    field: *field,
                    ty: ty.clone(),
                });
            }
        }
        if !plan.stack.is_empty() {
            self.builder.emit_store(scratch, Kind::Ref);
            for save in plan.stack.iter().rev() {
                match save {
                    Save::Field { field, ty } => {
                        self.builder.emit_intrinsic(Intrinsic::PutField {
                            field: *field,
                            ty: ty.clone(),
                        });
                    }
                    Save::Null => self.builder.emit(Instruction::Pop),
                    Save::Uninit { count, .. } => {
                        for _ in 0..*count {
                            self.builder.emit(Instruction::Pop);
                        }
                    }
                }
            }
            self.builder.emit_load(scratch, Kind::Ref);
        }
        self.builder
            .emit_intrinsic(Intrinsic::Suspend { kind, state });
        self.builder.emit(Instruction::Return);

        // Restore: locals in order, then the stack bottom-up. The first copy
        // of a placeholder held in a local is the one later copies load.
        self.builder.bind_label(resume_label);
        let mut holders: FxHashMap<usize, LocalIndex> = FxHashMap::default();
        for (index, save) in &plan.locals {
            let slot = index + offset;
            match save {
                Save::Field { field, ty } => {
                    self.builder.emit_intrinsic(Intrinsic::GetField {
                        field: *field,
                        ty: ty.clone(),
                    });
                    self.builder.emit_store(slot, ty.kind());
                }
                Save::Null => {
                    self.builder.emit_const(Constant::Null);
                    self.builder.emit_store(slot, Kind::Ref);
                }
                Save::Uninit { class, site, .. } => {
                    match holders.get(site) {
                        Some(&holder) => self.builder.emit_load(holder, Kind::Ref),
                        None => {
                            self.builder.emit(Instruction::New(Arc::clone(class)));
                            holders.insert(*site, slot);
                        }
                    }
                    self.builder.emit_store(slot, Kind::Ref);
                }
            }
        }
        for save in &plan.stack {
            match save {
                Save::Field { field, ty } => {
                    self.builder.emit_intrinsic(Intrinsic::GetField {
                        field: *field,
                        ty: ty.clone(),
                    });
                }
                Save::Null => self.builder.emit_const(Constant::Null),
                Save::Uninit { class, site, count } => {
                    match holders.get(site) {
                        Some(&holder) => self.builder.emit_load(holder, Kind::Ref),
                        None => self.builder.emit(Instruction::New(Arc::clone(class))),
                    }
                    for _ in 1..*count {
                        self.builder.emit(Instruction::Dup);
                    }
                }
            }
        }

        // Rethrow an error delivered at resume.
        let proceed = self.builder.new_label();
        match self.layout.error_flag {
            Some(flag) => {
                self.builder.emit_load(flag, Kind::Int);
                self.builder.emit_branch(Condition::Eq, proceed);
            }
            None => {
                self.builder.emit_load(self.layout.resume, Kind::Ref);
                self.builder.emit(Instruction::BranchNull {
                    is_null: true,
                    target: proceed,
                });
            }
        }
        self.builder.emit_load(self.layout.resume, Kind::Ref);
        self.builder.emit(Instruction::Throw);
        self.builder.bind_label(proceed);

        if kind == SuspendKind::Await {
            self.builder.emit_load(self.layout.resume, Kind::Ref);
        }
    }
}

/// Local indices taken by the step procedure's parameters.
fn builder_width(layout: &StepLayout) -> u16 {
    layout.params().iter().map(ValueType::width).sum()
}

/// Decide how every live value at a suspend point is persisted, claiming
/// pooled slots for the ones copied into fields.
///
/// A placeholder whose stack copies are not contiguous can only be rebuilt
/// if a local also holds it.
fn plan_spills(
    name: &Arc<str>,
    point: &SuspendPoint,
    pool: &mut SlotPool,
) -> SpindleResult<SpillPlan> {
    let snapshot = &point.snapshot;
    let mut occupancy = Occupancy::default();
    let mut plan = SpillPlan::default();

    for local in &snapshot.locals {
        let save = match &local.value {
            LiveValue::Null => Save::Null,
            LiveValue::Uninitialized { class, site } => Save::Uninit {
                class: Arc::clone(class),
                site: *site,
                count: 1,
            },
            LiveValue::Value(ty) => Save::Field {
                field: pool.allocate(ty, &mut occupancy),
                ty: ty.clone(),
            },
        };
        plan.locals.push((local.index, save));
    }

    // The top entry is the suspension operand, handed to the driver.
    let below = snapshot.stack.len().saturating_sub(1);
    let mut stack: Vec<Save> = snapshot.stack[..below]
        .iter()
        .rev()
        .map(|entry| match entry {
            StackEntry::Null => Save::Null,
            StackEntry::Uninitialized { class, site, count } => Save::Uninit {
                class: Arc::clone(class),
                site: *site,
                count: *count,
            },
            StackEntry::Regular(ty) => Save::Field {
                field: pool.allocate(ty, &mut occupancy),
                ty: ty.clone(),
            },
        })
        .collect();
    stack.reverse();

    let mut rebuilt = Vec::new();
    for save in &stack {
        let Save::Uninit { site, .. } = save else {
            continue;
        };
        let held = plan
            .locals
            .iter()
            .any(|(_, l)| matches!(l, Save::Uninit { site: s, .. } if s == site));
        if !held && rebuilt.contains(site) {
            return Err(SpindleError::structural(
                name,
                format!(
                    "object allocated at #{site} is split across the stack at #{}",
                    point.index
                ),
            ));
        }
        rebuilt.push(*site);
    }

    plan.stack = stack;
    Ok(plan)
}
