//! Coroutine transformation.
//!
//! Turns a task or generator procedure into two artifacts:
//!
//! - a **state object definition**: captured arguments and pooled spill
//!   slots as fields, plus a re-entrant `step` procedure that dispatches on
//!   the state id, runs to the next suspend point, persists what is live and
//!   returns;
//! - a **launcher**: a plain procedure with the original signature that
//!   captures its arguments into a fresh state object and returns the
//!   task or generator handle.
//!
//! ```text
//! Procedure ──► Analyzer ──► SuspensionCodegen ──► StateObjectDef
//!                 │                 │                   │
//!             snapshots       RegionSplitter        + launcher
//!             + liveness      + SlotPool
//! ```

mod allocator;
mod codegen;
mod config;
mod regions;
mod state_object;

pub use allocator::{Occupancy, SlotPool};
pub use codegen::{GeneratedStep, SuspendPoint, SuspensionCodegen};
pub use config::TransformConfig;
pub use regions::RegionSplitter;
pub use state_object::{
    FieldDef, FieldRole, MAX_RESUME_POINTS, ResumePoint, ResumeTable, StateObjectDef, StepLayout,
};

use crate::analysis::Analyzer;
use crate::bytecode::{FieldId, Instruction, Intrinsic, Procedure, ProcedureBuilder, ProcedureKind};
use spindle_core::types::{GENERATOR_CLASS, TASK_CLASS};
use spindle_core::{CoroutineMetadata, Kind, SpindleError, SpindleResult, ValueType};
use std::sync::Arc;
use std::time::Instant;

/// Result of transforming one procedure.
#[derive(Debug, Clone)]
pub struct TransformOutput {
    /// Generated state object.
    pub state_object: StateObjectDef,
    /// Replacement for the original procedure.
    pub launcher: Procedure,
}

/// Transforms coroutine procedures, numbering generated state objects.
#[derive(Debug, Default)]
pub struct Transformer {
    config: TransformConfig,
    next_id: u32,
}

impl Transformer {
    /// Create a transformer.
    pub fn new(config: TransformConfig) -> Self {
        Self { config, next_id: 0 }
    }

    /// Create a transformer configured from the environment.
    pub fn from_env() -> Self {
        Self::new(TransformConfig::from_env())
    }

    /// Active configuration.
    #[inline]
    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    /// Transform one task or generator procedure.
    pub fn transform(&mut self, procedure: &Procedure) -> SpindleResult<TransformOutput> {
        let name = procedure.qualified_name();
        if !procedure.kind.is_coroutine() {
            return Err(SpindleError::structural(
                &name,
                "only task and generator procedures can be transformed",
            ));
        }

        let object_name: Arc<str> = Arc::from(format!(
            "{}${}$Coro${}",
            procedure.owner, procedure.name, self.next_id
        ));

        let started = Instant::now();
        let analysis = Analyzer::new(procedure)?
            .prune_dead_locals(self.config.prune_dead_locals)
            .run()?;
        let analyzed = started.elapsed();

        let generated = SuspensionCodegen::new(procedure, &analysis, &object_name)?.generate()?;
        let total = started.elapsed();

        if self.config.measure_timing {
            tracing::info!(
                procedure = %name,
                analysis_us = analyzed.as_micros(),
                codegen_us = (total - analyzed).as_micros(),
                "transform timing"
            );
        }

        let GeneratedStep {
            step,
            pool,
            resume_table,
            suspend_lines,
        } = generated;

        let mut fields = Vec::with_capacity(procedure.params.len() + pool.len());
        for (i, ty) in procedure.params.iter().enumerate() {
            let index = u16::try_from(i)
                .map_err(|_| SpindleError::structural(&name, "too many parameters"))?;
            fields.push(FieldDef {
                id: FieldId(index),
                name: Arc::from(format!("arg{i}")),
                ty: ty.clone(),
                role: FieldRole::Argument(index),
            });
        }
        for (n, (id, ty)) in pool.slots().enumerate() {
            fields.push(FieldDef {
                id,
                name: Arc::from(format!("{}{n}", ty.kind().prefix())),
                ty: ty.clone(),
                role: FieldRole::Spill,
            });
        }

        let metadata = Arc::new(CoroutineMetadata {
            owner: Arc::clone(&procedure.owner),
            name: Arc::clone(&procedure.name),
            params: procedure.params.clone(),
            source_file: procedure.source_file.clone(),
            suspend_lines,
        });

        let state_object = StateObjectDef {
            name: Arc::clone(&object_name),
            kind: procedure.kind,
            fields,
            step,
            layout: StepLayout::for_kind(procedure.kind),
            resume_table,
            metadata,
        };
        let launcher = build_launcher(procedure, &object_name)?;

        tracing::debug!(
            procedure = %name,
            state_object = %object_name,
            suspend_points = state_object.resume_table.len(),
            spill_slots = pool.len(),
            "transformed coroutine"
        );
        if self.config.dump_state_objects {
            tracing::info!(target: "spindle::dump", "\n{}", state_object.dump());
        }

        self.next_id += 1;
        Ok(TransformOutput {
            state_object,
            launcher,
        })
    }
}

/// Transform one procedure with the given configuration.
pub fn transform(procedure: &Procedure, config: TransformConfig) -> SpindleResult<TransformOutput> {
    Transformer::new(config).transform(procedure)
}

/// `load p0; ...; load pN; %launch object/argc; areturn`.
fn build_launcher(procedure: &Procedure, object: &Arc<str>) -> SpindleResult<Procedure> {
    let mut builder = ProcedureBuilder::new(Arc::clone(&procedure.owner), Arc::clone(&procedure.name));
    let handle = match procedure.kind {
        ProcedureKind::Generator => GENERATOR_CLASS,
        _ => TASK_CLASS,
    };
    builder.set_returns(Some(ValueType::reference(handle)));
    if let Some(file) = &procedure.source_file {
        builder.set_source_file(Arc::clone(file));
    }

    let mut slots = Vec::with_capacity(procedure.params.len());
    for param in &procedure.params {
        slots.push((builder.add_param(param.clone()), param.kind()));
    }
    for (slot, kind) in slots {
        builder.emit_load(slot, kind);
    }
    let argc = u16::try_from(procedure.params.len())
        .map_err(|_| SpindleError::structural(&procedure.qualified_name(), "too many parameters"))?;
    builder.emit_intrinsic(Intrinsic::Launch {
        object: Arc::clone(object),
        argc,
    });
    builder.emit(Instruction::ReturnValue(Kind::Ref));
    builder.finish()
}
