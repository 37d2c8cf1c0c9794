//! Virtual machine implementation.
//!
//! A [`Vm`] owns a [`Program`]: the loaded procedures, generated state
//! objects, natives and classes. Coroutine procedures are transformed on
//! load; their launchers replace them under the original name, so callers
//! see a plain procedure returning a task or generator handle.
//!
//! The program is shared with every task and generator it launches, which
//! may step on other threads, so all tables sit behind read-write locks.
//! No lock is held while interpreted code runs.

use crate::class::ClassTable;
use crate::dispatch::{Interpreter, NoContext};
use crate::error::{Interrupt, VmError};
use crate::frame::Compiled;
use crate::native::{Native, NativeResult, NativeTable};
use crate::value::Value;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use rustc_hash::FxHashMap;
use spindle_compiler::{Procedure, StateObjectDef, TransformConfig, TransformOutput, Transformer};
use spindle_runtime::{ExecutorRef, Generator, Task};
use std::sync::Arc;

// =============================================================================
// Program
// =============================================================================

/// A state object ready to launch.
#[derive(Debug)]
pub struct LoadedObject {
    /// Definition produced by the transformer.
    pub def: StateObjectDef,
    /// Resolved step procedure.
    pub step: Compiled,
}

/// Everything interpreted code can refer to by name.
#[derive(Debug)]
pub struct Program {
    procedures: RwLock<FxHashMap<Arc<str>, Arc<Compiled>>>,
    objects: RwLock<FxHashMap<Arc<str>, Arc<LoadedObject>>>,
    natives: RwLock<NativeTable>,
    classes: RwLock<ClassTable>,
}

impl Program {
    fn new() -> Self {
        Self {
            procedures: RwLock::new(FxHashMap::default()),
            objects: RwLock::new(FxHashMap::default()),
            natives: RwLock::new(NativeTable::with_builtins()),
            classes: RwLock::new(ClassTable::new()),
        }
    }

    /// Procedure by qualified name.
    pub(crate) fn procedure(&self, name: &str) -> Option<Arc<Compiled>> {
        self.procedures.read().get(name).cloned()
    }

    /// State object by generated name.
    pub(crate) fn object(&self, name: &str) -> Option<Arc<LoadedObject>> {
        self.objects.read().get(name).cloned()
    }

    /// Native by qualified name.
    pub(crate) fn native(&self, name: &str) -> Option<Native> {
        self.natives.read().get(name).cloned()
    }

    /// Read access to the class table. Hold only for the duration of a check.
    pub(crate) fn classes(&self) -> RwLockReadGuard<'_, ClassTable> {
        self.classes.read()
    }
}

// =============================================================================
// Virtual Machine
// =============================================================================

/// The Spindle virtual machine.
pub struct Vm {
    program: Arc<Program>,
    transformer: Mutex<Transformer>,
}

impl Vm {
    /// Create a virtual machine with the default transform configuration.
    pub fn new() -> Self {
        Self::with_config(TransformConfig::default())
    }

    /// Create a virtual machine whose transformer uses `config`.
    pub fn with_config(config: TransformConfig) -> Self {
        Self {
            program: Arc::new(Program::new()),
            transformer: Mutex::new(Transformer::new(config)),
        }
    }

    /// Create a virtual machine configured from the environment.
    pub fn from_env() -> Self {
        Self::with_config(TransformConfig::from_env())
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Load a procedure. Task and generator procedures are transformed
    /// first; plain procedures are loaded as they are.
    pub fn load_procedure(&self, procedure: Procedure) -> Result<(), VmError> {
        if procedure.kind.is_coroutine() {
            let output = self.transformer.lock().transform(&procedure)?;
            return self.load(output);
        }
        let compiled = Compiled::new(procedure)?;
        tracing::debug!(procedure = %compiled.name, "loaded procedure");
        self.program
            .procedures
            .write()
            .insert(Arc::clone(&compiled.name), Arc::new(compiled));
        Ok(())
    }

    /// Load the result of a transformation: the state object and its
    /// launcher.
    pub fn load(&self, output: TransformOutput) -> Result<(), VmError> {
        let TransformOutput {
            state_object,
            launcher,
        } = output;
        let step = Compiled::new(state_object.step.clone())?;
        let launcher = Compiled::new(launcher)?;
        tracing::debug!(
            object = %state_object.name,
            launcher = %launcher.name,
            suspend_points = state_object.resume_table.len(),
            "loaded state object"
        );

        let loaded = LoadedObject {
            def: state_object,
            step,
        };
        self.program
            .objects
            .write()
            .insert(Arc::clone(&loaded.def.name), Arc::new(loaded));
        self.program
            .procedures
            .write()
            .insert(Arc::clone(&launcher.name), Arc::new(launcher));
        Ok(())
    }

    /// Register (or replace) a native callable as `name`.
    pub fn register_native<F>(&self, name: &str, arity: usize, function: F)
    where
        F: Fn(&[Value]) -> NativeResult + Send + Sync + 'static,
    {
        self.program.natives.write().register(name, arity, function);
    }

    /// Define a class under an existing superclass.
    pub fn define_class(&self, name: &str, superclass: &str) -> Result<(), VmError> {
        self.program.classes.write().define(name, superclass)
    }

    /// Definition of a loaded state object.
    pub fn state_object(&self, name: &str) -> Option<StateObjectDef> {
        self.program.object(name).map(|loaded| loaded.def.clone())
    }

    /// Names of the loaded state objects.
    pub fn state_objects(&self) -> Vec<Arc<str>> {
        let mut names: Vec<_> = self.program.objects.read().keys().cloned().collect();
        names.sort();
        names
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Call a procedure synchronously.
    pub fn call(&self, name: &str, args: Vec<Value>) -> Result<Option<Value>, Interrupt> {
        let code = self
            .program
            .procedure(name)
            .ok_or_else(|| VmError::UnknownTarget {
                target: Arc::from(name),
            })?;
        Interpreter::new(&self.program).run(&code, args, &mut NoContext)
    }

    /// Call a task procedure and begin the task on `executor`.
    pub fn spawn(
        &self,
        name: &str,
        args: Vec<Value>,
        executor: &ExecutorRef,
    ) -> Result<Task<Value>, Interrupt> {
        match self.call(name, args)? {
            Some(Value::Task(task)) => {
                task.begin(executor);
                Ok(task)
            }
            other => Err(not_a_handle(name, "task", other).into()),
        }
    }

    /// Call a generator procedure and take its sequence.
    pub fn iterate(&self, name: &str, args: Vec<Value>) -> Result<Generator<Value>, Interrupt> {
        match self.call(name, args)? {
            Some(Value::Generator(cell)) => cell
                .take()
                .ok_or_else(|| not_a_handle(name, "fresh generator", None).into()),
            other => Err(not_a_handle(name, "generator", other).into()),
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("procedures", &self.program.procedures.read().len())
            .field("state_objects", &self.program.objects.read().len())
            .field("natives", &self.program.natives.read().len())
            .finish()
    }
}

fn not_a_handle(name: &str, expected: &str, found: Option<Value>) -> VmError {
    VmError::InvalidOperation {
        procedure: Arc::from(name),
        at: 0,
        message: format!("expected a {expected} handle, got {found:?}"),
    }
}
