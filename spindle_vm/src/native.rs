//! Native procedures.
//!
//! Natives are host closures callable from interpreted code by name, exactly
//! like procedures. They receive their arguments in declaration order and
//! either return an optional value or throw one.

use crate::class::{CLASS_CAST_CLASS, NULL_POINTER_CLASS};
use crate::value::Value;
use rustc_hash::FxHashMap;
use spindle_runtime::{AwaitableRef, failed, ready};
use std::fmt;
use std::sync::Arc;

/// Result of a native call: `Ok(Some(v))` pushes `v`, `Ok(None)` pushes
/// nothing, `Err(e)` throws `e`.
pub type NativeResult = Result<Option<Value>, Value>;

/// A native implementation.
pub type NativeFn = Arc<dyn Fn(&[Value]) -> NativeResult + Send + Sync>;

/// A registered native.
#[derive(Clone)]
pub struct Native {
    /// Qualified name.
    pub name: Arc<str>,
    /// Number of arguments.
    pub arity: usize,
    /// Implementation.
    pub function: NativeFn,
}

impl fmt::Debug for Native {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Native({}/{})", self.name, self.arity)
    }
}

/// Name-indexed native table.
#[derive(Debug, Clone, Default)]
pub struct NativeTable {
    natives: FxHashMap<Arc<str>, Native>,
}

impl NativeTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with the standard natives.
    pub fn with_builtins() -> Self {
        let mut table = Self::new();
        register_builtins(&mut table);
        table
    }

    /// Register (or replace) a native.
    pub fn register<F>(&mut self, name: &str, arity: usize, function: F)
    where
        F: Fn(&[Value]) -> NativeResult + Send + Sync + 'static,
    {
        let name: Arc<str> = Arc::from(name);
        self.natives.insert(
            Arc::clone(&name),
            Native {
                name,
                arity,
                function: Arc::new(function),
            },
        );
    }

    /// Look up a native.
    pub fn get(&self, name: &str) -> Option<&Native> {
        self.natives.get(name)
    }

    /// Number of registered natives.
    pub fn len(&self) -> usize {
        self.natives.len()
    }

    /// Returns true if no natives are registered.
    pub fn is_empty(&self) -> bool {
        self.natives.is_empty()
    }
}

// =============================================================================
// Builtins
// =============================================================================

pub(crate) fn cast_error(expected: &str, found: &Value) -> Value {
    let found = found.class_name().unwrap_or("null");
    Value::exception(CLASS_CAST_CLASS, format!("{found} cannot be cast to {expected}"))
}

pub(crate) fn awaitable_of(value: &Value) -> Result<AwaitableRef<Value>, Value> {
    match value {
        Value::Task(task) => Ok(Arc::new(task.clone())),
        Value::Awaitable(awaitable) => Ok(Arc::clone(awaitable)),
        Value::Null => Err(Value::null_pointer("awaited value")),
        other => Err(cast_error("Awaitable", other)),
    }
}

fn register_builtins(table: &mut NativeTable) {
    // Boxing is the identity: reference slots hold primitives as they are.
    for name in ["Box.int", "Box.long", "Box.float", "Box.double"] {
        table.register(name, 1, |args| Ok(Some(args[0].clone())));
    }
    table.register("Unbox.int", 1, |args| match &args[0] {
        Value::Int(v) => Ok(Some(Value::Int(*v))),
        Value::Null => Err(Value::exception(NULL_POINTER_CLASS, "unboxing null")),
        other => Err(cast_error("int", other)),
    });
    table.register("Unbox.long", 1, |args| match &args[0] {
        Value::Long(v) => Ok(Some(Value::Long(*v))),
        Value::Null => Err(Value::exception(NULL_POINTER_CLASS, "unboxing null")),
        other => Err(cast_error("long", other)),
    });

    table.register("String.valueOf", 1, |args| {
        Ok(Some(Value::string(args[0].to_string())))
    });
    table.register("String.concat", 2, |args| {
        Ok(Some(Value::string(format!("{}{}", args[0], args[1]))))
    });

    table.register("Throwable.getMessage", 1, |args| match &args[0] {
        Value::Object(o) => Ok(Some(
            o.message().map(Value::string).unwrap_or(Value::Null),
        )),
        Value::Null => Err(Value::null_pointer("exception")),
        other => Err(cast_error("Throwable", other)),
    });

    table.register("Async.ready", 1, |args| {
        Ok(Some(Value::Awaitable(ready(args[0].clone()))))
    });
    table.register("Async.failed", 1, |args| {
        let error = crate::error::Thrown(args[0].clone()).boxed();
        Ok(Some(Value::Awaitable(failed(error))))
    });
    table.register("Async.unwrapped", 1, |args| {
        let inner = awaitable_of(&args[0])?;
        Ok(Some(Value::Awaitable(spindle_runtime::unwrapped(inner))))
    });
    table.register("Task.isComplete", 1, |args| match &args[0] {
        Value::Task(task) => Ok(Some(Value::Int(i32::from(task.is_complete())))),
        Value::Null => Err(Value::null_pointer("task")),
        other => Err(cast_error("Task", other)),
    });
}
