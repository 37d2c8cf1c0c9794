//! Runtime values.
//!
//! A [`Value`] is what lives in a local, on the operand stack or in a field
//! of a state object. Primitives are stored inline; everything else is a
//! shared handle, so cloning a value never copies an object.
//!
//! Reference-typed locals and fields may hold primitive values, which then
//! behave as their boxed form. Typed arithmetic still requires the exact
//! primitive variant.

use crate::class::{NULL_POINTER_CLASS, STRING_CLASS};
use parking_lot::Mutex;
use spindle_core::Kind;
use spindle_core::types::{EXECUTOR_CLASS, GENERATOR_CLASS, OBJECT_CLASS, TASK_CLASS};
use spindle_runtime::{AwaitableRef, ExecutorRef, Generator, Task};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Objects
// =============================================================================

/// A constructed instance.
///
/// Members are the constructor arguments, in order. Exception classes take
/// their message as member 0.
#[derive(Debug)]
pub struct Object {
    /// Class name.
    pub class: Arc<str>,
    /// Member values.
    pub members: Vec<Value>,
}

impl Object {
    /// Message of an exception object, if member 0 is a string.
    pub fn message(&self) -> Option<&str> {
        match self.members.first() {
            Some(Value::Str(s)) => Some(s),
            _ => None,
        }
    }
}

/// An instance allocated by `new` whose constructor has not run yet.
///
/// Every copy of the same placeholder is replaced by the constructed object
/// when `construct` runs.
#[derive(Debug)]
pub struct Placeholder {
    /// Class being constructed.
    pub class: Arc<str>,
}

/// A generator handle. The underlying sequence can be consumed once.
#[derive(Clone)]
pub struct GeneratorCell {
    inner: Arc<Mutex<Option<Generator<Value>>>>,
}

impl GeneratorCell {
    /// Wrap a generator.
    pub fn new(generator: Generator<Value>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(generator))),
        }
    }

    /// Take the sequence out, leaving the handle consumed.
    pub fn take(&self) -> Option<Generator<Value>> {
        self.inner.lock().take()
    }

    /// Returns true once the sequence has been taken.
    pub fn is_consumed(&self) -> bool {
        self.inner.lock().is_none()
    }
}

impl fmt::Debug for GeneratorCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorCell")
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

// =============================================================================
// Value
// =============================================================================

/// A runtime value.
#[derive(Clone, Default)]
pub enum Value {
    /// Unset local, or the upper half of a long/double local.
    #[default]
    Empty,
    /// The null reference.
    Null,
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    Long(i64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// Immutable string.
    Str(Arc<str>),
    /// Constructed instance.
    Object(Arc<Object>),
    /// Instance under construction.
    Uninit(Arc<Placeholder>),
    /// Handle of a launched task.
    Task(Task<Value>),
    /// Any other awaitable object.
    Awaitable(AwaitableRef<Value>),
    /// Handle of a launched generator.
    Generator(GeneratorCell),
    /// An executor, as read by the current-executor directive.
    Executor(ExecutorRef),
}

impl Value {
    /// String value.
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        Self::Str(s.into())
    }

    /// New instance of `class` with `members`.
    pub fn object(class: impl Into<Arc<str>>, members: Vec<Value>) -> Self {
        Self::Object(Arc::new(Object {
            class: class.into(),
            members,
        }))
    }

    /// New exception instance of `class` carrying `message`.
    pub fn exception(class: impl Into<Arc<str>>, message: impl Into<Arc<str>>) -> Self {
        Self::object(class, vec![Self::Str(message.into())])
    }

    /// `NullPointerException` describing what was null.
    pub fn null_pointer(what: &str) -> Self {
        Self::exception(NULL_POINTER_CLASS, format!("{what} is null"))
    }

    /// Zero value of a kind, used to initialize spill fields.
    pub fn zero(kind: Kind) -> Self {
        match kind {
            Kind::Int => Self::Int(0),
            Kind::Long => Self::Long(0),
            Kind::Float => Self::Float(0.0),
            Kind::Double => Self::Double(0.0),
            Kind::Ref => Self::Null,
        }
    }

    /// Returns true for the null reference.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns true if this value can be held by a local of `kind`.
    pub fn fits(&self, kind: Kind) -> bool {
        match kind {
            Kind::Int => matches!(self, Self::Int(_)),
            Kind::Long => matches!(self, Self::Long(_)),
            Kind::Float => matches!(self, Self::Float(_)),
            Kind::Double => matches!(self, Self::Double(_)),
            Kind::Ref => !matches!(self, Self::Empty),
        }
    }

    /// Integer payload.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Long payload.
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Double payload.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// String payload.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Object payload.
    pub fn as_object(&self) -> Option<&Arc<Object>> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Task payload.
    pub fn as_task(&self) -> Option<&Task<Value>> {
        match self {
            Self::Task(t) => Some(t),
            _ => None,
        }
    }

    /// Take the sequence out of a generator handle.
    pub fn take_generator(&self) -> Option<Generator<Value>> {
        match self {
            Self::Generator(cell) => cell.take(),
            _ => None,
        }
    }

    /// Runtime class name, `None` for null and empty.
    pub fn class_name(&self) -> Option<&str> {
        Some(match self {
            Self::Empty | Self::Null => return None,
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::Str(_) => STRING_CLASS,
            Self::Object(o) => &*o.class,
            Self::Uninit(p) => &*p.class,
            Self::Task(_) => TASK_CLASS,
            Self::Awaitable(_) => OBJECT_CLASS,
            Self::Generator(_) => GENERATOR_CLASS,
            Self::Executor(_) => EXECUTOR_CLASS,
        })
    }

    /// Reference identity for objects, value equality for primitives and
    /// strings. Handles compare by identity.
    pub fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Empty, Self::Empty) | (Self::Null, Self::Null) => true,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Long(a), Self::Long(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            (Self::Uninit(a), Self::Uninit(b)) => Arc::ptr_eq(a, b),
            (Self::Awaitable(a), Self::Awaitable(b)) => Arc::ptr_eq(a, b),
            (Self::Executor(a), Self::Executor(b)) => Arc::ptr_eq(a, b),
            (Self::Generator(a), Self::Generator(b)) => Arc::ptr_eq(&a.inner, &b.inner),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(Arc::from(v))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Null => f.write_str("Null"),
            Self::Int(v) => write!(f, "Int({v})"),
            Self::Long(v) => write!(f, "Long({v})"),
            Self::Float(v) => write!(f, "Float({v})"),
            Self::Double(v) => write!(f, "Double({v})"),
            Self::Str(s) => write!(f, "Str({s:?})"),
            Self::Object(o) => f.debug_tuple("Object").field(o).finish(),
            Self::Uninit(p) => write!(f, "Uninit({})", p.class),
            Self::Task(t) => f.debug_tuple("Task").field(t).finish(),
            Self::Awaitable(_) => f.write_str("Awaitable"),
            Self::Generator(g) => f.debug_tuple("Generator").field(g).finish(),
            Self::Executor(_) => f.write_str("Executor"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("<empty>"),
            Self::Null => f.write_str("null"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Str(s) => f.write_str(s),
            Self::Object(o) => match o.message() {
                Some(message) => write!(f, "{}: {message}", o.class),
                None => f.write_str(&o.class),
            },
            Self::Uninit(p) => write!(f, "<uninitialized {}>", p.class),
            Self::Task(t) => write!(f, "{t}"),
            Self::Awaitable(_) => f.write_str("<awaitable>"),
            Self::Generator(_) => f.write_str(GENERATOR_CLASS),
            Self::Executor(_) => f.write_str(EXECUTOR_CLASS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_display() {
        let e = Value::exception("IllegalStateException", "bad state");
        assert_eq!(e.to_string(), "IllegalStateException: bad state");
        assert_eq!(e.class_name(), Some("IllegalStateException"));
    }

    #[test]
    fn test_identity_vs_value_equality() {
        let a = Value::object("Point", vec![Value::Int(1)]);
        let b = Value::object("Point", vec![Value::Int(1)]);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(Value::from("x"), Value::string("x"));
        assert_eq!(Value::Long(3), Value::from(3i64));
        assert_ne!(Value::Int(3), Value::Long(3));
    }

    #[test]
    fn test_fits() {
        assert!(Value::Int(1).fits(Kind::Int));
        assert!(!Value::Int(1).fits(Kind::Long));
        assert!(Value::Int(1).fits(Kind::Ref));
        assert!(Value::Null.fits(Kind::Ref));
        assert!(!Value::Empty.fits(Kind::Ref));
    }

    #[test]
    fn test_generator_cell_consumed_once() {
        let cell = GeneratorCell::new(Generator::from_vec(vec![Value::Int(1)]));
        let value = Value::Generator(cell.clone());
        assert!(value.take_generator().is_some());
        assert!(cell.is_consumed());
        assert!(value.take_generator().is_none());
    }
}
