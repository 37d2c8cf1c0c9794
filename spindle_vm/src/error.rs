//! Interpreter error types.
//!
//! Interpreted code fails in two ways:
//! - it **throws** a value, which exception regions can catch and which
//!   crosses the runtime as a [`Thrown`] error;
//! - the interpreter itself **faults** ([`VmError`]): malformed code, an
//!   unknown call target, a directive that was never transformed. Faults are
//!   not catchable by interpreted code.

use crate::class::HOST_ERROR_CLASS;
use crate::value::Value;
use spindle_core::{Kind, SpindleError};
use spindle_runtime::BoxError;
use std::sync::Arc;
use thiserror::Error;

/// Interpreter faults.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VmError {
    /// An instruction popped from an empty operand stack.
    #[error("VmError: stack underflow in {procedure} at #{at}")]
    StackUnderflow {
        /// Executing procedure.
        procedure: Arc<str>,
        /// Instruction index.
        at: usize,
    },

    /// An operand or local did not hold a value of the expected kind.
    #[error("VmError: expected {expected} in {procedure} at #{at}, found {found}")]
    TypeMismatch {
        /// Executing procedure.
        procedure: Arc<str>,
        /// Instruction index.
        at: usize,
        /// Expected kind.
        expected: Kind,
        /// Description of the actual value.
        found: String,
    },

    /// An instruction that is not defined for its operands (bitwise float
    /// arithmetic, ordering references, constructing the wrong placeholder).
    #[error("VmError: invalid operation in {procedure} at #{at}: {message}")]
    InvalidOperation {
        /// Executing procedure.
        procedure: Arc<str>,
        /// Instruction index.
        at: usize,
        /// Error description.
        message: String,
    },

    /// A local index outside the frame.
    #[error("VmError: local {slot} out of range in {procedure}")]
    BadLocal {
        /// Executing procedure.
        procedure: Arc<str>,
        /// Local index.
        slot: u16,
    },

    /// A jump to a label that is not bound.
    #[error("VmError: unbound label L{label} in {procedure}")]
    BadLabel {
        /// Executing procedure.
        procedure: Arc<str>,
        /// Label id.
        label: u32,
    },

    /// No procedure or native with this name.
    #[error("VmError: unknown call target {target}")]
    UnknownTarget {
        /// Target name.
        target: Arc<str>,
    },

    /// No state object with this name.
    #[error("VmError: unknown state object {object}")]
    UnknownStateObject {
        /// State object name.
        object: Arc<str>,
    },

    /// `new` or a class definition referred to an undefined class.
    #[error("VmError: unknown class {class}")]
    UnknownClass {
        /// Class name.
        class: Arc<str>,
    },

    /// A class was defined twice with different superclasses.
    #[error("VmError: class {class} already defined")]
    ClassRedefined {
        /// Class name.
        class: Arc<str>,
    },

    /// A call passed the wrong number of arguments.
    #[error("VmError: {target} expects {expected} arguments, got {found}")]
    Arity {
        /// Target name.
        target: Arc<str>,
        /// Declared parameter count.
        expected: usize,
        /// Supplied argument count.
        found: usize,
    },

    /// A coroutine directive reached the interpreter untransformed.
    #[error("VmError: untransformed directive {directive} in {procedure}")]
    UntransformedDirective {
        /// Executing procedure.
        procedure: Arc<str>,
        /// Directive mnemonic.
        directive: String,
    },

    /// A state-object intrinsic executed outside a step procedure, or one
    /// the running state object does not support.
    #[error("VmError: {intrinsic} is not valid here ({procedure})")]
    MisplacedIntrinsic {
        /// Executing procedure.
        procedure: Arc<str>,
        /// Intrinsic mnemonic.
        intrinsic: String,
    },

    /// A state-object field id outside the object.
    #[error("VmError: no field {field} in {object}")]
    BadField {
        /// State object name.
        object: Arc<str>,
        /// Field index.
        field: u16,
    },

    /// Call depth exceeded.
    #[error("VmError: call depth exceeded {depth}")]
    StackOverflow {
        /// Depth limit.
        depth: usize,
    },

    /// Control ran off the end of a procedure.
    #[error("VmError: {procedure} fell off the end of its code")]
    FellOffEnd {
        /// Executing procedure.
        procedure: Arc<str>,
    },

    /// Loading a procedure failed validation.
    #[error("VmError: {0}")]
    Load(#[from] SpindleError),
}

/// Why execution of a procedure stopped early.
#[derive(Error, Debug, Clone)]
pub enum Interrupt {
    /// An uncaught exception.
    #[error("uncaught {0}")]
    Throw(Value),
    /// An interpreter fault.
    #[error(transparent)]
    Fault(#[from] VmError),
}

impl Interrupt {
    /// The thrown value, if this is an uncaught exception.
    pub fn thrown(&self) -> Option<&Value> {
        match self {
            Self::Throw(value) => Some(value),
            Self::Fault(_) => None,
        }
    }

    /// Convert to an error deliverable through the runtime.
    pub fn into_error(self) -> BoxError {
        match self {
            Self::Throw(value) => Thrown(value).boxed(),
            Self::Fault(fault) => Arc::new(fault),
        }
    }
}

/// A thrown value travelling through the runtime as an error.
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct Thrown(pub Value);

impl Thrown {
    /// Box for delivery through a continuation.
    pub fn boxed(self) -> BoxError {
        Arc::new(self)
    }

    /// The value an error is rethrown as inside interpreted code.
    ///
    /// Thrown values come back unchanged; any other error becomes a
    /// `HostError` carrying its message.
    pub fn value_of(error: &BoxError) -> Value {
        match error.downcast_ref::<Thrown>() {
            Some(Thrown(value)) => value.clone(),
            None => Value::exception(HOST_ERROR_CLASS, error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spindle_runtime::RuntimeError;

    #[test]
    fn test_thrown_round_trips_through_box() {
        let value = Value::exception("Boom", "bad");
        let boxed = Thrown(value.clone()).boxed();
        assert_eq!(boxed.to_string(), "Boom: bad");
        assert_eq!(Thrown::value_of(&boxed), value);
    }

    #[test]
    fn test_foreign_error_becomes_host_error() {
        let value = Thrown::value_of(&RuntimeError::message("socket closed"));
        assert_eq!(value.class_name(), Some(HOST_ERROR_CLASS));
        assert_eq!(value.to_string(), "HostError: socket closed");
    }

    #[test]
    fn test_fault_display() {
        let fault = VmError::UnknownTarget {
            target: Arc::from("Demo.missing"),
        };
        assert_eq!(fault.to_string(), "VmError: unknown call target Demo.missing");
    }
}
