//! Runtime error types.
//!
//! Two kinds of failure travel through the runtime:
//! - **User errors**: whatever a coroutine body throws. They are carried as
//!   [`BoxError`] so that any error type (including interpreter exceptions)
//!   can flow from a producer to every waiter unchanged.
//! - **Protocol violations**: misuse of the suspend/resume protocol itself,
//!   reported as [`RuntimeError`].

use spindle_core::SourceLocation;
use std::error::Error;
use std::sync::Arc;
use thiserror::Error;

/// A shareable user error.
pub type BoxError = Arc<dyn Error + Send + Sync + 'static>;

/// Result of an awaited computation.
pub type Outcome<T> = Result<T, BoxError>;

/// Protocol violations detected by the runtime.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// A continuation was resumed more than once.
    #[error("ProtocolError: continuation resumed twice{}", at(location))]
    AlreadyResumed {
        /// Suspend point the continuation belongs to.
        location: Option<SourceLocation>,
    },

    /// A task was waited on before it was started.
    #[error("ProtocolError: task was never started")]
    NotStarted,

    /// A step ended without suspending, completing or failing.
    #[error("ProtocolError: {message}")]
    StepFault {
        /// Error description.
        message: String,
    },

    /// A plain error message, for producers without an error type of their own.
    #[error("{0}")]
    Message(String),
}

fn at(location: &Option<SourceLocation>) -> String {
    location
        .as_ref()
        .map(|l| format!(" at {l}"))
        .unwrap_or_default()
}

impl RuntimeError {
    /// Create a step fault.
    pub fn step_fault(message: impl Into<String>) -> Self {
        Self::StepFault {
            message: message.into(),
        }
    }

    /// Create a message error, boxed for delivery.
    pub fn message(message: impl Into<String>) -> BoxError {
        Arc::new(Self::Message(message.into()))
    }

    /// Box this error for delivery through a continuation.
    pub fn boxed(self) -> BoxError {
        Arc::new(self)
    }
}
