//! Error types and result definitions for Spindle.
//!
//! Transformation failures are structural: the input procedure violates an
//! assumption the analyzer, splitter or code generator depends on. They abort
//! the transformation of that procedure and are never retried.

use std::sync::Arc;
use thiserror::Error;

/// The unified result type used by the transformation pipeline.
pub type SpindleResult<T> = Result<T, SpindleError>;

/// Errors raised while building or transforming a procedure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpindleError {
    /// Two control-flow paths reach an instruction with incompatible frames.
    #[error("MergeError in {procedure} at #{at}: {message}")]
    Merge {
        /// Procedure being analyzed.
        procedure: Arc<str>,
        /// Instruction index of the join.
        at: usize,
        /// Error description.
        message: String,
    },

    /// An instruction is applied to an operand it cannot accept.
    #[error("VerifyError in {procedure} at #{at}: {message}")]
    Verify {
        /// Procedure being analyzed.
        procedure: Arc<str>,
        /// Instruction index.
        at: usize,
        /// Error description.
        message: String,
    },

    /// Misuse of a coroutine directive (return directive not returned, await
    /// in a generator, ...).
    #[error("StructuralError in {procedure}: {message}")]
    Structural {
        /// Procedure being transformed.
        procedure: Arc<str>,
        /// Error description.
        message: String,
    },

    /// An exception region whose labels are missing or out of order.
    #[error("RegionError in {procedure}: region #{region}: {message}")]
    Region {
        /// Procedure being transformed.
        procedure: Arc<str>,
        /// Index of the region in the original exception table.
        region: usize,
        /// Error description.
        message: String,
    },

    /// A procedure could not be assembled.
    #[error("BuildError in {procedure}: {message}")]
    Build {
        /// Procedure being built.
        procedure: Arc<str>,
        /// Error description.
        message: String,
    },
}

impl SpindleError {
    /// Create a merge error.
    #[must_use]
    pub fn merge(procedure: &Arc<str>, at: usize, message: impl Into<String>) -> Self {
        Self::Merge {
            procedure: Arc::clone(procedure),
            at,
            message: message.into(),
        }
    }

    /// Create a verification error.
    #[must_use]
    pub fn verify(procedure: &Arc<str>, at: usize, message: impl Into<String>) -> Self {
        Self::Verify {
            procedure: Arc::clone(procedure),
            at,
            message: message.into(),
        }
    }

    /// Create a structural error.
    #[must_use]
    pub fn structural(procedure: &Arc<str>, message: impl Into<String>) -> Self {
        Self::Structural {
            procedure: Arc::clone(procedure),
            message: message.into(),
        }
    }

    /// Create a region error.
    #[must_use]
    pub fn region(procedure: &Arc<str>, region: usize, message: impl Into<String>) -> Self {
        Self::Region {
            procedure: Arc::clone(procedure),
            region,
            message: message.into(),
        }
    }

    /// Create a build error.
    #[must_use]
    pub fn build(procedure: &Arc<str>, message: impl Into<String>) -> Self {
        Self::Build {
            procedure: Arc::clone(procedure),
            message: message.into(),
        }
    }

    /// Procedure the error refers to.
    pub fn procedure(&self) -> &str {
        match self {
            Self::Merge { procedure, .. }
            | Self::Verify { procedure, .. }
            | Self::Structural { procedure, .. }
            | Self::Region { procedure, .. }
            | Self::Build { procedure, .. } => procedure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_location() {
        let name: Arc<str> = Arc::from("Foo.bar");
        let err = SpindleError::merge(&name, 12, "stack height 1 vs 2");
        assert_eq!(
            err.to_string(),
            "MergeError in Foo.bar at #12: stack height 1 vs 2"
        );
        assert_eq!(err.procedure(), "Foo.bar");
    }

    #[test]
    fn test_region_error_display() {
        let name: Arc<str> = Arc::from("Foo.bar");
        let err = SpindleError::region(&name, 3, "end label never bound");
        assert!(err.to_string().contains("region #3"));
    }
}
