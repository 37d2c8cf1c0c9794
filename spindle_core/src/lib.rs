//! # Spindle Core
//!
//! Core types shared by every Spindle component.
//!
//! Spindle rewrites procedures that contain suspend points (`await`, `yield`)
//! into re-entrant state machines and drives those machines at runtime. This
//! crate holds the vocabulary the compiler, runtime and interpreter agree on:
//!
//! - **Types**: the value-type lattice used by the analyzer and slot pools
//! - **Errors**: structural/transformation errors and the result alias
//! - **Metadata**: declaring entity, parameters and suspend-point lines of a
//!   generated state object, used for diagnostics at resume time

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod metadata;
pub mod types;

pub use error::{SpindleError, SpindleResult};
pub use metadata::{CoroutineMetadata, SourceLocation};
pub use types::{Kind, ValueType};

/// Spindle version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
