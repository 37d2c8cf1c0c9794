//! # Spindle Runtime
//!
//! Drives the state machines produced by the Spindle transformer.
//!
//! ## Architecture
//!
//! - **Tasks**: [`Task`] steps a [`TaskBody`] on an [`Executor`], suspending
//!   on [`Awaitable`] objects and resuming through one-shot
//!   [`Continuation`]s.
//! - **Generators**: [`Generator`] pulls values out of a [`GeneratorBody`],
//!   flattening nested sequences and propagating errors outward.
//! - **Executors**: [`Eager`] runs inline; [`ThreadPool`] runs jobs on
//!   work-stealing worker threads.
//!
//! ## Guarantees
//!
//! - Exactly one `begin` binds a task's executor and schedules its first step.
//! - Each continuation can be resumed once; a second attempt is an error.
//! - The first completion of a task wins; every waiter sees that result once,
//!   including waiters that arrive after completion.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod awaitable;
pub mod completion;
pub mod continuation;
pub mod error;
pub mod executor;
pub mod generator;
pub mod header;
pub mod task;

pub use awaitable::{Awaitable, AwaitableRef, Deferred, failed, map, ready, unwrapped, with_executor};
pub use completion::Completion;
pub use continuation::Continuation;
pub use error::{BoxError, Outcome, RuntimeError};
pub use executor::{Eager, Executor, ExecutorRef, Job, PoolStatsSnapshot, Suspension, ThreadPool, eager, from_fn};
pub use generator::{GenStep, Generator, GeneratorBody, GeneratorIter};
pub use header::{Lifecycle, StateHeader};
pub use task::{FnBody, Resume, Step, Task, TaskBody};
