//! Generator driver.
//!
//! A [`Generator`] is a lazy, once-consumable sequence produced by a state
//! machine (a [`GeneratorBody`]). Iteration is pull-based, synchronous and
//! single-threaded: each `next()` steps the innermost active body until it
//! yields a value, delegates, returns or throws.
//!
//! # Delegation
//!
//! ```text
//!   frames: [outer @ 2] [inner @ 0]          ◄── top is stepped
//!
//!   Yield(v)       expose v, keep the frame
//!   YieldAll(g)    push g, keep stepping
//!   Return         pop; the parent resumes at its saved state
//!   Throw(e)       pop; the parent resumes with e as its resume error,
//!                  or the iterator yields Err(e) and ends if there is none
//! ```

use crate::error::{BoxError, Outcome};
use crate::header::{Lifecycle, StateHeader};
use spindle_core::CoroutineMetadata;
use std::fmt;
use std::sync::Arc;

/// How a generator step ended.
pub enum GenStep<T> {
    /// Expose `value`; the next step runs at `state`.
    Yield {
        /// State to resume at.
        state: u32,
        /// Yielded value.
        value: T,
    },
    /// Yield everything `generator` yields, then resume at `state`.
    YieldAll {
        /// State to resume at.
        state: u32,
        /// Nested sequence.
        generator: Generator<T>,
    },
    /// The sequence is exhausted.
    Return,
    /// The sequence failed.
    Throw(BoxError),
}

impl<T: fmt::Debug> fmt::Debug for GenStep<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yield { state, value } => f
                .debug_struct("Yield")
                .field("state", state)
                .field("value", value)
                .finish(),
            Self::YieldAll { state, .. } => {
                f.debug_struct("YieldAll").field("state", state).finish()
            }
            Self::Return => f.write_str("Return"),
            Self::Throw(e) => f.debug_tuple("Throw").field(e).finish(),
        }
    }
}

/// A re-entrant state machine driven by a [`Generator`].
pub trait GeneratorBody: Send {
    /// Element type.
    type Item;

    /// Run from `state` to the next yield or to the end. `error` is the
    /// exception a delegated sequence failed with, to be rethrown at the
    /// suspend point.
    fn step(&mut self, state: u32, error: Option<BoxError>) -> GenStep<Self::Item>;

    /// Description of the coroutine, for diagnostics.
    fn metadata(&self) -> Option<Arc<CoroutineMetadata>> {
        None
    }
}

struct FnGenerator<F> {
    step: F,
}

impl<F, T> GeneratorBody for FnGenerator<F>
where
    F: FnMut(u32, Option<BoxError>) -> GenStep<T> + Send,
{
    type Item = T;

    fn step(&mut self, state: u32, error: Option<BoxError>) -> GenStep<T> {
        (self.step)(state, error)
    }
}

/// A lazy sequence backed by a state machine.
pub struct Generator<T> {
    body: Box<dyn GeneratorBody<Item = T>>,
}

impl<T: 'static> Generator<T> {
    /// Wrap a state machine.
    pub fn new(body: impl GeneratorBody<Item = T> + 'static) -> Self {
        Self {
            body: Box::new(body),
        }
    }

    /// Generator driven by a closure `step(state, error)`.
    pub fn from_fn<F>(step: F) -> Self
    where
        F: FnMut(u32, Option<BoxError>) -> GenStep<T> + Send + 'static,
    {
        Self::new(FnGenerator { step })
    }

    /// Generator over the items of `values`.
    pub fn from_vec(values: Vec<T>) -> Self
    where
        T: Send,
    {
        let mut values = values.into_iter();
        Self::from_fn(move |state, error| match (error, values.next()) {
            (Some(error), _) => GenStep::Throw(error),
            (None, Some(value)) => GenStep::Yield {
                state: state + 1,
                value,
            },
            (None, None) => GenStep::Return,
        })
    }

    /// Description of the coroutine, for diagnostics.
    pub fn metadata(&self) -> Option<Arc<CoroutineMetadata>> {
        self.body.metadata()
    }
}

impl<T> fmt::Debug for Generator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.body.metadata() {
            Some(metadata) => write!(f, "Generator[{metadata}]"),
            None => f.write_str("Generator"),
        }
    }
}

impl<T> IntoIterator for Generator<T> {
    type Item = Outcome<T>;
    type IntoIter = GeneratorIter<T>;

    fn into_iter(self) -> GeneratorIter<T> {
        GeneratorIter {
            frames: vec![Frame::new(self.body)],
            header: StateHeader::new(),
        }
    }
}

// =============================================================================
// Iteration
// =============================================================================

struct Frame<T> {
    body: Box<dyn GeneratorBody<Item = T>>,
    state: u32,
    pending: Option<BoxError>,
}

impl<T> Frame<T> {
    fn new(body: Box<dyn GeneratorBody<Item = T>>) -> Self {
        Self {
            body,
            state: 0,
            pending: None,
        }
    }
}

/// Iterator over a generator's values.
///
/// Yields `Ok(value)` for every value and, if the sequence fails, one final
/// `Err(error)`. It is fused.
pub struct GeneratorIter<T> {
    frames: Vec<Frame<T>>,
    header: StateHeader,
}

impl<T> GeneratorIter<T> {
    /// Number of active (nested) sequences.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Lifecycle of the outermost sequence.
    pub fn lifecycle(&self) -> Lifecycle {
        self.header.lifecycle()
    }

    fn exhaust(&mut self) {
        self.frames.clear();
        self.header.complete();
    }
}

impl<T> Iterator for GeneratorIter<T> {
    type Item = Outcome<T>;

    fn next(&mut self) -> Option<Outcome<T>> {
        loop {
            let depth = self.frames.len();
            let frame = self.frames.last_mut()?;
            let error = frame.pending.take();
            if depth == 1 {
                self.header.run(frame.state);
            }

            match frame.body.step(frame.state, error) {
                GenStep::Yield { state, value } => {
                    frame.state = state;
                    if depth == 1 {
                        self.header.suspend(state);
                    }
                    return Some(Ok(value));
                }
                GenStep::YieldAll { state, generator } => {
                    frame.state = state;
                    self.frames.push(Frame::new(generator.body));
                }
                GenStep::Return => {
                    self.frames.pop();
                    if self.frames.is_empty() {
                        self.exhaust();
                        return None;
                    }
                }
                GenStep::Throw(error) => {
                    self.frames.pop();
                    match self.frames.last_mut() {
                        Some(parent) => parent.pending = Some(error),
                        None => {
                            self.exhaust();
                            return Some(Err(error));
                        }
                    }
                }
            }
        }
    }
}

impl<T> std::iter::FusedIterator for GeneratorIter<T> {}

impl<T> fmt::Debug for GeneratorIter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorIter")
            .field("depth", &self.depth())
            .field("header", &self.header)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;

    /// Yields i * i for i in 0..n.
    fn squares(n: i32) -> Generator<i32> {
        let mut i = 0;
        Generator::from_fn(move |_, _| {
            if i >= n {
                return GenStep::Return;
            }
            let value = i * i;
            i += 1;
            GenStep::Yield { state: 1, value }
        })
    }

    fn values<T>(g: Generator<T>) -> Vec<T> {
        g.into_iter().map_while(Result::ok).collect()
    }

    #[test]
    fn test_squares() {
        assert_eq!(values(squares(4)), vec![0, 1, 4, 9]);
    }

    #[test]
    fn test_exhausted_iterator_stays_done() {
        let mut it = squares(1).into_iter();
        assert_eq!(it.next().map(Result::ok), Some(Some(0)));
        assert!(it.next().is_none());
        assert!(it.next().is_none());
        assert_eq!(it.lifecycle(), Lifecycle::Completed);
    }

    #[test]
    fn test_yield_all_flattens() {
        let mut inner = Some(squares(3));
        let outer = Generator::from_fn(move |state, _| match state {
            0 => GenStep::Yield { state: 1, value: -1 },
            1 => match inner.take() {
                Some(generator) => GenStep::YieldAll { state: 2, generator },
                None => GenStep::Return,
            },
            2 => GenStep::Yield { state: 3, value: -2 },
            _ => GenStep::Return,
        });
        assert_eq!(values(outer), vec![-1, 0, 1, 4, -2]);
    }

    #[test]
    fn test_error_delivered_to_parent() {
        let failing = Generator::from_fn(|_, _| GenStep::Throw(RuntimeError::message("inner")));
        let mut inner = Some(failing);
        let outer = Generator::from_fn(move |state, error| match (state, error) {
            (0, _) => match inner.take() {
                Some(generator) => GenStep::YieldAll { state: 1, generator },
                None => GenStep::Return,
            },
            (1, Some(e)) => GenStep::Yield {
                state: 2,
                value: format!("caught {e}"),
            },
            _ => GenStep::Return,
        });
        assert_eq!(values(outer), vec!["caught inner".to_owned()]);
    }

    #[test]
    fn test_uncaught_error_ends_iteration() {
        let g = Generator::from_fn(|state, _| match state {
            0 => GenStep::Yield { state: 1, value: 1 },
            _ => GenStep::Throw(RuntimeError::message("boom")),
        });
        let items: Vec<_> = g.into_iter().collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].as_ref().unwrap_err().to_string(), "boom");
    }

    #[test]
    fn test_from_vec() {
        assert_eq!(values(Generator::from_vec(vec!["a", "b"])), vec!["a", "b"]);
    }
}
