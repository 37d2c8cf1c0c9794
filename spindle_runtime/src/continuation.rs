//! One-shot continuations.
//!
//! A [`Continuation`] is the handle an awaited object receives when a task
//! suspends on it. Exactly one of [`submit`](Continuation::submit) and
//! [`submit_error`](Continuation::submit_error) may succeed, once; the flag
//! is flipped with an atomic exchange so racing producers cannot both resume
//! the task. Clones share the same flag.
//!
//! A losing submit is reported to its caller as
//! [`RuntimeError::AlreadyResumed`]. The runtime's own awaited objects resume
//! through [`settle`](Continuation::settle), which has no caller to report
//! to and logs the loss instead.

use crate::error::{BoxError, Outcome, RuntimeError};
use parking_lot::Mutex;
use spindle_core::SourceLocation;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

type ResumeFn<T> = Box<dyn FnOnce(Outcome<T>) + Send + 'static>;

struct Inner<T> {
    resumed: AtomicBool,
    resume: Mutex<Option<ResumeFn<T>>>,
    location: Option<SourceLocation>,
}

/// Resumes a suspended computation exactly once.
pub struct Continuation<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Continuation<T> {
    /// Continuation that runs `resume` with the outcome.
    pub fn new(resume: impl FnOnce(Outcome<T>) + Send + 'static) -> Self {
        Self::with_location(None, resume)
    }

    /// Continuation for the suspend point at `location`.
    pub fn with_location(
        location: Option<SourceLocation>,
        resume: impl FnOnce(Outcome<T>) + Send + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                resumed: AtomicBool::new(false),
                resume: Mutex::new(Some(Box::new(resume))),
                location,
            }),
        }
    }

    /// Resume with a value.
    pub fn submit(&self, value: T) -> Result<(), RuntimeError> {
        self.resume(Ok(value))
    }

    /// Resume with an error, rethrown at the suspend point.
    pub fn submit_error(&self, error: BoxError) -> Result<(), RuntimeError> {
        self.resume(Err(error))
    }

    /// Resume with an outcome.
    pub fn resume(&self, outcome: Outcome<T>) -> Result<(), RuntimeError> {
        if self.inner.resumed.swap(true, Ordering::AcqRel) {
            return Err(RuntimeError::AlreadyResumed {
                location: self.inner.location.clone(),
            });
        }
        let resume = self.inner.resume.lock().take();
        if let Some(resume) = resume {
            resume(outcome);
        }
        Ok(())
    }

    /// Resume on behalf of the awaited object that owns this handle.
    ///
    /// A clone held elsewhere may have resumed first. That submit wins, this
    /// outcome is dropped and the conflict is logged. Returns whether this
    /// call resumed the computation.
    pub(crate) fn settle(self, outcome: Outcome<T>) -> bool {
        match self.resume(outcome) {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(%error, "awaited object resumed a settled continuation");
                false
            }
        }
    }

    /// Whether a submit already happened.
    #[inline]
    pub fn is_resumed(&self) -> bool {
        self.inner.resumed.load(Ordering::Acquire)
    }

    /// Source location of the suspend point this continuation resumes.
    pub fn location(&self) -> Option<&SourceLocation> {
        self.inner.location.as_ref()
    }
}

impl<T> Clone for Continuation<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Continuation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("resumed", &self.is_resumed())
            .field("location", &self.inner.location)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_submit_once() {
        let (tx, rx) = mpsc::channel();
        let k = Continuation::new(move |o: Outcome<i32>| tx.send(o.ok()).unwrap());
        assert!(k.submit(5).is_ok());
        assert!(matches!(
            k.submit(6),
            Err(RuntimeError::AlreadyResumed { .. })
        ));
        assert_eq!(rx.try_recv(), Ok(Some(5)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_submit_then_error_fails() {
        let k = Continuation::new(|_: Outcome<i32>| {});
        k.submit(1).unwrap();
        assert!(k.submit_error(RuntimeError::message("late")).is_err());
        assert!(k.is_resumed());
    }

    #[test]
    fn test_clones_share_flag() {
        let k = Continuation::new(|_: Outcome<()>| {});
        let other = k.clone();
        other.submit(()).unwrap();
        assert!(k.submit(()).is_err());
    }

    #[test]
    fn test_settle_loses_to_earlier_submit() {
        let (tx, rx) = mpsc::channel();
        let k = Continuation::new(move |o: Outcome<i32>| tx.send(o.ok()).unwrap());
        k.submit(1).unwrap();
        assert!(!k.clone().settle(Ok(2)));
        assert_eq!(rx.try_recv(), Ok(Some(1)));
        assert!(rx.try_recv().is_err());

        let fresh = Continuation::new(|_: Outcome<i32>| {});
        assert!(fresh.clone().settle(Ok(3)));
        assert!(fresh.is_resumed());
    }

    #[test]
    fn test_location() {
        let location = SourceLocation {
            owner: Arc::from("Demo"),
            name: Arc::from("run"),
            source_file: None,
            line: 3,
        };
        let k = Continuation::with_location(Some(location), |_: Outcome<()>| {});
        assert_eq!(
            k.location().map(ToString::to_string).as_deref(),
            Some("Demo.run(Unknown Source:3)")
        );
    }
}
