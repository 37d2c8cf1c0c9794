//! Awaitable objects and adapters.
//!
//! Anything a task can suspend on implements [`Awaitable`]: given the
//! executor of the suspending task and a one-shot [`Continuation`], it must
//! eventually call exactly one of `submit` / `submit_error`.

use crate::completion::Completion;
use crate::continuation::Continuation;
use crate::error::{BoxError, Outcome};
use crate::executor::ExecutorRef;
use crate::task::Task;
use std::fmt;
use std::sync::Arc;

/// An object a task can suspend on.
pub trait Awaitable<T>: Send + Sync {
    /// Arrange for `continuation` to be resumed with the result.
    ///
    /// `executor` is the executor the suspending task is bound to.
    fn execute(&self, executor: &ExecutorRef, continuation: Continuation<T>);

    /// If true, the suspending task resumes inline on the thread that
    /// submits the result instead of being rescheduled on its executor.
    fn is_unwrapped(&self) -> bool {
        false
    }
}

/// Shared awaitable handle.
pub type AwaitableRef<T> = Arc<dyn Awaitable<T>>;

// =============================================================================
// Settled Values
// =============================================================================

struct Ready<T> {
    outcome: Outcome<T>,
}

impl<T: Clone + Send + Sync> Awaitable<T> for Ready<T> {
    fn execute(&self, _executor: &ExecutorRef, continuation: Continuation<T>) {
        continuation.settle(self.outcome.clone());
    }
}

/// Awaitable that resumes immediately with `value`.
pub fn ready<T: Clone + Send + Sync + 'static>(value: T) -> AwaitableRef<T> {
    Arc::new(Ready { outcome: Ok(value) })
}

/// Awaitable that resumes immediately with `error`.
pub fn failed<T: Clone + Send + Sync + 'static>(error: BoxError) -> AwaitableRef<T> {
    Arc::new(Ready {
        outcome: Err(error),
    })
}

// =============================================================================
// Deferred
// =============================================================================

/// A result produced later by some other party, like a completable future.
///
/// Waiters resume on the thread that calls [`complete`](Self::complete) or
/// [`fail`](Self::fail); a task awaiting it is then rescheduled on its own
/// executor.
pub struct Deferred<T> {
    cell: Arc<Completion<T>>,
}

impl<T: Clone + Send + Sync + 'static> Deferred<T> {
    /// Pending deferred value.
    pub fn new() -> Self {
        Self {
            cell: Arc::new(Completion::new()),
        }
    }

    /// Provide the value. Returns false if already settled.
    pub fn complete(&self, value: T) -> bool {
        self.cell.complete(Ok(value), None)
    }

    /// Provide an error. Returns false if already settled.
    pub fn fail(&self, error: BoxError) -> bool {
        self.cell.complete(Err(error), None)
    }

    /// Whether a value or error was provided.
    pub fn is_settled(&self) -> bool {
        self.cell.is_complete()
    }

    /// Shared awaitable handle.
    pub fn awaitable(&self) -> AwaitableRef<T> {
        Arc::new(self.clone())
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Awaitable<T> for Deferred<T> {
    fn execute(&self, _executor: &ExecutorRef, continuation: Continuation<T>) {
        self.cell.on_complete(continuation);
    }
}

// =============================================================================
// Adapters
// =============================================================================

struct Unwrapped<T> {
    inner: AwaitableRef<T>,
}

impl<T> Awaitable<T> for Unwrapped<T> {
    fn execute(&self, executor: &ExecutorRef, continuation: Continuation<T>) {
        self.inner.execute(executor, continuation);
    }

    fn is_unwrapped(&self) -> bool {
        true
    }
}

/// Mark `inner` so that the awaiting task resumes inline on the submitting
/// thread.
pub fn unwrapped<T: 'static>(inner: AwaitableRef<T>) -> AwaitableRef<T> {
    Arc::new(Unwrapped { inner })
}

struct Mapped<S, T> {
    inner: AwaitableRef<S>,
    map: Arc<dyn Fn(S) -> T + Send + Sync>,
}

impl<S: 'static, T: 'static> Awaitable<T> for Mapped<S, T> {
    fn execute(&self, executor: &ExecutorRef, continuation: Continuation<T>) {
        let map = Arc::clone(&self.map);
        let location = continuation.location().cloned();
        let forward = Continuation::with_location(location, move |outcome: Outcome<S>| {
            continuation.settle(outcome.map(|v| map(v)));
        });
        self.inner.execute(executor, forward);
    }

    fn is_unwrapped(&self) -> bool {
        self.inner.is_unwrapped()
    }
}

/// Awaitable that transforms the value of `inner` with `map`. Errors pass
/// through unchanged.
pub fn map<S, T, F>(inner: AwaitableRef<S>, map: F) -> AwaitableRef<T>
where
    S: 'static,
    T: 'static,
    F: Fn(S) -> T + Send + Sync + 'static,
{
    Arc::new(Mapped {
        inner,
        map: Arc::new(map),
    })
}

struct OnExecutor<T> {
    task: Task<T>,
    executor: ExecutorRef,
}

impl<T: Clone + Send + Sync + 'static> Awaitable<T> for OnExecutor<T> {
    fn execute(&self, _executor: &ExecutorRef, continuation: Continuation<T>) {
        self.task.begin(&self.executor);
        self.task.on_complete(continuation);
    }
}

/// Awaitable that starts `task` on `executor` instead of the awaiting task's
/// executor.
pub fn with_executor<T: Clone + Send + Sync + 'static>(
    task: Task<T>,
    executor: ExecutorRef,
) -> AwaitableRef<T> {
    Arc::new(OnExecutor { task, executor })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;
    use crate::executor::eager;
    use std::sync::mpsc;

    fn collect<T: Send + 'static>(awaitable: &AwaitableRef<T>) -> mpsc::Receiver<Outcome<T>> {
        let (tx, rx) = mpsc::channel();
        awaitable.execute(
            &eager(),
            Continuation::new(move |o| {
                let _ = tx.send(o);
            }),
        );
        rx
    }

    #[test]
    fn test_ready_and_failed() {
        assert_eq!(collect(&ready(3)).try_recv().unwrap().ok(), Some(3));
        let err = collect(&failed::<i32>(RuntimeError::message("no")))
            .try_recv()
            .unwrap();
        assert_eq!(err.unwrap_err().to_string(), "no");
    }

    #[test]
    fn test_deferred_resumes_on_complete() {
        let deferred = Deferred::new();
        let rx = collect(&deferred.awaitable());
        assert!(rx.try_recv().is_err());
        assert!(deferred.complete(8));
        assert!(!deferred.fail(RuntimeError::message("late")));
        assert_eq!(rx.try_recv().unwrap().ok(), Some(8));
    }

    #[test]
    fn test_deferred_skips_waiter_resumed_elsewhere() {
        let deferred = Deferred::new();
        let (tx, rx) = mpsc::channel();
        let waiter = Continuation::new(move |o: Outcome<i32>| {
            let _ = tx.send(o.ok());
        });
        deferred.awaitable().execute(&eager(), waiter.clone());
        waiter.submit(1).unwrap();

        assert!(deferred.complete(2));
        assert!(deferred.is_settled());
        assert_eq!(rx.try_recv(), Ok(Some(1)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_map_transforms_value() {
        let doubled = map(ready(21), |v: i32| v * 2);
        assert_eq!(collect(&doubled).try_recv().unwrap().ok(), Some(42));
    }

    #[test]
    fn test_unwrapped_flag() {
        let inner = ready(1);
        assert!(!inner.is_unwrapped());
        let outer = unwrapped(inner);
        assert!(outer.is_unwrapped());
        assert!(map(outer, |v: i32| v).is_unwrapped());
    }
}
