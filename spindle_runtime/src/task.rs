//! Task driver.
//!
//! A [`Task`] drives a state machine (a [`TaskBody`]) through its steps:
//!
//! ```text
//!   Unstarted ──begin──► Running ──Await──► Suspended ──resume──► Running ...
//!                           │                                        │
//!                           └──────────── Return / Throw ────────────┴──► Completed
//! ```
//!
//! `begin` binds the executor with a single-assignment CAS; only the winner
//! schedules state 0. A step that suspends returns the awaited object as its
//! outcome; the driver then hands it a continuation tied to the resume state.
//! Because the awaited object is called only after the step has returned, a
//! synchronous resume never re-enters a running step.
//!
//! While suspended the task records the object it waits for. Resuming clears
//! the record and marks the task running again before the next step is
//! scheduled, so [`Task::awaited`] reflects only live waits.
//!
//! Completion stores the result once (first writer wins) and redispatches
//! every waiter through the bound executor.

use crate::awaitable::{Awaitable, AwaitableRef};
use crate::completion::Completion;
use crate::continuation::Continuation;
use crate::error::{BoxError, Outcome, RuntimeError};
use crate::executor::{ExecutorRef, Suspension};
use crate::header::{Lifecycle, StateHeader};
use parking_lot::Mutex;
use spindle_core::CoroutineMetadata;
use std::any::Any;
use std::fmt;
use std::sync::mpsc;
use std::sync::{Arc, OnceLock};

// =============================================================================
// Step Protocol
// =============================================================================

/// How a step is entered.
#[derive(Debug)]
pub enum Resume<I> {
    /// First step (state 0).
    Start,
    /// Resumed with the awaited value.
    Value(I),
    /// Resumed with an error, rethrown at the suspend point.
    Error(BoxError),
}

/// How a step ended.
pub enum Step<T, I> {
    /// Suspend until `awaitable` resolves, then resume at `state`.
    Await {
        /// State to resume at.
        state: u32,
        /// Object to wait for.
        awaitable: AwaitableRef<I>,
    },
    /// Complete with a value.
    Return(T),
    /// Complete with an error.
    Throw(BoxError),
}

impl<T: fmt::Debug, I> fmt::Debug for Step<T, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Await { state, .. } => f.debug_struct("Await").field("state", state).finish(),
            Self::Return(v) => f.debug_tuple("Return").field(v).finish(),
            Self::Throw(e) => f.debug_tuple("Throw").field(e).finish(),
        }
    }
}

/// A re-entrant state machine driven by a [`Task`].
pub trait TaskBody: Send + 'static {
    /// Result type.
    type Output: Clone + Send + Sync + 'static;
    /// Type of the values awaited objects resume with.
    type Input: Send + 'static;

    /// Run from `state` to the next suspend point or to completion.
    fn step(
        &mut self,
        state: u32,
        resume: Resume<Self::Input>,
        executor: &ExecutorRef,
    ) -> Step<Self::Output, Self::Input>;

    /// Description of the coroutine, for diagnostics.
    fn metadata(&self) -> Option<Arc<CoroutineMetadata>> {
        None
    }
}

/// Task body backed by a closure.
pub struct FnBody<F, T, I> {
    step: F,
    _types: std::marker::PhantomData<fn(I) -> T>,
}

impl<F, T, I> TaskBody for FnBody<F, T, I>
where
    F: FnMut(u32, Resume<I>, &ExecutorRef) -> Step<T, I> + Send + 'static,
    T: Clone + Send + Sync + 'static,
    I: Send + 'static,
{
    type Output = T;
    type Input = I;

    fn step(&mut self, state: u32, resume: Resume<I>, executor: &ExecutorRef) -> Step<T, I> {
        (self.step)(state, resume, executor)
    }
}

// =============================================================================
// Task Handle
// =============================================================================

trait TaskHandle<T>: Send + Sync {
    fn begin(self: Arc<Self>, executor: &ExecutorRef) -> bool;
    fn completion(&self) -> &Completion<T>;
    fn executor(&self) -> Option<&ExecutorRef>;
    fn lifecycle(&self) -> (Lifecycle, u32);
    fn metadata(&self) -> Option<&CoroutineMetadata>;
    fn awaited(&self) -> Option<Box<dyn Any + Send>>;
}

struct TaskCore<B: TaskBody> {
    body: Mutex<B>,
    completion: Completion<B::Output>,
    /// Set while suspended; taken by the resume.
    awaited: Mutex<Option<AwaitableRef<B::Input>>>,
    executor: OnceLock<ExecutorRef>,
    header: StateHeader,
    metadata: Option<Arc<CoroutineMetadata>>,
}

impl<B: TaskBody> TaskCore<B> {
    fn run_step(self: Arc<Self>, state: u32, resume: Resume<B::Input>) {
        let Some(executor) = self.executor.get() else {
            return;
        };
        self.header.run(state);
        let step = self.body.lock().step(state, resume, executor);
        match step {
            Step::Return(value) => self.finish(Ok(value), executor),
            Step::Throw(error) => self.finish(Err(error), executor),
            Step::Await { state, awaitable } => {
                let executor = Arc::clone(executor);
                self.suspend(state, awaitable, &executor);
            }
        }
    }

    fn finish(&self, outcome: Outcome<B::Output>, executor: &ExecutorRef) {
        self.header.complete();
        tracing::trace!(task = %Describe(self.metadata.as_deref()), ok = outcome.is_ok(), "task complete");
        self.completion.complete(outcome, Some(executor));
    }

    fn suspend(self: Arc<Self>, state: u32, awaitable: AwaitableRef<B::Input>, executor: &ExecutorRef) {
        *self.awaited.lock() = Some(Arc::clone(&awaitable));
        self.header.suspend(state);
        let metadata = self.metadata.as_deref();
        executor.on_suspend(Suspension {
            metadata,
            state,
            awaited: Some(&awaitable as &(dyn Any + Send + Sync)),
        });
        tracing::trace!(task = %Describe(metadata), state, "task suspended");

        let unwrapped = awaitable.is_unwrapped();
        let location = metadata.and_then(|m| m.location(state));
        let core = Arc::clone(&self);
        let continuation = Continuation::with_location(location, move |outcome| {
            core.resume(state, outcome, unwrapped);
        });
        awaitable.execute(executor, continuation);
    }

    fn resume(self: Arc<Self>, state: u32, outcome: Outcome<B::Input>, unwrapped: bool) {
        let Some(executor) = self.executor.get().cloned() else {
            return;
        };
        let awaited = self.awaited.lock().take();
        self.header.run(state);
        let suspension = Suspension {
            metadata: self.metadata.as_deref(),
            state,
            awaited: awaited.as_ref().map(|a| a as &(dyn Any + Send + Sync)),
        };
        let resume = match outcome {
            Ok(value) => {
                executor.on_resume(suspension);
                Resume::Value(value)
            }
            Err(error) => {
                executor.on_resume_error(suspension, &error);
                Resume::Error(error)
            }
        };
        let metadata = self.metadata.as_deref();
        tracing::trace!(task = %Describe(metadata), state, "task resumed");

        if unwrapped {
            self.run_step(state, resume);
        } else {
            executor.execute(Box::new(move || self.run_step(state, resume)));
        }
    }
}

impl<B: TaskBody> TaskHandle<B::Output> for TaskCore<B> {
    fn begin(self: Arc<Self>, executor: &ExecutorRef) -> bool {
        if self.executor.set(Arc::clone(executor)).is_err() {
            return false;
        }
        executor.execute(Box::new(move || self.run_step(0, Resume::Start)));
        true
    }

    fn completion(&self) -> &Completion<B::Output> {
        &self.completion
    }

    fn executor(&self) -> Option<&ExecutorRef> {
        self.executor.get()
    }

    fn lifecycle(&self) -> (Lifecycle, u32) {
        self.header.load()
    }

    fn metadata(&self) -> Option<&CoroutineMetadata> {
        self.metadata.as_deref()
    }

    fn awaited(&self) -> Option<Box<dyn Any + Send>> {
        let awaited = self.awaited.lock();
        awaited
            .as_ref()
            .map(|a| Box::new(Arc::clone(a)) as Box<dyn Any + Send>)
    }
}

/// A task that was created with its result.
struct Settled<T> {
    completion: Completion<T>,
}

impl<T: Clone + Send + Sync + 'static> TaskHandle<T> for Settled<T> {
    fn begin(self: Arc<Self>, _executor: &ExecutorRef) -> bool {
        false
    }

    fn completion(&self) -> &Completion<T> {
        &self.completion
    }

    fn executor(&self) -> Option<&ExecutorRef> {
        None
    }

    fn lifecycle(&self) -> (Lifecycle, u32) {
        (Lifecycle::Completed, 0)
    }

    fn metadata(&self) -> Option<&CoroutineMetadata> {
        None
    }

    fn awaited(&self) -> Option<Box<dyn Any + Send>> {
        None
    }
}

struct Describe<'a>(Option<&'a CoroutineMetadata>);

impl fmt::Display for Describe<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(metadata) => write!(f, "Task[{metadata}]"),
            None => f.write_str("Task"),
        }
    }
}

// =============================================================================
// Task
// =============================================================================

/// A running or completed asynchronous computation.
///
/// Cloning a task clones the handle; all clones observe the same result.
pub struct Task<T> {
    handle: Arc<dyn TaskHandle<T>>,
}

impl<T: Clone + Send + Sync + 'static> Task<T> {
    /// Wrap a state machine. The task does nothing until [`begin`](Self::begin).
    pub fn new<B>(body: B) -> Self
    where
        B: TaskBody<Output = T>,
    {
        let metadata = body.metadata();
        Self {
            handle: Arc::new(TaskCore {
                body: Mutex::new(body),
                completion: Completion::new(),
                awaited: Mutex::new(None),
                executor: OnceLock::new(),
                header: StateHeader::new(),
                metadata,
            }),
        }
    }

    /// Task driven by a closure `step(state, resume, executor)`.
    pub fn from_fn<I, F>(step: F) -> Self
    where
        I: Send + 'static,
        F: FnMut(u32, Resume<I>, &ExecutorRef) -> Step<T, I> + Send + 'static,
    {
        Self::new(FnBody {
            step,
            _types: std::marker::PhantomData,
        })
    }

    /// Task that is already completed with `value`.
    pub fn ready(value: T) -> Self {
        Self::settled(Ok(value))
    }

    /// Task that is already completed with `error`.
    pub fn failed(error: BoxError) -> Self {
        Self::settled(Err(error))
    }

    fn settled(outcome: Outcome<T>) -> Self {
        Self {
            handle: Arc::new(Settled {
                completion: Completion::completed(outcome),
            }),
        }
    }

    /// Bind the task to `executor` and schedule its first step.
    ///
    /// Only the first call has an effect; it returns true.
    pub fn begin(&self, executor: &ExecutorRef) -> bool {
        Arc::clone(&self.handle).begin(executor)
    }

    /// Run `continuation` with the result once the task completes.
    ///
    /// Continuations registered before completion run on the task's
    /// executor; later ones run immediately on the calling thread.
    pub fn on_complete(&self, continuation: Continuation<T>) {
        self.handle.completion().on_complete(continuation);
    }

    /// Result, if completed.
    pub fn result(&self) -> Option<Outcome<T>> {
        self.handle.completion().get().cloned()
    }

    /// Whether the task has completed.
    pub fn is_complete(&self) -> bool {
        self.handle.completion().is_complete()
    }

    /// Lifecycle and the state id the task last ran or suspended at.
    pub fn lifecycle(&self) -> (Lifecycle, u32) {
        self.handle.lifecycle()
    }

    /// The object the task is suspended on, if it is waiting.
    ///
    /// `I` is the input type of the task's body; any other type yields `None`.
    pub fn awaited<I: 'static>(&self) -> Option<AwaitableRef<I>> {
        let awaited = self.handle.awaited()?;
        awaited.downcast::<AwaitableRef<I>>().ok().map(|a| *a)
    }

    /// Executor the task is bound to.
    pub fn executor(&self) -> Option<ExecutorRef> {
        self.handle.executor().cloned()
    }

    /// Description of the underlying coroutine.
    pub fn metadata(&self) -> Option<&CoroutineMetadata> {
        self.handle.metadata()
    }

    /// Block the calling thread until the task completes.
    ///
    /// Fails with [`RuntimeError::NotStarted`] if the task was never begun;
    /// waiting on it would never return.
    pub fn wait(&self) -> Outcome<T> {
        if let Some(outcome) = self.result() {
            return outcome;
        }
        if self.handle.executor().is_none() {
            return Err(RuntimeError::NotStarted.boxed());
        }
        let (tx, rx) = mpsc::channel();
        self.on_complete(Continuation::new(move |outcome| {
            let _ = tx.send(outcome);
        }));
        rx.recv()
            .unwrap_or_else(|_| Err(RuntimeError::step_fault("task dropped its waiters").boxed()))
    }
}

impl<T: Clone + Send + Sync + 'static> Awaitable<T> for Task<T> {
    /// Start the task on the awaiting task's executor (if not started) and
    /// resume when it completes.
    fn execute(&self, executor: &ExecutorRef, continuation: Continuation<T>) {
        self.begin(executor);
        self.on_complete(continuation);
    }
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            handle: Arc::clone(&self.handle),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (lifecycle, state) = self.lifecycle();
        f.debug_struct("Task")
            .field("coroutine", &Describe(self.metadata()).to_string())
            .field("lifecycle", &lifecycle)
            .field("state", &state)
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> fmt::Display for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Describe(self.metadata()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::awaitable::{Deferred, ready, unwrapped};
    use crate::executor::{Executor, Job, eager, from_fn};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Awaits `awaitable` once, then returns the value plus `add`.
    fn adder(awaitable: AwaitableRef<i64>, add: i64) -> Task<i64> {
        Task::from_fn(move |state, resume, _| match (state, resume) {
            (0, Resume::Start) => Step::Await {
                state: 1,
                awaitable: Arc::clone(&awaitable),
            },
            (1, Resume::Value(v)) => Step::Return(v + add),
            (_, Resume::Error(e)) => Step::Throw(e),
            _ => Step::Throw(RuntimeError::step_fault("bad state").boxed()),
        })
    }

    #[test]
    fn test_begin_twice_has_one_winner() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let task: Task<i64> = Task::from_fn(move |_, _: Resume<i64>, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Step::Return(1)
        });
        let executor = eager();
        assert!(task.begin(&executor));
        assert!(!task.begin(&executor));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(task.lifecycle().0, Lifecycle::Completed);
    }

    #[test]
    fn test_await_ready_value() {
        let task = adder(ready(40), 2);
        task.begin(&eager());
        assert_eq!(task.result().and_then(Result::ok), Some(42));
    }

    #[test]
    fn test_error_resume_propagates() {
        let deferred = Deferred::new();
        let task = adder(deferred.awaitable(), 1);
        task.begin(&eager());
        assert_eq!(task.lifecycle(), (Lifecycle::Suspended, 1));
        deferred.fail(RuntimeError::message("upstream"));
        let error = task.result().unwrap().unwrap_err();
        assert_eq!(error.to_string(), "upstream");
    }

    #[test]
    fn test_resume_is_rescheduled_unless_unwrapped() {
        let queued = Arc::new(parking_lot::Mutex::new(Vec::<Job>::new()));
        let sink = Arc::clone(&queued);
        let executor = from_fn(move |job| sink.lock().push(job));
        let drain = || {
            let jobs: Vec<Job> = queued.lock().drain(..).collect();
            let n = jobs.len();
            for job in jobs {
                job();
            }
            n
        };

        let plain = Deferred::new();
        let task = adder(plain.awaitable(), 0);
        task.begin(&executor);
        assert_eq!(drain(), 1);
        plain.complete(5);
        assert!(!task.is_complete());
        assert!(task.awaited::<i64>().is_none());
        assert_eq!(task.lifecycle(), (Lifecycle::Running, 1));
        assert_eq!(drain(), 1);
        assert_eq!(task.result().and_then(Result::ok), Some(5));

        let inline = Deferred::new();
        let task = adder(unwrapped(inline.awaitable()), 0);
        task.begin(&executor);
        drain();
        inline.complete(6);
        assert_eq!(task.result().and_then(Result::ok), Some(6));
    }

    #[test]
    fn test_hooks_observe_suspend_and_resume() {
        #[derive(Default)]
        struct Counting {
            suspends: AtomicUsize,
            resumes: AtomicUsize,
            errors: AtomicUsize,
        }
        impl Executor for Counting {
            fn execute(&self, job: Job) {
                job();
            }
            fn on_suspend(&self, suspension: Suspension<'_>) {
                assert!(suspension.awaited.is_some_and(|a| a.is::<AwaitableRef<i64>>()));
                self.suspends.fetch_add(1, Ordering::SeqCst);
            }
            fn on_resume(&self, suspension: Suspension<'_>) {
                assert_eq!(suspension.state, 1);
                assert!(suspension.awaited.is_some());
                self.resumes.fetch_add(1, Ordering::SeqCst);
            }
            fn on_resume_error(&self, suspension: Suspension<'_>, _: &BoxError) {
                assert!(suspension.awaited.is_some());
                self.errors.fetch_add(1, Ordering::SeqCst);
            }
        }

        let counting = Arc::new(Counting::default());
        let executor: ExecutorRef = counting.clone();
        adder(ready(1), 1).begin(&executor);
        adder(crate::awaitable::failed(RuntimeError::message("x")), 1).begin(&executor);
        assert_eq!(counting.suspends.load(Ordering::SeqCst), 2);
        assert_eq!(counting.resumes.load(Ordering::SeqCst), 1);
        assert_eq!(counting.errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_awaited_object_is_recorded_until_resume() {
        let deferred = Deferred::new();
        let task = adder(deferred.awaitable(), 1);
        assert!(task.awaited::<i64>().is_none());

        task.begin(&eager());
        assert_eq!(task.lifecycle(), (Lifecycle::Suspended, 1));
        assert!(task.awaited::<i64>().is_some());
        assert!(task.awaited::<String>().is_none());

        deferred.complete(2);
        assert!(task.awaited::<i64>().is_none());
        assert_eq!(task.result().and_then(Result::ok), Some(3));
        assert!(Task::ready(1).awaited::<i64>().is_none());
    }

    #[test]
    fn test_wait_requires_begin() {
        let task = adder(ready(1), 1);
        assert!(task.wait().is_err());
        task.begin(&eager());
        assert_eq!(task.wait().ok(), Some(2));
    }

    #[test]
    fn test_settled_tasks() {
        let task = Task::ready(3);
        assert!(task.is_complete());
        assert!(!task.begin(&eager()));
        assert_eq!(task.wait().ok(), Some(3));
        let failed: Task<i32> = Task::failed(RuntimeError::message("nope"));
        assert!(failed.wait().is_err());
    }
}
