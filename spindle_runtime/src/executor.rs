//! Executors.
//!
//! An [`Executor`] decides where the steps of a task run. The runtime never
//! blocks inside a step: a step runs until its next suspend point, hands the
//! awaited object a continuation and returns. Whichever thread later resumes
//! the continuation submits the next step back to the task's executor.
//!
//! Two implementations ship with the runtime:
//! - [`Eager`] runs every job inline on the submitting thread;
//! - [`ThreadPool`] runs jobs on worker threads with work-stealing deques.
//!
//! # Thread Pool
//!
//! ```text
//!                       ┌──────────────────────┐
//!   execute(job) ─────► │   Global Injector    │
//!                       └──────────┬───────────┘
//!                                  │ steal_batch_and_pop
//!          ┌───────────────────────┼───────────────────────┐
//!          ▼                       ▼                       ▼
//!   ┌─────────────┐         ┌─────────────┐         ┌─────────────┐
//!   │  Worker 0   │ ◄─────► │  Worker 1   │ ◄─────► │  Worker N   │
//!   │ local deque │  steal  │ local deque │  steal  │ local deque │
//!   └─────────────┘         └─────────────┘         └─────────────┘
//! ```
//!
//! Idle workers park on a condition variable with a short timeout and are
//! woken by `execute`.

use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use parking_lot::{Condvar, Mutex};
use spindle_core::CoroutineMetadata;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::BoxError;

/// A unit of work submitted to an executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Shared executor handle.
pub type ExecutorRef = Arc<dyn Executor>;

/// What a hook is told about a suspending or resuming task.
#[derive(Clone, Copy)]
pub struct Suspension<'a> {
    /// Metadata of the coroutine, when it has any.
    pub metadata: Option<&'a CoroutineMetadata>,
    /// State id the task suspends at or resumes from.
    pub state: u32,
    /// The awaited object, an `AwaitableRef<I>` for the task's input type
    /// `I`. Downcast it to inspect what the task waits for.
    pub awaited: Option<&'a (dyn Any + Send + Sync)>,
}

impl fmt::Debug for Suspension<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspension")
            .field("coroutine", &self.metadata.map(ToString::to_string))
            .field("state", &self.state)
            .field("awaiting", &self.awaited.is_some())
            .finish()
    }
}

/// Runs jobs and observes suspension.
///
/// The hooks receive the [`Suspension`] of the task: its metadata, the
/// state id and the object it waits for. They default to no-ops.
pub trait Executor: Send + Sync {
    /// Run `job`, now or later, on any thread.
    fn execute(&self, job: Job);

    /// A task bound to this executor suspended.
    fn on_suspend(&self, suspension: Suspension<'_>) {
        let _ = suspension;
    }

    /// A task bound to this executor is being resumed with a value.
    fn on_resume(&self, suspension: Suspension<'_>) {
        let _ = suspension;
    }

    /// A task bound to this executor is being resumed with an error.
    fn on_resume_error(&self, suspension: Suspension<'_>, error: &BoxError) {
        let _ = (suspension, error);
    }
}

// =============================================================================
// Inline Executors
// =============================================================================

/// Runs every job immediately on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Eager;

impl Executor for Eager {
    #[inline]
    fn execute(&self, job: Job) {
        job();
    }
}

/// Shared handle to the inline executor.
pub fn eager() -> ExecutorRef {
    Arc::new(Eager)
}

/// Executor backed by an arbitrary job sink.
pub struct FnExecutor<F> {
    sink: F,
}

impl<F> Executor for FnExecutor<F>
where
    F: Fn(Job) + Send + Sync,
{
    fn execute(&self, job: Job) {
        (self.sink)(job);
    }
}

impl<F> fmt::Debug for FnExecutor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnExecutor")
    }
}

/// Adapt a job sink into an executor.
pub fn from_fn<F>(sink: F) -> ExecutorRef
where
    F: Fn(Job) + Send + Sync + 'static,
{
    Arc::new(FnExecutor { sink })
}

// =============================================================================
// Pool Statistics
// =============================================================================

/// Counters maintained by a [`ThreadPool`].
#[derive(Debug, Default)]
struct PoolStats {
    executed: AtomicUsize,
    steal_attempts: AtomicUsize,
    steal_successes: AtomicUsize,
    panics: AtomicUsize,
}

/// Point-in-time copy of pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatsSnapshot {
    /// Jobs run to completion (or panic).
    pub executed: usize,
    /// Attempts to steal from a sibling worker.
    pub steal_attempts: usize,
    /// Successful steals from a sibling worker.
    pub steal_successes: usize,
    /// Jobs that panicked.
    pub panics: usize,
}

// =============================================================================
// Thread Pool
// =============================================================================

struct PoolShared {
    injector: Injector<Job>,
    stealers: Vec<Stealer<Job>>,
    shutdown: AtomicBool,
    sleep: Mutex<()>,
    wakeup: Condvar,
    stats: PoolStats,
}

impl PoolShared {
    /// Next job for worker `index`: local deque, then the injector, then
    /// siblings.
    fn find_job(&self, index: usize, local: &Worker<Job>) -> Option<Job> {
        if let Some(job) = local.pop() {
            return Some(job);
        }

        loop {
            match self.injector.steal_batch_and_pop(local) {
                Steal::Success(job) => return Some(job),
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }

        for (i, stealer) in self.stealers.iter().enumerate() {
            if i == index {
                continue;
            }
            self.stats.steal_attempts.fetch_add(1, Ordering::Relaxed);
            loop {
                match stealer.steal() {
                    Steal::Success(job) => {
                        self.stats.steal_successes.fetch_add(1, Ordering::Relaxed);
                        return Some(job);
                    }
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }
        }

        None
    }

    fn run_worker(&self, index: usize, local: Worker<Job>) {
        tracing::trace!(worker = index, "worker started");
        loop {
            if let Some(job) = self.find_job(index, &local) {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    self.stats.panics.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(worker = index, "job panicked");
                }
                self.stats.executed.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            let mut guard = self.sleep.lock();
            if self.injector.is_empty() && !self.shutdown.load(Ordering::Acquire) {
                self.wakeup.wait_for(&mut guard, Duration::from_millis(10));
            }
        }
        tracing::trace!(worker = index, "worker stopped");
    }
}

/// Work-stealing thread pool.
///
/// Dropping the pool lets workers drain the queued jobs, then joins them.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPool {
    /// Spawn a pool with `threads` workers (at least one).
    pub fn new(threads: usize) -> std::io::Result<Self> {
        let threads = threads.max(1);
        let workers: Vec<Worker<Job>> = (0..threads).map(|_| Worker::new_fifo()).collect();
        let shared = Arc::new(PoolShared {
            injector: Injector::new(),
            stealers: workers.iter().map(Worker::stealer).collect(),
            shutdown: AtomicBool::new(false),
            sleep: Mutex::new(()),
            wakeup: Condvar::new(),
            stats: PoolStats::default(),
        });

        let mut handles = Vec::with_capacity(threads);
        for (index, local) in workers.into_iter().enumerate() {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("spindle-worker-{index}"))
                .spawn(move || shared.run_worker(index, local))?;
            handles.push(handle);
        }

        Ok(Self {
            shared,
            threads: Mutex::new(handles),
        })
    }

    /// Spawn a pool sized to the available parallelism.
    pub fn with_default_threads() -> std::io::Result<Self> {
        let threads = thread::available_parallelism().map_or(4, usize::from);
        Self::new(threads)
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.shared.stealers.len()
    }

    /// Current counters.
    pub fn stats(&self) -> PoolStatsSnapshot {
        let stats = &self.shared.stats;
        PoolStatsSnapshot {
            executed: stats.executed.load(Ordering::Relaxed),
            steal_attempts: stats.steal_attempts.load(Ordering::Relaxed),
            steal_successes: stats.steal_successes.load(Ordering::Relaxed),
            panics: stats.panics.load(Ordering::Relaxed),
        }
    }
}

impl Executor for ThreadPool {
    fn execute(&self, job: Job) {
        self.shared.injector.push(job);
        self.shared.wakeup.notify_one();
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("threads", &self.threads())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.wakeup.notify_all();

        // The last handle may be dropped by a job running on a worker.
        let current = thread::current().id();
        for handle in self.threads.get_mut().drain(..) {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::warn!("worker thread panicked outside a job");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_eager_runs_inline() {
        let hit = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&hit);
        eager().execute(Box::new(move || flag.store(true, Ordering::SeqCst)));
        assert!(hit.load(Ordering::SeqCst));
    }

    #[test]
    fn test_from_fn_forwards_jobs() {
        let queued = Arc::new(Mutex::new(Vec::<Job>::new()));
        let sink = Arc::clone(&queued);
        let executor = from_fn(move |job| sink.lock().push(job));

        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = Arc::clone(&count);
            executor.execute(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
        for job in queued.lock().drain(..) {
            job();
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_pool_runs_all_jobs() {
        let pool = ThreadPool::new(4).unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..100 {
            let tx = tx.clone();
            pool.execute(Box::new(move || tx.send(i).unwrap()));
        }
        drop(tx);
        let mut seen: Vec<i32> = rx.iter().take(100).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_pool_survives_panicking_job() {
        let pool = ThreadPool::new(1).unwrap();
        pool.execute(Box::new(|| panic!("job failure")));
        let (tx, rx) = mpsc::channel();
        pool.execute(Box::new(move || tx.send(7).unwrap()));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(7));
        drop(pool);
    }

    #[test]
    fn test_drop_drains_queue() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let pool = ThreadPool::new(2).unwrap();
            for _ in 0..50 {
                let count = Arc::clone(&count);
                pool.execute(Box::new(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                }));
            }
        }
        assert_eq!(count.load(Ordering::SeqCst), 50);
    }
}
