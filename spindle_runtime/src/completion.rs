//! Single-assignment result cell with a lock-free waiter stack.
//!
//! # Waiter Stack
//!
//! ```text
//!   waiters ──► [k3] ──► [k2] ──► [k1] ──► NIL      (pending)
//!   waiters ──► null                                (completed, detached)
//! ```
//!
//! `on_complete` pushes with a CAS loop. `complete` stores the result (first
//! writer wins), then swaps the head to null, which detaches the whole stack
//! in one step and marks the cell as completed for later arrivals. A waiter
//! that finds the head already null runs immediately with the stored result.
//! Nodes are never popped individually, so the stack is free of ABA.

use crate::continuation::Continuation;
use crate::error::Outcome;
use crate::executor::ExecutorRef;
use std::marker::PhantomData;
use std::ptr;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Terminator of a pending stack. Only its address is used.
static NIL: u8 = 0;

#[inline]
fn nil<T>() -> *mut Waiter<T> {
    (&raw const NIL).cast::<Waiter<T>>().cast_mut()
}

struct Waiter<T> {
    continuation: Continuation<T>,
    next: *mut Waiter<T>,
}

/// A result that is set once and observed by every waiter exactly once.
pub struct Completion<T> {
    result: OnceLock<Outcome<T>>,
    waiters: AtomicPtr<Waiter<T>>,
    _owns: PhantomData<Box<Waiter<T>>>,
}

impl<T: Clone + Send + 'static> Completion<T> {
    /// Empty cell.
    pub fn new() -> Self {
        Self {
            result: OnceLock::new(),
            waiters: AtomicPtr::new(nil()),
            _owns: PhantomData,
        }
    }

    /// Cell that is already completed.
    pub fn completed(outcome: Outcome<T>) -> Self {
        let cell = Self::new();
        let _ = cell.result.set(outcome);
        cell.waiters.store(ptr::null_mut(), Ordering::Release);
        cell
    }

    /// Store the result and release every waiter.
    ///
    /// Returns false (and drops `outcome`) if a result was already stored.
    /// Waiters are resumed through `dispatch` when given, inline otherwise.
    pub fn complete(&self, outcome: Outcome<T>, dispatch: Option<&ExecutorRef>) -> bool {
        if self.result.set(outcome).is_err() {
            return false;
        }
        let Some(result) = self.result.get() else {
            return false;
        };

        let mut head = self.waiters.swap(ptr::null_mut(), Ordering::AcqRel);
        let mut released = 0usize;
        while !head.is_null() && head != nil() {
            // SAFETY: every node was leaked by `on_complete` and is reachable
            // only from the stack we just detached, so we own it exclusively.
            let node = unsafe { Box::from_raw(head) };
            head = node.next;
            deliver(node.continuation, result.clone(), dispatch);
            released += 1;
        }
        tracing::trace!(waiters = released, ok = result.is_ok(), "completed");
        true
    }

    /// Run `continuation` once the result is available.
    ///
    /// If the cell is already completed, the continuation runs immediately
    /// on the calling thread.
    pub fn on_complete(&self, continuation: Continuation<T>) {
        let node = Box::into_raw(Box::new(Waiter {
            continuation,
            next: nil(),
        }));
        let mut head = self.waiters.load(Ordering::Acquire);
        loop {
            if head.is_null() {
                // SAFETY: the node was never published.
                let node = unsafe { Box::from_raw(node) };
                if let Some(result) = self.result.get() {
                    deliver(node.continuation, result.clone(), None);
                }
                return;
            }
            // SAFETY: the node is still private to this thread.
            unsafe { (*node).next = head };
            match self
                .waiters
                .compare_exchange_weak(head, node, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(actual) => head = actual,
            }
        }
    }

    /// Stored result, if any.
    #[inline]
    pub fn get(&self) -> Option<&Outcome<T>> {
        self.result.get()
    }

    /// Whether a result was stored.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.result.get().is_some()
    }
}

impl<T: Clone + Send + 'static> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        let mut head = *self.waiters.get_mut();
        let terminator = nil::<T>();
        while !head.is_null() && head != terminator {
            // SAFETY: `&mut self` means no other thread can touch the stack.
            let node = unsafe { Box::from_raw(head) };
            head = node.next;
        }
    }
}

// SAFETY: the raw node pointers are owned by the cell; every node holds a
// `Continuation<T>`, which is `Send + Sync` when `T: Send`.
unsafe impl<T: Send> Send for Completion<T> {}
// SAFETY: shared access only pushes through CAS, detaches through swap and
// reads the result through `OnceLock`, which requires `T: Sync` for `&T`.
unsafe impl<T: Send + Sync> Sync for Completion<T> {}

fn deliver<T: Send + 'static>(
    continuation: Continuation<T>,
    outcome: Outcome<T>,
    dispatch: Option<&ExecutorRef>,
) {
    match dispatch {
        Some(executor) => executor.execute(Box::new(move || {
            continuation.settle(outcome);
        })),
        None => {
            continuation.settle(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn counter(hits: &Arc<AtomicUsize>, expect: i32) -> Continuation<i32> {
        let hits = Arc::clone(hits);
        Continuation::new(move |o: Outcome<i32>| {
            assert_eq!(o.ok(), Some(expect));
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_first_complete_wins() {
        let cell = Completion::new();
        assert!(cell.complete(Ok(1), None));
        assert!(!cell.complete(Ok(2), None));
        assert!(!cell.complete(Err(RuntimeError::message("late")), None));
        assert_eq!(cell.get().and_then(|o| o.as_ref().ok()).copied(), Some(1));
    }

    #[test]
    fn test_waiters_released_once() {
        let cell = Completion::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            cell.on_complete(counter(&hits, 9));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        cell.complete(Ok(9), None);
        assert_eq!(hits.load(Ordering::SeqCst), 5);
        cell.complete(Ok(10), None);
        assert_eq!(hits.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_late_waiter_runs_immediately() {
        let cell = Completion::new();
        cell.complete(Ok(4), None);
        let hits = Arc::new(AtomicUsize::new(0));
        cell.on_complete(counter(&hits, 4));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_completed_constructor() {
        let cell = Completion::completed(Ok(3));
        let hits = Arc::new(AtomicUsize::new(0));
        cell.on_complete(counter(&hits, 3));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_frees_pending_waiters() {
        let cell: Completion<i32> = Completion::new();
        let hits = Arc::new(AtomicUsize::new(0));
        cell.on_complete(counter(&hits, 0));
        drop(cell);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_concurrent_waiters_and_completion() {
        for _ in 0..20 {
            let cell = Arc::new(Completion::new());
            let hits = Arc::new(AtomicUsize::new(0));
            let mut threads = Vec::new();
            for _ in 0..4 {
                let cell = Arc::clone(&cell);
                let hits = Arc::clone(&hits);
                threads.push(thread::spawn(move || {
                    for _ in 0..25 {
                        cell.on_complete(counter(&hits, 11));
                    }
                }));
            }
            let completer = {
                let cell = Arc::clone(&cell);
                thread::spawn(move || cell.complete(Ok(11), None))
            };
            for t in threads {
                t.join().unwrap();
            }
            assert!(completer.join().unwrap());
            assert_eq!(hits.load(Ordering::SeqCst), 100);
        }
    }
}
