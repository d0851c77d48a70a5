//! # Event Loop
//!
//! Per-thread task queues used to run callbacks on the thread that owns a
//! session or service.
//!
//! ## Philosophy
//!
//! - **Thread affinity is explicit**: work for a thread is posted to its
//!   [`LoopHandle`]; nothing runs on a thread unless that thread pumps its loop.
//! - **FIFO**: tasks run in the order they were posted.
//! - **No timers**: the loop only orders callbacks. Timeouts apply to waiting
//!   for the next task, not to the tasks themselves.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use core_types::{fatal, ThreadRef};
use parking_lot::{Condvar, Mutex};

/// A unit of work queued on a loop
pub type Task = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static CURRENT: LoopHandle = LoopHandle::for_current_thread();
}

#[derive(Default)]
struct LoopState {
    tasks: VecDeque<Task>,
    stop_requested: bool,
}

struct LoopShared {
    thread: ThreadRef,
    state: Mutex<LoopState>,
    ready: Condvar,
}

/// Handle to one thread's event loop
///
/// Handles can be cloned and sent to other threads; only the owning thread may
/// run the loop.
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<LoopShared>,
}

/// Returns the calling thread's loop, creating it on first use
pub fn current() -> LoopHandle {
    CURRENT.with(LoopHandle::clone)
}

/// Runs every task queued on the calling thread's loop
pub fn run_pending() -> usize {
    current().run_pending()
}

/// Runs at most one task on the calling thread's loop
pub fn run_once(timeout: Duration) -> bool {
    current().run_once(timeout)
}

/// Pumps the calling thread's loop until `predicate` holds or `timeout` passes
pub fn run_until(predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
    current().run_until(predicate, timeout)
}

/// Pumps the calling thread's loop until [`LoopHandle::stop`] is called
pub fn run() {
    current().run()
}

impl LoopHandle {
    fn for_current_thread() -> Self {
        Self {
            shared: Arc::new(LoopShared {
                thread: ThreadRef::current(),
                state: Mutex::new(LoopState::default()),
                ready: Condvar::new(),
            }),
        }
    }

    /// Thread that owns this loop
    pub fn thread(&self) -> &ThreadRef {
        &self.shared.thread
    }

    /// Checks whether the calling thread owns this loop
    pub fn is_current(&self) -> bool {
        self.shared.thread.is_current()
    }

    /// Number of queued tasks
    pub fn pending(&self) -> usize {
        self.shared.state.lock().tasks.len()
    }

    /// Queues a task to run on the owning thread
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        let mut state = self.shared.state.lock();
        state.tasks.push_back(Box::new(task));
        self.shared.ready.notify_one();
    }

    /// Asks a running [`run`](Self::run) to return
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        state.stop_requested = true;
        self.shared.ready.notify_one();
    }

    fn check_owner(&self) {
        if !self.is_current() {
            fatal!(
                "Thread '{}' attempted to run the event loop of thread '{}'.",
                ThreadRef::current(),
                self.shared.thread
            );
        }
    }

    fn pop(&self) -> Option<Task> {
        self.shared.state.lock().tasks.pop_front()
    }

    fn wait_for_task(&self, deadline: Instant) -> Option<Task> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(task) = state.tasks.pop_front() {
                return Some(task);
            }
            if self
                .shared
                .ready
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.tasks.pop_front();
            }
        }
    }

    /// Runs queued tasks until the queue is empty, including tasks posted by
    /// the tasks themselves. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        self.check_owner();
        let mut ran = 0;
        while let Some(task) = self.pop() {
            task();
            ran += 1;
        }
        ran
    }

    /// Waits up to `timeout` for a task and runs it
    pub fn run_once(&self, timeout: Duration) -> bool {
        self.check_owner();
        match self.wait_for_task(Instant::now() + timeout) {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs tasks until `predicate` holds or `timeout` passes
    ///
    /// Returns the final value of `predicate`.
    pub fn run_until(&self, mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
        self.check_owner();
        let deadline = Instant::now() + timeout;
        loop {
            self.run_pending();
            if predicate() {
                return true;
            }
            match self.wait_for_task(deadline) {
                Some(task) => task(),
                None => return predicate(),
            }
        }
    }

    /// Runs tasks until [`stop`](Self::stop) is called
    pub fn run(&self) {
        self.check_owner();
        tracing::debug!(thread = %self.shared.thread, "event loop running");
        loop {
            let task = {
                let mut state = self.shared.state.lock();
                loop {
                    if let Some(task) = state.tasks.pop_front() {
                        break Some(task);
                    }
                    if state.stop_requested {
                        state.stop_requested = false;
                        break None;
                    }
                    self.shared.ready.wait(&mut state);
                }
            };
            match task {
                Some(task) => task(),
                None => break,
            }
        }
        tracing::debug!(thread = %self.shared.thread, "event loop stopped");
    }
}

impl PartialEq for LoopHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for LoopHandle {}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("thread", &self.shared.thread)
            .field("pending", &self.pending())
            .finish()
    }
}
