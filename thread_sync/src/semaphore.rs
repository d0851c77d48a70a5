//! Semaphore primitive
//!
//! A counting semaphore with a waiting list. [`Semaphore::wait_with_timeout`]
//! is the only timed wait offered by this crate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use core_types::{fatal, RuntimeError, RuntimeResult, ThreadRef};
use parking_lot::Condvar;

use crate::lists;
use crate::thread_record::ThreadRecord;

/// Highest count a semaphore can reach
pub const MAX_COUNT: u32 = i32::MAX as u32;

struct SemaphoreState {
    count: u32,
    waiters: Vec<ThreadRef>,
}

pub(crate) struct SemaphoreShared {
    pub(crate) name: String,
    traceable: bool,
    deleted: AtomicBool,
    state: parking_lot::Mutex<SemaphoreState>,
    posted: Condvar,
}

/// Point-in-time view of a semaphore for diagnostics
pub(crate) struct SemaphoreView {
    pub name: String,
    pub traceable: bool,
    pub value: u32,
    pub waiters: Vec<ThreadRef>,
}

impl SemaphoreShared {
    pub(crate) fn view(&self) -> SemaphoreView {
        let state = self.state.lock();
        SemaphoreView {
            name: self.name.clone(),
            traceable: self.traceable,
            value: state.count,
            waiters: state.waiters.clone(),
        }
    }
}

/// A named, diagnosable counting semaphore
///
/// Cloning yields another handle to the same semaphore.
#[derive(Clone)]
pub struct Semaphore {
    shared: Arc<SemaphoreShared>,
}

impl Semaphore {
    fn create(name: &str, initial_count: u32, traceable: bool) -> Self {
        if initial_count > MAX_COUNT {
            fatal!(
                "Semaphore '{}' initial count {} exceeds the maximum.",
                name,
                initial_count
            );
        }
        let shared = Arc::new(SemaphoreShared {
            name: crate::truncate_name(name),
            traceable,
            deleted: AtomicBool::new(false),
            state: parking_lot::Mutex::new(SemaphoreState {
                count: initial_count,
                waiters: Vec::new(),
            }),
            posted: Condvar::new(),
        });
        lists::add_semaphore(&shared);
        let semaphore = Self { shared };
        semaphore.trace("created");
        semaphore
    }

    /// Creates a semaphore with the given initial count
    pub fn new(name: &str, initial_count: u32) -> Self {
        Self::create(name, initial_count, false)
    }

    /// Creates a semaphore that traces every operation
    pub fn new_traceable(name: &str, initial_count: u32) -> Self {
        Self::create(name, initial_count, true)
    }

    /// Finds a live semaphore by name
    pub fn find(name: &str) -> Option<Self> {
        lists::semaphores()
            .into_iter()
            .find(|shared| shared.name == name && !shared.deleted.load(Ordering::Acquire))
            .map(|shared| Self { shared })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn is_traceable(&self) -> bool {
        self.shared.traceable
    }

    /// Current count
    pub fn value(&self) -> u32 {
        self.check_live();
        self.shared.state.lock().count
    }

    /// Threads currently blocked on this semaphore
    pub fn waiters(&self) -> Vec<ThreadRef> {
        self.shared.state.lock().waiters.clone()
    }

    fn check_live(&self) {
        if self.shared.deleted.load(Ordering::Acquire) {
            fatal!("Semaphore '{}' used after it was deleted.", self.shared.name);
        }
    }

    fn trace(&self, operation: &str) {
        if self.shared.traceable {
            tracing::trace!(
                semaphore = %self.shared.name,
                thread = %ThreadRef::current(),
                operation,
                "semaphore"
            );
        }
    }

    /// Decrements the count, blocking while it is zero
    pub fn wait(&self) {
        self.check_live();
        self.trace("waiting");

        let me = ThreadRef::current();
        let record = ThreadRecord::current();
        let mut state = self.shared.state.lock();

        state.waiters.push(me.clone());
        record.set_waiting_on_semaphore(Some(Arc::clone(&self.shared)));

        while state.count == 0 {
            self.shared.posted.wait(&mut state);
        }
        state.count -= 1;

        remove_waiter(&mut state.waiters, &me);
        record.set_waiting_on_semaphore(None);
        drop(state);

        self.trace("acquired");
    }

    /// Decrements the count if it is positive
    pub fn try_wait(&self) -> RuntimeResult {
        self.check_live();

        let mut state = self.shared.state.lock();
        if state.count == 0 {
            drop(state);
            self.trace("try-wait busy");
            return Err(RuntimeError::WouldBlock);
        }
        state.count -= 1;
        drop(state);

        self.trace("acquired");
        Ok(())
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`
    ///
    /// On `Err(Timeout)` the count is unchanged.
    pub fn wait_with_timeout(&self, timeout: Duration) -> RuntimeResult {
        self.check_live();
        self.trace("waiting");

        let deadline = Instant::now() + timeout;
        let me = ThreadRef::current();
        let record = ThreadRecord::current();
        let mut state = self.shared.state.lock();

        state.waiters.push(me.clone());
        record.set_waiting_on_semaphore(Some(Arc::clone(&self.shared)));

        let mut acquired = true;
        while state.count == 0 {
            if self
                .shared
                .posted
                .wait_until(&mut state, deadline)
                .timed_out()
                && state.count == 0
            {
                acquired = false;
                break;
            }
        }
        if acquired {
            state.count -= 1;
        }

        remove_waiter(&mut state.waiters, &me);
        record.set_waiting_on_semaphore(None);
        drop(state);

        if acquired {
            self.trace("acquired");
            Ok(())
        } else {
            self.trace("timed out");
            Err(RuntimeError::Timeout)
        }
    }

    /// Increments the count and wakes one waiter
    pub fn post(&self) {
        self.check_live();

        let mut state = self.shared.state.lock();
        if state.count >= MAX_COUNT {
            drop(state);
            fatal!("Semaphore '{}' count overflow on post.", self.shared.name);
        }
        state.count += 1;
        self.shared.posted.notify_one();
        drop(state);

        self.trace("posted");
    }

    /// Removes the semaphore from the process-wide list
    ///
    /// Deleting a semaphore that threads are waiting on is fatal.
    pub fn delete(self) {
        self.check_live();
        {
            let state = self.shared.state.lock();
            if !state.waiters.is_empty() {
                drop(state);
                fatal!(
                    "Semaphore '{}' deleted while threads are still waiting for it!",
                    self.shared.name
                );
            }
        }
        self.shared.deleted.store(true, Ordering::Release);
        lists::remove_semaphore(&self.shared);
        self.trace("deleted");
    }
}

fn remove_waiter(waiters: &mut Vec<ThreadRef>, me: &ThreadRef) {
    if let Some(pos) = waiters.iter().position(|waiter| waiter == me) {
        waiters.remove(pos);
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let view = self.shared.view();
        f.debug_struct("Semaphore")
            .field("name", &view.name)
            .field("value", &view.value)
            .field("waiters", &view.waiters)
            .finish()
    }
}
