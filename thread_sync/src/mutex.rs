//! Mutex primitive
//!
//! A mutex is owned by the thread that locked it. Recursive mutexes count
//! nested locks by the owner; non-recursive ones treat a relock by the owner
//! as a deadlock. While a thread blocks in [`Mutex::lock`] it appears on the
//! mutex's waiting list and its [`ThreadRecord`] names the mutex.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use core_types::{fatal, RuntimeError, RuntimeResult, ThreadRef};
use parking_lot::Condvar;

use crate::lists;
use crate::thread_record::ThreadRecord;

#[derive(Default)]
struct MutexState {
    owner: Option<ThreadRef>,
    lock_count: u32,
    waiters: Vec<ThreadRef>,
}

pub(crate) struct MutexShared {
    pub(crate) name: String,
    recursive: bool,
    traceable: bool,
    deleted: AtomicBool,
    state: parking_lot::Mutex<MutexState>,
    released: Condvar,
}

/// Point-in-time view of a mutex for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MutexView {
    pub name: String,
    pub recursive: bool,
    pub traceable: bool,
    pub lock_count: u32,
    pub owner: Option<ThreadRef>,
    pub waiters: Vec<ThreadRef>,
}

impl MutexShared {
    pub(crate) fn view(&self) -> MutexView {
        let state = self.state.lock();
        MutexView {
            name: self.name.clone(),
            recursive: self.recursive,
            traceable: self.traceable,
            lock_count: state.lock_count,
            owner: state.owner.clone(),
            waiters: state.waiters.clone(),
        }
    }
}

/// A named, diagnosable mutex
///
/// Cloning yields another handle to the same mutex.
#[derive(Clone)]
pub struct Mutex {
    shared: Arc<MutexShared>,
}

impl Mutex {
    fn create(name: &str, recursive: bool, traceable: bool) -> Self {
        let shared = Arc::new(MutexShared {
            name: crate::truncate_name(name),
            recursive,
            traceable,
            deleted: AtomicBool::new(false),
            state: parking_lot::Mutex::new(MutexState::default()),
            released: Condvar::new(),
        });
        lists::add_mutex(&shared);
        let mutex = Self { shared };
        mutex.trace("created");
        mutex
    }

    /// Creates a mutex the owner may lock more than once
    pub fn new_recursive(name: &str) -> Self {
        Self::create(name, true, false)
    }

    /// Creates a mutex that may be locked once at a time
    pub fn new_non_recursive(name: &str) -> Self {
        Self::create(name, false, false)
    }

    /// Creates a recursive mutex that traces every operation
    pub fn new_traceable_recursive(name: &str) -> Self {
        Self::create(name, true, true)
    }

    /// Creates a non-recursive mutex that traces every operation
    pub fn new_traceable_non_recursive(name: &str) -> Self {
        Self::create(name, false, true)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn is_recursive(&self) -> bool {
        self.shared.recursive
    }

    pub fn is_traceable(&self) -> bool {
        self.shared.traceable
    }

    /// Number of outstanding locks held by the owner
    pub fn lock_count(&self) -> u32 {
        self.shared.state.lock().lock_count
    }

    /// Thread currently holding the mutex
    pub fn owner(&self) -> Option<ThreadRef> {
        self.shared.state.lock().owner.clone()
    }

    /// Threads currently blocked in [`lock`](Self::lock)
    pub fn waiters(&self) -> Vec<ThreadRef> {
        self.shared.state.lock().waiters.clone()
    }

    fn check_live(&self) {
        if self.shared.deleted.load(Ordering::Acquire) {
            fatal!("Mutex '{}' used after it was deleted.", self.shared.name);
        }
    }

    fn trace(&self, operation: &str) {
        if self.shared.traceable {
            tracing::trace!(
                mutex = %self.shared.name,
                thread = %ThreadRef::current(),
                operation,
                "mutex"
            );
        }
    }

    /// Locks the mutex, blocking until it is available
    pub fn lock(&self) {
        self.check_live();
        self.trace("locking");

        let me = ThreadRef::current();
        let record = ThreadRecord::current();
        let mut state = self.shared.state.lock();

        if state.owner.as_ref() == Some(&me) {
            if self.shared.recursive {
                state.lock_count += 1;
                drop(state);
                self.trace("relocked");
                return;
            }
            drop(state);
            fatal!(
                "DEADLOCK DETECTED! Thread '{}' attempting to re-lock mutex '{}'.",
                me,
                self.shared.name
            );
        }

        state.waiters.push(me.clone());
        record.set_waiting_on_mutex(Some(Arc::clone(&self.shared)));

        while state.owner.is_some() {
            self.shared.released.wait(&mut state);
        }

        if let Some(pos) = state.waiters.iter().position(|waiter| *waiter == me) {
            state.waiters.remove(pos);
        }
        record.set_waiting_on_mutex(None);

        state.owner = Some(me);
        state.lock_count = 1;
        record.push_held(Arc::clone(&self.shared));
        drop(state);

        self.trace("locked");
    }

    /// Locks the mutex if that can be done without blocking
    ///
    /// Returns `Err(WouldBlock)` when another thread holds it, or when the
    /// caller already holds a non-recursive mutex.
    pub fn try_lock(&self) -> RuntimeResult {
        self.check_live();

        let me = ThreadRef::current();
        let mut state = self.shared.state.lock();

        match &state.owner {
            None => {
                state.owner = Some(me);
                state.lock_count = 1;
                ThreadRecord::current().push_held(Arc::clone(&self.shared));
            }
            Some(owner) if *owner == me && self.shared.recursive => {
                state.lock_count += 1;
            }
            Some(_) => {
                drop(state);
                self.trace("try-lock busy");
                return Err(RuntimeError::WouldBlock);
            }
        }
        drop(state);

        self.trace("locked");
        Ok(())
    }

    /// Releases one lock held by the calling thread
    pub fn unlock(&self) {
        self.check_live();

        let me = ThreadRef::current();
        let mut state = self.shared.state.lock();

        if state.lock_count == 0 {
            drop(state);
            fatal!("Mutex '{}' unlocked too many times!", self.shared.name);
        }

        match &state.owner {
            Some(owner) if *owner == me => {}
            Some(owner) => {
                let owner = owner.clone();
                drop(state);
                fatal!(
                    "Attempt to unlock mutex '{}' held by other thread '{}'.",
                    self.shared.name,
                    owner
                );
            }
            None => {
                drop(state);
                fatal!("Mutex '{}' unlocked too many times!", self.shared.name);
            }
        }

        state.lock_count -= 1;
        if state.lock_count == 0 {
            ThreadRecord::current().remove_held(&self.shared);
            state.owner = None;
            self.shared.released.notify_one();
        }
        drop(state);

        self.trace("unlocked");
    }

    /// Locks the mutex and returns a guard that unlocks it on drop
    pub fn lock_guard(&self) -> MutexGuard<'_> {
        self.lock();
        MutexGuard { mutex: self }
    }

    /// Removes the mutex from the process-wide list
    ///
    /// Deleting a locked mutex is fatal. Any other handle used afterwards is
    /// fatal too.
    pub fn delete(self) {
        self.check_live();
        {
            let state = self.shared.state.lock();
            if let Some(owner) = &state.owner {
                let owner = owner.clone();
                drop(state);
                fatal!(
                    "Mutex '{}' deleted while still locked by thread '{}'!",
                    self.shared.name,
                    owner
                );
            }
        }
        self.shared.deleted.store(true, Ordering::Release);
        lists::remove_mutex(&self.shared);
        self.trace("deleted");
    }
}

impl std::fmt::Debug for Mutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let view = self.shared.view();
        f.debug_struct("Mutex")
            .field("name", &view.name)
            .field("recursive", &view.recursive)
            .field("lock_count", &view.lock_count)
            .field("owner", &view.owner)
            .field("waiters", &view.waiters)
            .finish()
    }
}

/// Unlocks the mutex when dropped
pub struct MutexGuard<'a> {
    mutex: &'a Mutex,
}

impl MutexGuard<'_> {
    pub fn mutex(&self) -> &Mutex {
        self.mutex
    }
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    // ===== Ownership =====

    #[test]
    fn test_lock_records_owner() {
        let mutex = Mutex::new_non_recursive("owner-test");
        mutex.lock();

        assert_eq!(mutex.owner(), Some(ThreadRef::current()));
        assert_eq!(mutex.lock_count(), 1);
        assert_eq!(
            ThreadRecord::current().held_mutexes(),
            vec!["owner-test".to_string()]
        );

        mutex.unlock();
        assert_eq!(mutex.owner(), None);
        assert_eq!(mutex.lock_count(), 0);
        assert!(ThreadRecord::current().held_mutexes().is_empty());
        mutex.delete();
    }

    #[test]
    fn test_held_stack_tracks_nesting() {
        let outer = Mutex::new_non_recursive("outer");
        let inner = Mutex::new_non_recursive("inner");
        outer.lock();
        inner.lock();
        assert_eq!(
            ThreadRecord::current().held_mutexes(),
            vec!["outer".to_string(), "inner".to_string()]
        );

        outer.unlock();
        assert_eq!(
            ThreadRecord::current().held_mutexes(),
            vec!["inner".to_string()]
        );
        inner.unlock();
    }

    #[test]
    #[should_panic(expected = "held by other thread")]
    fn test_unlock_by_non_owner_is_fatal() {
        let mutex = Mutex::new_non_recursive("foreign");
        let remote = mutex.clone();
        std::thread::spawn(move || remote.lock()).join().unwrap();

        mutex.unlock();
    }

    #[test]
    #[should_panic(expected = "unlocked too many times")]
    fn test_unlock_unlocked_is_fatal() {
        let mutex = Mutex::new_recursive("overrun");
        mutex.lock();
        mutex.unlock();
        mutex.unlock();
    }

    // ===== Recursion =====

    #[test]
    fn test_recursive_lock_counts() {
        let mutex = Mutex::new_recursive("nested");
        for expected in 1..=4 {
            mutex.lock();
            assert_eq!(mutex.lock_count(), expected);
        }
        for expected in (0..4).rev() {
            mutex.unlock();
            assert_eq!(mutex.lock_count(), expected);
        }
        assert_eq!(mutex.owner(), None);
    }

    #[test]
    #[should_panic(expected = "DEADLOCK DETECTED")]
    fn test_non_recursive_relock_is_fatal() {
        let mutex = Mutex::new_non_recursive("relock");
        mutex.lock();
        mutex.lock();
    }

    // ===== try_lock =====

    #[test]
    fn test_try_lock_free_mutex() {
        let mutex = Mutex::new_non_recursive("try-free");
        assert_eq!(mutex.try_lock(), Ok(()));
        assert_eq!(mutex.lock_count(), 1);
        mutex.unlock();
    }

    #[test]
    fn test_try_lock_non_recursive_owner_would_block() {
        let mutex = Mutex::new_non_recursive("try-owner");
        mutex.lock();
        assert_eq!(mutex.try_lock(), Err(RuntimeError::WouldBlock));
        assert_eq!(mutex.lock_count(), 1);
        mutex.unlock();
    }

    #[test]
    fn test_try_lock_recursive_owner_nests() {
        let mutex = Mutex::new_recursive("try-nest");
        mutex.lock();
        assert_eq!(mutex.try_lock(), Ok(()));
        assert_eq!(mutex.lock_count(), 2);
        mutex.unlock();
        mutex.unlock();
    }

    #[test]
    fn test_try_lock_held_elsewhere_would_block() {
        let mutex = Mutex::new_non_recursive("try-busy");
        mutex.lock();

        let remote = mutex.clone();
        let result = std::thread::spawn(move || remote.try_lock())
            .join()
            .unwrap();
        assert_eq!(result, Err(RuntimeError::WouldBlock));
        assert!(mutex.waiters().is_empty());
        mutex.unlock();
    }

    // ===== Waiting =====

    #[test]
    fn test_waiter_is_recorded_while_blocked() {
        let mutex = Mutex::new_non_recursive("contended");
        mutex.lock();

        let remote = mutex.clone();
        let worker = std::thread::Builder::new()
            .name("blocked-locker".to_string())
            .spawn(move || {
                remote.lock();
                let held = ThreadRecord::current().held_mutexes();
                let waiting = ThreadRecord::current().waiting_on_mutex();
                remote.unlock();
                (held, waiting)
            })
            .unwrap();

        wait_for(|| mutex.waiters().len() == 1);
        let waiter = mutex.waiters().remove(0);
        assert_eq!(waiter.name(), "blocked-locker");
        let record = ThreadRecord::find(&waiter).unwrap();
        assert_eq!(record.waiting_on_mutex(), Some("contended".to_string()));

        mutex.unlock();
        let (held, waiting) = worker.join().unwrap();
        assert_eq!(held, vec!["contended".to_string()]);
        assert_eq!(waiting, None);
        assert!(mutex.waiters().is_empty());
    }

    #[test]
    fn test_guard_serializes_counter() {
        let mutex = Mutex::new_non_recursive("counter");
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut workers = Vec::new();

        for _ in 0..4 {
            let mutex = mutex.clone();
            let counter = Arc::clone(&counter);
            workers.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    let _guard = mutex.lock_guard();
                    let value = counter.load(Ordering::Relaxed);
                    counter.store(value + 1, Ordering::Relaxed);
                }
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(counter.load(Ordering::Relaxed), 400);
        assert_eq!(mutex.lock_count(), 0);
    }

    // ===== Deletion =====

    #[test]
    #[should_panic(expected = "deleted while still locked")]
    fn test_delete_locked_is_fatal() {
        let mutex = Mutex::new_non_recursive("busy-delete");
        mutex.lock();
        mutex.delete();
    }

    #[test]
    #[should_panic(expected = "used after it was deleted")]
    fn test_use_after_delete_is_fatal() {
        let mutex = Mutex::new_non_recursive("stale");
        let stale = mutex.clone();
        mutex.delete();
        stale.lock();
    }
}
