//! Per-thread sync records
//!
//! Each thread that touches a [`Mutex`](crate::Mutex) or
//! [`Semaphore`](crate::Semaphore) owns one record. The record says which mutex
//! the thread is waiting on, which mutexes it holds (in acquisition order) and
//! which semaphore it is waiting on.

use std::sync::Arc;

use core_types::ThreadRef;
use parking_lot::Mutex;

use crate::lists;
use crate::mutex::MutexShared;
use crate::semaphore::SemaphoreShared;

thread_local! {
    static RECORD: Arc<ThreadRecord> = ThreadRecord::register();
}

#[derive(Default)]
struct RecordState {
    waiting_on_mutex: Option<Arc<MutexShared>>,
    held_mutexes: Vec<Arc<MutexShared>>,
    waiting_on_semaphore: Option<Arc<SemaphoreShared>>,
}

/// Sync bookkeeping for one thread
pub struct ThreadRecord {
    thread: ThreadRef,
    state: Mutex<RecordState>,
}

impl ThreadRecord {
    fn register() -> Arc<Self> {
        let record = Arc::new(Self {
            thread: ThreadRef::current(),
            state: Mutex::new(RecordState::default()),
        });
        lists::add_thread(&record);
        record
    }

    /// Returns the calling thread's record
    pub fn current() -> Arc<Self> {
        RECORD.with(Arc::clone)
    }

    /// Looks up the record of a live thread
    pub fn find(thread: &ThreadRef) -> Option<Arc<Self>> {
        lists::threads()
            .into_iter()
            .find(|record| record.thread == *thread)
    }

    /// Returns the thread this record belongs to
    pub fn thread(&self) -> &ThreadRef {
        &self.thread
    }

    /// Name of the mutex this thread is blocked on, if any
    pub fn waiting_on_mutex(&self) -> Option<String> {
        self.state
            .lock()
            .waiting_on_mutex
            .as_ref()
            .map(|mutex| mutex.name.clone())
    }

    /// Names of the mutexes this thread holds, oldest first
    pub fn held_mutexes(&self) -> Vec<String> {
        self.state
            .lock()
            .held_mutexes
            .iter()
            .map(|mutex| mutex.name.clone())
            .collect()
    }

    /// Name of the semaphore this thread is blocked on, if any
    pub fn waiting_on_semaphore(&self) -> Option<String> {
        self.state
            .lock()
            .waiting_on_semaphore
            .as_ref()
            .map(|semaphore| semaphore.name.clone())
    }

    pub(crate) fn set_waiting_on_mutex(&self, mutex: Option<Arc<MutexShared>>) {
        self.state.lock().waiting_on_mutex = mutex;
    }

    pub(crate) fn push_held(&self, mutex: Arc<MutexShared>) {
        self.state.lock().held_mutexes.push(mutex);
    }

    pub(crate) fn remove_held(&self, mutex: &Arc<MutexShared>) {
        let mut state = self.state.lock();
        if let Some(pos) = state
            .held_mutexes
            .iter()
            .rposition(|held| Arc::ptr_eq(held, mutex))
        {
            state.held_mutexes.remove(pos);
        }
    }

    pub(crate) fn set_waiting_on_semaphore(&self, semaphore: Option<Arc<SemaphoreShared>>) {
        self.state.lock().waiting_on_semaphore = semaphore;
    }
}

impl std::fmt::Debug for ThreadRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadRecord")
            .field("thread", &self.thread)
            .field("waiting_on_mutex", &self.waiting_on_mutex())
            .field("held_mutexes", &self.held_mutexes())
            .field("waiting_on_semaphore", &self.waiting_on_semaphore())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_record_is_registered() {
        let record = ThreadRecord::current();
        assert!(record.thread().is_current());

        let found = ThreadRecord::find(&ThreadRef::current()).unwrap();
        assert!(Arc::ptr_eq(&record, &found));
    }

    #[test]
    fn test_fresh_record_is_idle() {
        let record = std::thread::spawn(|| {
            let record = ThreadRecord::current();
            (
                record.waiting_on_mutex(),
                record.held_mutexes(),
                record.waiting_on_semaphore(),
            )
        })
        .join()
        .unwrap();

        assert_eq!(record, (None, Vec::new(), None));
    }

    #[test]
    fn test_exited_thread_is_not_found() {
        let thread = std::thread::spawn(|| {
            let _ = ThreadRecord::current();
            ThreadRef::current()
        })
        .join()
        .unwrap();

        assert!(ThreadRecord::find(&thread).is_none());
    }
}
