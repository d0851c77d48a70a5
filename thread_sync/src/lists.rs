//! Process-wide object lists
//!
//! Entries are weak so that dropping the last handle to an object removes it
//! from view without explicit bookkeeping.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::mutex::MutexShared;
use crate::semaphore::SemaphoreShared;
use crate::thread_record::ThreadRecord;

static MUTEXES: Mutex<Vec<Weak<MutexShared>>> = parking_lot::const_mutex(Vec::new());
static SEMAPHORES: Mutex<Vec<Weak<SemaphoreShared>>> = parking_lot::const_mutex(Vec::new());
static THREADS: Mutex<Vec<Weak<ThreadRecord>>> = parking_lot::const_mutex(Vec::new());

fn insert<T>(list: &Mutex<Vec<Weak<T>>>, item: &Arc<T>) {
    let mut list = list.lock();
    list.retain(|entry| entry.strong_count() > 0);
    list.push(Arc::downgrade(item));
}

fn remove<T>(list: &Mutex<Vec<Weak<T>>>, item: &Arc<T>) {
    let target = Arc::as_ptr(item);
    list.lock()
        .retain(|entry| entry.strong_count() > 0 && entry.as_ptr() != target);
}

fn live<T>(list: &Mutex<Vec<Weak<T>>>) -> Vec<Arc<T>> {
    let mut list = list.lock();
    list.retain(|entry| entry.strong_count() > 0);
    list.iter().filter_map(Weak::upgrade).collect()
}

pub(crate) fn add_mutex(shared: &Arc<MutexShared>) {
    insert(&MUTEXES, shared);
}

pub(crate) fn remove_mutex(shared: &Arc<MutexShared>) {
    remove(&MUTEXES, shared);
}

pub(crate) fn mutexes() -> Vec<Arc<MutexShared>> {
    live(&MUTEXES)
}

pub(crate) fn add_semaphore(shared: &Arc<SemaphoreShared>) {
    insert(&SEMAPHORES, shared);
}

pub(crate) fn remove_semaphore(shared: &Arc<SemaphoreShared>) {
    remove(&SEMAPHORES, shared);
}

pub(crate) fn semaphores() -> Vec<Arc<SemaphoreShared>> {
    live(&SEMAPHORES)
}

pub(crate) fn add_thread(record: &Arc<ThreadRecord>) {
    insert(&THREADS, record);
}

pub(crate) fn threads() -> Vec<Arc<ThreadRecord>> {
    live(&THREADS)
}
