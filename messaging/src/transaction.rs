//! Outstanding request-response transactions
//!
//! A client session keeps one table entry per request awaiting its response.
//! Entries hold only the completion (callback or sync slot), never messages.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::message::Message;

/// Completion callback of an asynchronous request
pub type ResponseCallback = Box<dyn FnOnce(Option<Message>) + Send + 'static>;

/// One-shot rendezvous between a blocked caller and whoever completes it
pub(crate) struct SyncSlot<T> {
    value: Mutex<Option<T>>,
    filled: Condvar,
}

impl<T> SyncSlot<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(None),
            filled: Condvar::new(),
        })
    }

    /// Stores the value unless one is already there
    pub(crate) fn fill(&self, value: T) {
        let mut slot = self.value.lock();
        if slot.is_none() {
            *slot = Some(value);
            self.filled.notify_all();
        }
    }

    pub(crate) fn wait(&self) -> T {
        let mut slot = self.value.lock();
        loop {
            if let Some(value) = slot.take() {
                return value;
            }
            self.filled.wait(&mut slot);
        }
    }

    /// Waits until `deadline`; `None` if nothing arrived in time
    pub(crate) fn wait_until(&self, deadline: Instant) -> Option<T> {
        let mut slot = self.value.lock();
        loop {
            if let Some(value) = slot.take() {
                return Some(value);
            }
            if self.filled.wait_until(&mut slot, deadline).timed_out() {
                return slot.take();
            }
        }
    }
}

/// How a pending transaction gets completed
pub(crate) enum Pending {
    Callback(ResponseCallback),
    Sync(Arc<SyncSlot<Option<Message>>>),
}

/// Per-session table of outstanding transactions
pub(crate) struct TransactionTable {
    next_id: u32,
    entries: HashMap<u32, Pending>,
}

impl TransactionTable {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 1,
            entries: HashMap::new(),
        }
    }

    /// Allocates a fresh transaction id; 0 is never handed out
    pub(crate) fn next_id(&mut self) -> u32 {
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if id != 0 && !self.entries.contains_key(&id) {
                return id;
            }
        }
    }

    pub(crate) fn insert(&mut self, id: u32, pending: Pending) {
        self.entries.insert(id, pending);
    }

    pub(crate) fn take(&mut self, id: u32) -> Option<Pending> {
        self.entries.remove(&id)
    }

    /// Removes every entry, in transaction id order
    pub(crate) fn drain(&mut self) -> Vec<Pending> {
        let mut entries: Vec<_> = self.entries.drain().collect();
        entries.sort_by_key(|(id, _)| *id);
        entries.into_iter().map(|(_, pending)| pending).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_ids_skip_zero() {
        let mut table = TransactionTable::new();
        table.next_id = u32::MAX;
        assert_eq!(table.next_id(), u32::MAX);
        assert_eq!(table.next_id(), 1);
    }

    #[test]
    fn test_ids_skip_outstanding() {
        let mut table = TransactionTable::new();
        table.insert(1, Pending::Sync(SyncSlot::new()));
        assert_eq!(table.next_id(), 2);
    }

    #[test]
    fn test_drain_empties_table() {
        let mut table = TransactionTable::new();
        for _ in 0..3 {
            let id = table.next_id();
            table.insert(id, Pending::Callback(Box::new(|_| {})));
        }
        assert_eq!(table.len(), 3);
        assert_eq!(table.drain().len(), 3);
        assert_eq!(table.len(), 0);
        assert!(table.take(1).is_none());
    }

    #[test]
    fn test_slot_first_fill_wins() {
        let slot = SyncSlot::new();
        slot.fill(1);
        slot.fill(2);
        assert_eq!(slot.wait(), 1);
    }

    #[test]
    fn test_slot_wakes_waiter() {
        let slot = SyncSlot::new();
        let filler = Arc::clone(&slot);
        let worker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            filler.fill("done");
        });
        assert_eq!(slot.wait(), "done");
        worker.join().unwrap();
    }

    #[test]
    fn test_slot_deadline() {
        let slot: Arc<SyncSlot<u8>> = SyncSlot::new();
        assert_eq!(slot.wait_until(Instant::now() + Duration::from_millis(10)), None);
    }
}
