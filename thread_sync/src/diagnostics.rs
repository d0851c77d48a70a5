//! Diagnostic snapshot of every live sync object and thread record
//!
//! An external inspector can serialize the snapshot with
//! [`SyncSnapshot::to_json`] to see who holds what and who waits on what.

use serde::{Deserialize, Serialize};

use crate::lists;

/// State of one mutex
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutexInfo {
    pub name: String,
    pub recursive: bool,
    pub traceable: bool,
    pub lock_count: u32,
    pub owner: Option<String>,
    pub waiters: Vec<String>,
}

/// State of one semaphore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemaphoreInfo {
    pub name: String,
    pub traceable: bool,
    pub value: u32,
    pub waiters: Vec<String>,
}

/// State of one thread record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub id: u64,
    pub name: String,
    pub waiting_on_mutex: Option<String>,
    pub held_mutexes: Vec<String>,
    pub waiting_on_semaphore: Option<String>,
}

/// Point-in-time view of all sync objects in the process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub mutexes: Vec<MutexInfo>,
    pub semaphores: Vec<SemaphoreInfo>,
    pub threads: Vec<ThreadInfo>,
}

impl SyncSnapshot {
    /// Serializes the snapshot as pretty-printed JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn mutex(&self, name: &str) -> Option<&MutexInfo> {
        self.mutexes.iter().find(|info| info.name == name)
    }

    pub fn semaphore(&self, name: &str) -> Option<&SemaphoreInfo> {
        self.semaphores.iter().find(|info| info.name == name)
    }

    pub fn thread(&self, name: &str) -> Option<&ThreadInfo> {
        self.threads.iter().find(|info| info.name == name)
    }
}

/// Collects a snapshot
///
/// Objects are read one at a time, so the snapshot is not atomic across
/// objects.
pub fn snapshot() -> SyncSnapshot {
    let mutexes = lists::mutexes()
        .iter()
        .map(|shared| {
            let view = shared.view();
            MutexInfo {
                name: view.name,
                recursive: view.recursive,
                traceable: view.traceable,
                lock_count: view.lock_count,
                owner: view.owner.map(|owner| owner.name().to_string()),
                waiters: view
                    .waiters
                    .iter()
                    .map(|waiter| waiter.name().to_string())
                    .collect(),
            }
        })
        .collect();

    let semaphores = lists::semaphores()
        .iter()
        .map(|shared| {
            let view = shared.view();
            SemaphoreInfo {
                name: view.name,
                traceable: view.traceable,
                value: view.value,
                waiters: view
                    .waiters
                    .iter()
                    .map(|waiter| waiter.name().to_string())
                    .collect(),
            }
        })
        .collect();

    let threads = lists::threads()
        .iter()
        .map(|record| ThreadInfo {
            id: record.thread().id(),
            name: record.thread().name().to_string(),
            waiting_on_mutex: record.waiting_on_mutex(),
            held_mutexes: record.held_mutexes(),
            waiting_on_semaphore: record.waiting_on_semaphore(),
        })
        .collect();

    SyncSnapshot {
        mutexes,
        semaphores,
        threads,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Mutex, Semaphore};

    #[test]
    fn test_snapshot_lists_objects() {
        let mutex = Mutex::new_traceable_recursive("snap-mutex");
        let semaphore = Semaphore::new("snap-sem", 2);
        mutex.lock();

        let snap = snapshot();
        let info = snap.mutex("snap-mutex").unwrap();
        assert!(info.recursive);
        assert!(info.traceable);
        assert_eq!(info.lock_count, 1);
        assert_eq!(
            info.owner.as_deref(),
            Some(core_types::ThreadRef::current().name())
        );
        assert_eq!(snap.semaphore("snap-sem").unwrap().value, 2);

        mutex.unlock();
        mutex.delete();
        semaphore.delete();

        let snap = snapshot();
        assert!(snap.mutex("snap-mutex").is_none());
        assert!(snap.semaphore("snap-sem").is_none());
    }

    #[test]
    fn test_snapshot_includes_holding_thread() {
        let mutex = Mutex::new_non_recursive("snap-held");
        let remote = mutex.clone();
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        let worker = std::thread::Builder::new()
            .name("snap-holder".to_string())
            .spawn(move || {
                remote.lock();
                locked_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                remote.unlock();
            })
            .unwrap();

        locked_rx.recv().unwrap();
        let snap = snapshot();
        let holder = snap.thread("snap-holder").unwrap();
        assert_eq!(holder.held_mutexes, vec!["snap-held".to_string()]);
        assert_eq!(holder.waiting_on_mutex, None);

        release_tx.send(()).unwrap();
        worker.join().unwrap();
    }

    #[test]
    fn test_snapshot_json_round_trip() {
        let _semaphore = Semaphore::new("json-sem", 1);
        let snap = snapshot();
        let json = snap.to_json().unwrap();
        let parsed: SyncSnapshot = serde_json::from_str(&json).unwrap();
        assert!(parsed.semaphore("json-sem").is_some());
    }
}
