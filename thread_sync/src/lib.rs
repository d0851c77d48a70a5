//! # Thread Synchronization
//!
//! Mutexes and semaphores whose state can be inspected from outside.
//!
//! ## Philosophy
//!
//! - **Diagnosable, not opaque**: every primitive knows who holds it and who is
//!   waiting for it, and every thread knows what it holds and waits on.
//! - **Misuse is fatal**: unlocking a mutex you do not own, relocking a
//!   non-recursive mutex, or deleting a busy object aborts with the names of the
//!   objects and threads involved.
//! - **Process-wide visibility**: all live objects and threads are reachable
//!   through [`diagnostics::snapshot`].

pub mod diagnostics;
mod lists;
pub mod mutex;
pub mod semaphore;
pub mod thread_record;

pub use diagnostics::{snapshot, SyncSnapshot};
pub use mutex::{Mutex, MutexGuard};
pub use semaphore::Semaphore;
pub use thread_record::ThreadRecord;

/// Longest object name kept, in bytes. Longer names are truncated.
pub const MAX_NAME_LEN: usize = 23;

pub(crate) fn truncate_name(name: &str) -> String {
    if name.len() <= MAX_NAME_LEN {
        return name.to_string();
    }
    let mut end = MAX_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    tracing::debug!(name, kept = &name[..end], "sync object name truncated");
    name[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_name() {
        assert_eq!(truncate_name("config"), "config");
    }

    #[test]
    fn test_truncate_long_name() {
        let name = "a-very-long-mutex-name-that-overflows";
        assert_eq!(truncate_name(name).len(), MAX_NAME_LEN);
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let name = "ééééééééééééééééé";
        let kept = truncate_name(name);
        assert!(kept.len() <= MAX_NAME_LEN);
        assert!(name.starts_with(&kept));
    }
}
