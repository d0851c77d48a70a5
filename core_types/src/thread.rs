//! Thread identity
//!
//! Every OS thread that touches the runtime gets a [`ThreadRef`] the first
//! time it asks for one. The reference is cheap to clone and compares by a
//! process-unique id, so it stays meaningful in diagnostics after the thread
//! has exited.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: ThreadRef = ThreadRef::for_current_thread();
}

/// Identity of a thread: a process-unique id plus a human readable name
#[derive(Clone)]
pub struct ThreadRef {
    id: u64,
    name: Arc<str>,
}

impl ThreadRef {
    /// Returns the identity of the calling thread
    pub fn current() -> Self {
        CURRENT.with(|thread| thread.clone())
    }

    fn for_current_thread() -> Self {
        let id = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
        let name: Arc<str> = match std::thread::current().name() {
            Some(name) => Arc::from(name),
            None => Arc::from(format!("thread-{}", id)),
        };
        Self { id, name }
    }

    /// Returns the process-unique thread id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Checks whether this is the calling thread
    pub fn is_current(&self) -> bool {
        CURRENT.with(|thread| thread.id == self.id)
    }
}

impl PartialEq for ThreadRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ThreadRef {}

impl Hash for ThreadRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ThreadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thread({}, {:?})", self.id, self.name)
    }
}

impl fmt::Display for ThreadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
