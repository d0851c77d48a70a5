//! Protocol descriptors and their registry

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::pool::{MessagePool, PoolConfig};

struct ProtocolInner {
    id: String,
    max_payload_size: usize,
    pool: MessagePool,
}

/// An immutable protocol descriptor: identifier plus maximum payload size
///
/// Clones share the descriptor and its message pool.
#[derive(Clone)]
pub struct Protocol {
    inner: Arc<ProtocolInner>,
}

impl Protocol {
    fn new(id: &str, max_payload_size: usize, pool_config: PoolConfig) -> Self {
        let pool = MessagePool::new(&format!("msgs-{}", id), max_payload_size, pool_config);
        Self {
            inner: Arc::new(ProtocolInner {
                id: id.to_string(),
                max_payload_size,
                pool,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn max_payload_size(&self) -> usize {
        self.inner.max_payload_size
    }

    /// Pool that backs every message on this protocol
    pub fn pool(&self) -> &MessagePool {
        &self.inner.pool
    }
}

impl PartialEq for Protocol {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Protocol {}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Protocol")
            .field("id", &self.inner.id)
            .field("max_payload_size", &self.inner.max_payload_size)
            .finish()
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.inner.id, self.inner.max_payload_size)
    }
}

/// Registry of protocol descriptors keyed by (id, max payload size)
///
/// The same id with two different sizes yields two descriptors; the mismatch
/// only surfaces when a client opens a session to a service.
pub struct ProtocolRegistry {
    pool_config: PoolConfig,
    protocols: Mutex<HashMap<(String, usize), Protocol>>,
}

impl ProtocolRegistry {
    /// Creates an empty registry whose pools use `pool_config`
    pub fn new(pool_config: PoolConfig) -> Self {
        Self {
            pool_config,
            protocols: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the descriptor for the pair, creating it on first request
    pub fn get(&self, id: &str, max_payload_size: usize) -> Protocol {
        let mut protocols = self.protocols.lock();
        protocols
            .entry((id.to_string(), max_payload_size))
            .or_insert_with(|| {
                tracing::debug!(protocol = id, max_payload_size, "protocol registered");
                Protocol::new(id, max_payload_size, self.pool_config)
            })
            .clone()
    }

    /// Lists every registered descriptor
    pub fn protocols(&self) -> Vec<Protocol> {
        let mut list: Vec<_> = self.protocols.lock().values().cloned().collect();
        list.sort_by(|a, b| {
            a.id()
                .cmp(b.id())
                .then(a.max_payload_size().cmp(&b.max_payload_size()))
        });
        list
    }

    pub fn count(&self) -> usize {
        self.protocols.lock().len()
    }
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}
