//! Message buffer pool
//!
//! Each protocol owns one pool. Buffers are `TXN_ID_SIZE + max_payload_size`
//! bytes and go back to the pool when the [`PooledBuffer`] is dropped. The
//! pool never refuses an allocation; growing past the high-water mark is
//! logged as a probable leak.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::frame::TXN_ID_SIZE;

/// Default number of buffers allocated up front
pub const DEFAULT_INITIAL_CAPACITY: usize = 10;

/// Pool sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Buffers allocated when the pool is created
    pub initial_capacity: usize,
    /// Buffer count above which growth is reported; defaults to the initial capacity
    pub high_water: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            high_water: None,
        }
    }
}

impl PoolConfig {
    /// Effective high-water mark
    pub fn high_water_mark(&self) -> usize {
        self.high_water.unwrap_or(self.initial_capacity)
    }
}

/// Usage counters of a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub name: String,
    pub buffer_size: usize,
    /// Buffers ever allocated
    pub total: usize,
    /// Buffers handed out and not yet returned
    pub in_use: usize,
    pub high_water: usize,
}

/// Called every time the pool grows past its high-water mark
pub type HighWaterCallback = Arc<dyn Fn(&PoolStats) + Send + Sync>;

struct PoolState {
    free: Vec<Vec<u8>>,
    total: usize,
    in_use: usize,
}

struct PoolInner {
    name: String,
    buffer_size: usize,
    high_water: usize,
    state: Mutex<PoolState>,
    on_high_water: Mutex<Option<HighWaterCallback>>,
}

impl PoolInner {
    fn stats(&self, state: &PoolState) -> PoolStats {
        PoolStats {
            name: self.name.clone(),
            buffer_size: self.buffer_size,
            total: state.total,
            in_use: state.in_use,
            high_water: self.high_water,
        }
    }

    fn give_back(&self, mut buffer: Vec<u8>) {
        buffer.fill(0);
        let mut state = self.state.lock();
        state.in_use = state.in_use.saturating_sub(1);
        state.free.push(buffer);
    }
}

/// Growable pool of fixed-size message buffers
#[derive(Clone)]
pub struct MessagePool {
    inner: Arc<PoolInner>,
}

impl MessagePool {
    /// Creates a pool whose buffers hold a transaction id plus `max_payload_size` bytes
    pub fn new(name: &str, max_payload_size: usize, config: PoolConfig) -> Self {
        let buffer_size = TXN_ID_SIZE + max_payload_size;
        let free = (0..config.initial_capacity)
            .map(|_| vec![0u8; buffer_size])
            .collect();
        Self {
            inner: Arc::new(PoolInner {
                name: name.to_string(),
                buffer_size,
                high_water: config.high_water_mark(),
                state: Mutex::new(PoolState {
                    free,
                    total: config.initial_capacity,
                    in_use: 0,
                }),
                on_high_water: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Size of each buffer, header included
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Installs a callback fired on growth past the high-water mark
    pub fn set_high_water_callback(&self, callback: impl Fn(&PoolStats) + Send + Sync + 'static) {
        *self.inner.on_high_water.lock() = Some(Arc::new(callback));
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        self.inner.stats(&state)
    }

    /// Takes a zeroed buffer, growing the pool if none is free
    pub fn alloc(&self) -> PooledBuffer {
        let mut state = self.inner.state.lock();
        let (bytes, grew_past_mark) = match state.free.pop() {
            Some(bytes) => (bytes, None),
            None => {
                state.total += 1;
                let stats =
                    (state.total > self.inner.high_water).then(|| self.inner.stats(&state));
                (vec![0u8; self.inner.buffer_size], stats)
            }
        };
        state.in_use += 1;
        drop(state);

        if let Some(stats) = grew_past_mark {
            tracing::warn!(
                pool = %stats.name,
                total = stats.total,
                high_water = stats.high_water,
                "message pool grew past its high-water mark, possible leak"
            );
            let callback = self.inner.on_high_water.lock().clone();
            if let Some(callback) = callback {
                callback(&stats);
            }
        }

        PooledBuffer {
            bytes,
            pool: Arc::downgrade(&self.inner),
        }
    }
}

impl fmt::Debug for MessagePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagePool")
            .field("stats", &self.stats())
            .finish()
    }
}

/// A buffer on loan from a [`MessagePool`]
pub struct PooledBuffer {
    bytes: Vec<u8>,
    pool: Weak<PoolInner>,
}

impl PooledBuffer {
    /// Whole buffer, header included
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Payload region after the transaction id header
    pub fn payload(&self) -> &[u8] {
        &self.bytes[TXN_ID_SIZE..]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[TXN_ID_SIZE..]
    }

    /// Writes the transaction id header
    pub fn set_txn_id(&mut self, txn_id: u32) {
        self.bytes[..TXN_ID_SIZE].copy_from_slice(&txn_id.to_le_bytes());
    }

    pub fn txn_id(&self) -> u32 {
        let mut header = [0u8; TXN_ID_SIZE];
        header.copy_from_slice(&self.bytes[..TXN_ID_SIZE]);
        u32::from_le_bytes(header)
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.give_back(std::mem::take(&mut self.bytes));
        }
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_buffers_include_header() {
        let pool = MessagePool::new("msgs-test", 64, PoolConfig::default());
        let buffer = pool.alloc();
        assert_eq!(buffer.as_bytes().len(), TXN_ID_SIZE + 64);
        assert_eq!(buffer.payload().len(), 64);
    }

    #[test]
    fn test_alloc_and_return() {
        let pool = MessagePool::new("msgs-test", 8, PoolConfig::default());
        let buffer = pool.alloc();
        assert_eq!(pool.stats().in_use, 1);
        drop(buffer);

        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.total, DEFAULT_INITIAL_CAPACITY);
    }

    #[test]
    fn test_returned_buffer_is_zeroed() {
        let pool = MessagePool::new(
            "msgs-zero",
            4,
            PoolConfig {
                initial_capacity: 1,
                high_water: None,
            },
        );
        let mut buffer = pool.alloc();
        buffer.payload_mut().copy_from_slice(&[1, 2, 3, 4]);
        buffer.set_txn_id(9);
        drop(buffer);

        let buffer = pool.alloc();
        assert_eq!(buffer.payload(), &[0, 0, 0, 0]);
        assert_eq!(buffer.txn_id(), 0);
    }

    #[test]
    fn test_pool_grows_past_high_water() {
        let pool = MessagePool::new(
            "msgs-grow",
            4,
            PoolConfig {
                initial_capacity: 2,
                high_water: None,
            },
        );
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        pool.set_high_water_callback(move |stats| {
            assert!(stats.total > stats.high_water);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let held: Vec<_> = (0..4).map(|_| pool.alloc()).collect();
        assert_eq!(pool.stats().total, 4);
        assert_eq!(pool.stats().in_use, 4);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        drop(held);
        assert_eq!(pool.stats().in_use, 0);
    }

    #[test]
    fn test_txn_id_header_round_trip() {
        let pool = MessagePool::new("msgs-txn", 4, PoolConfig::default());
        let mut buffer = pool.alloc();
        buffer.set_txn_id(0xDEAD_BEEF);
        assert_eq!(buffer.txn_id(), 0xDEAD_BEEF);
        assert_eq!(&buffer.as_bytes()[..4], &0xDEAD_BEEFu32.to_le_bytes());
    }
}
