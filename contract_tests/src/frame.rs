//! Frame layout contract
//!
//! `[txn id: u32 little endian][payload: exactly max_payload_size bytes]`

use ipc::{Frame, TXN_ID_SIZE};

// ===== Layout Constants =====
pub const HEADER_SIZE: usize = 4;
pub const NOTIFICATION_TXN_ID: u32 = 0;
