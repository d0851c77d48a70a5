//! Socket handshake contract
//!
//! Both messages are a u32 little-endian length followed by a JSON object.

use ipc::{Hello, HelloAck};

// ===== Field Names =====
pub const HELLO_FIELDS: &[&str] = &["service_name", "protocol_id", "max_payload_size"];
pub const ACK_FIELDS: &[&str] = &["accepted", "max_payload_size"];
pub const REJECT_FIELDS: &[&str] = &["accepted", "max_payload_size", "reason"];

pub fn sample_hello() -> Hello {
    Hello {
        service_name: "calculator".to_string(),
        protocol_id: "proto-v1".to_string(),
        max_payload_size: 64,
    }
}
