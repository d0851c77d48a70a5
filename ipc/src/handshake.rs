//! Connection handshake for socket transports
//!
//! Before any frame flows, the client sends a [`Hello`] naming the service and
//! protocol it wants, and the server answers with a [`HelloAck`] carrying its
//! own maximum payload size. Each message is a u32 little-endian length
//! followed by that many bytes of JSON.

use std::io::{self, Read, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::TransportError;

/// Largest handshake message accepted
pub const MAX_HANDSHAKE_LEN: usize = 4096;

/// Handshake failures
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("handshake I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed handshake: {0}")]
    Json(#[from] serde_json::Error),
    #[error("handshake message of {0} bytes exceeds the limit")]
    TooLarge(usize),
}

impl From<HandshakeError> for TransportError {
    fn from(err: HandshakeError) -> Self {
        match err {
            HandshakeError::Io(io) => io.into(),
            other => TransportError::CommError(other.to_string()),
        }
    }
}

/// Client greeting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub service_name: String,
    pub protocol_id: String,
    pub max_payload_size: usize,
}

/// Server answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloAck {
    /// Whether the server will carry frames for this connection
    pub accepted: bool,
    /// Server's maximum payload size for the protocol
    pub max_payload_size: usize,
    /// Why the connection was refused
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl HelloAck {
    pub fn accept(max_payload_size: usize) -> Self {
        Self {
            accepted: true,
            max_payload_size,
            reason: None,
        }
    }

    pub fn reject(max_payload_size: usize, reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            max_payload_size,
            reason: Some(reason.into()),
        }
    }
}

/// Writes one length-prefixed JSON message
pub fn write_message<T: Serialize>(writer: &mut impl Write, message: &T) -> Result<(), HandshakeError> {
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_HANDSHAKE_LEN {
        return Err(HandshakeError::TooLarge(body.len()));
    }
    writer.write_all(&(body.len() as u32).to_le_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/// Reads one length-prefixed JSON message
pub fn read_message<T: DeserializeOwned>(reader: &mut impl Read) -> Result<T, HandshakeError> {
    let mut len = [0u8; 4];
    reader.read_exact(&mut len)?;
    let len = u32::from_le_bytes(len) as usize;
    if len > MAX_HANDSHAKE_LEN {
        return Err(HandshakeError::TooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Ok(serde_json::from_slice(&body)?)
}
