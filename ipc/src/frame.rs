//! Wire frames
//!
//! `[txn id: u32 LE][payload: max_payload_size bytes]`, plus at most one file
//! descriptor carried alongside.

use std::fmt;
use std::os::fd::OwnedFd;

use thiserror::Error;

/// Size of the transaction id header
pub const TXN_ID_SIZE: usize = std::mem::size_of::<u32>();

/// Errors decoding a frame
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Fewer bytes than a transaction id
    #[error("frame too short: {0} bytes")]
    TooShort(usize),
    /// Payload does not match the protocol's size
    #[error("frame payload is {actual} bytes, protocol requires {expected}")]
    SizeMismatch { expected: usize, actual: usize },
}

/// One message in flight
pub struct Frame {
    /// Transaction id, 0 when no response is expected
    pub txn_id: u32,
    /// Payload region
    pub payload: Vec<u8>,
    /// Out-of-band file descriptor
    pub fd: Option<OwnedFd>,
}

impl Frame {
    /// Creates a frame without a file descriptor
    pub fn new(txn_id: u32, payload: Vec<u8>) -> Self {
        Self {
            txn_id,
            payload,
            fd: None,
        }
    }

    /// Attaches a file descriptor
    pub fn with_fd(mut self, fd: Option<OwnedFd>) -> Self {
        self.fd = fd;
        self
    }

    /// Length of the encoded frame in bytes
    pub fn encoded_len(&self) -> usize {
        TXN_ID_SIZE + self.payload.len()
    }

    /// Serializes the in-band part of the frame
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        bytes.extend_from_slice(&self.txn_id.to_le_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Parses the in-band part of a frame
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < TXN_ID_SIZE {
            return Err(FrameError::TooShort(bytes.len()));
        }
        let (header, payload) = bytes.split_at(TXN_ID_SIZE);
        let mut txn = [0u8; TXN_ID_SIZE];
        txn.copy_from_slice(header);
        Ok(Self::new(u32::from_le_bytes(txn), payload.to_vec()))
    }

    /// Parses a frame and checks its payload size
    pub fn from_bytes_sized(bytes: &[u8], max_payload_size: usize) -> Result<Self, FrameError> {
        let frame = Self::from_bytes(bytes)?;
        if frame.payload.len() != max_payload_size {
            return Err(FrameError::SizeMismatch {
                expected: max_payload_size,
                actual: frame.payload.len(),
            });
        }
        Ok(frame)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("txn_id", &self.txn_id)
            .field("payload_len", &self.payload.len())
            .field("fd", &self.fd)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_little_endian() {
        let frame = Frame::new(0x0102_0304, vec![0xAA, 0xBB]);
        assert_eq!(frame.to_bytes(), vec![0x04, 0x03, 0x02, 0x01, 0xAA, 0xBB]);
        assert_eq!(frame.encoded_len(), 6);
    }

    #[test]
    fn test_parse_frame() {
        let frame = Frame::from_bytes(&[7, 0, 0, 0, 1, 2, 3]).unwrap();
        assert_eq!(frame.txn_id, 7);
        assert_eq!(frame.payload, vec![1, 2, 3]);
        assert!(frame.fd.is_none());
    }

    #[test]
    fn test_parse_too_short() {
        assert_eq!(
            Frame::from_bytes(&[1, 0]).unwrap_err(),
            FrameError::TooShort(2)
        );
    }

    #[test]
    fn test_parse_sized_rejects_wrong_size() {
        let bytes = Frame::new(1, vec![0; 8]).to_bytes();
        assert!(Frame::from_bytes_sized(&bytes, 8).is_ok());
        assert_eq!(
            Frame::from_bytes_sized(&bytes, 16).unwrap_err(),
            FrameError::SizeMismatch {
                expected: 16,
                actual: 8
            }
        );
    }
}
