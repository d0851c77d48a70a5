//! The transport contract
//!
//! A transport is one end of a connection-oriented, bidirectional link that
//! carries [`Frame`]s. Inbound traffic is pushed into an [`InboundSink`]
//! installed by [`Transport::start`]; the sink may be called from any thread.

use std::fmt;
use std::io;
use std::sync::Arc;

use core_types::RuntimeError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::Frame;

/// Transport failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The send could not complete without blocking
    #[error("transport would block")]
    WouldBlock,
    /// The link is closed at either end
    #[error("transport closed")]
    Closed,
    /// Any other I/O failure
    #[error("communication error: {0}")]
    CommError(String),
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => TransportError::WouldBlock,
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof => TransportError::Closed,
            _ => TransportError::CommError(err.to_string()),
        }
    }
}

impl From<nix::Error> for TransportError {
    fn from(err: nix::Error) -> Self {
        match err {
            nix::Error::EAGAIN => TransportError::WouldBlock,
            nix::Error::EPIPE | nix::Error::ECONNRESET | nix::Error::ENOTCONN => {
                TransportError::Closed
            }
            other => TransportError::CommError(other.to_string()),
        }
    }
}

impl From<TransportError> for RuntimeError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::WouldBlock => RuntimeError::WouldBlock,
            TransportError::Closed => RuntimeError::Closed,
            TransportError::CommError(reason) => RuntimeError::CommError(reason),
        }
    }
}

/// Identity of the process at the other end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credentials {
    pub uid: u32,
    pub pid: i32,
}

impl Credentials {
    /// Credentials of the calling process
    pub fn current_process() -> Self {
        Self {
            uid: nix::unistd::getuid().as_raw(),
            pid: std::process::id() as i32,
        }
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uid={} pid={}", self.uid, self.pid)
    }
}

/// Something arriving from the peer
#[derive(Debug)]
pub enum TransportEvent {
    /// A frame
    Frame(Frame),
    /// The peer closed the link; delivered at most once, never after a local close
    Closed,
}

/// Receiver of inbound events
pub type InboundSink = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// Kind of transport, for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportKind {
    /// In-process channel pair
    Channel,
    /// Unix stream socket
    Unix,
}

/// One end of a link
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Installs the inbound sink. Events that arrived earlier are delivered first.
    fn start(&self, sink: InboundSink);

    /// Transmits a frame; its file descriptor, if any, is consumed
    fn send(&self, frame: Frame) -> Result<(), TransportError>;

    /// Closes the link. The peer sees [`TransportEvent::Closed`]; the local sink does not.
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// Credentials of the process at the other end, when known
    fn peer_credentials(&self) -> Option<Credentials>;
}
