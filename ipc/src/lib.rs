//! # Inter-Process Communication (IPC)
//!
//! This crate defines the message-passing plumbing underneath sessions and
//! services.
//!
//! ## Philosophy
//!
//! - **Protocols size everything**: a protocol is an id plus a maximum payload
//!   size, and every buffer and frame on it has exactly that size.
//! - **Buffers are pooled**: message buffers come from a per-protocol pool that
//!   grows on demand and complains when it grows suspiciously large.
//! - **Transports are pluggable**: the same session logic runs over an
//!   in-process channel pair or a unix stream socket.
//!
//! ## Architecture
//!
//! A frame on the wire is the transaction id (u32, little endian) followed by
//! the full payload region of the protocol. A file descriptor, if any, travels
//! out of band.

pub mod channel;
pub mod frame;
pub mod handshake;
pub mod pool;
pub mod protocol;
pub mod transport;
pub mod unix;

pub use channel::ChannelTransport;
pub use frame::{Frame, FrameError, TXN_ID_SIZE};
pub use handshake::{HandshakeError, Hello, HelloAck};
pub use pool::{MessagePool, PoolConfig, PoolStats, PooledBuffer};
pub use protocol::{Protocol, ProtocolRegistry};
pub use transport::{
    Credentials, InboundSink, Transport, TransportError, TransportEvent, TransportKind,
};
pub use unix::UnixTransport;
