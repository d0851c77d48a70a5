//! Recoverable result codes

use thiserror::Error;

/// Errors a caller can reasonably react to
///
/// Anything else (invalid references, ownership violations, protocol
/// mismatches) is a contract violation and is reported through
/// [`fatal!`](crate::fatal!) instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    /// A try-operation hit contention, or a non-blocking transport had no data
    #[error("Operation would block")]
    WouldBlock,

    /// A bounded wait expired
    #[error("Operation timed out")]
    Timeout,

    /// The session (or connection) is gone
    #[error("Session closed")]
    Closed,

    /// Transport-level failure
    #[error("Communication error: {0}")]
    CommError(String),

    /// Service discovery found nothing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Service discovery found a conflicting registration
    #[error("Duplicate: {0}")]
    Duplicate(String),
}

/// Convenience alias used throughout the workspace
pub type RuntimeResult<T = ()> = Result<T, RuntimeError>;
