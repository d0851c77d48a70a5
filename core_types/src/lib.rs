//! # Core Types
//!
//! This crate defines the fundamental types shared by every layer of the
//! messaging runtime.
//!
//! ## Philosophy
//!
//! - **Two tiers of failure**: conditions a caller can react to are returned as
//!   [`RuntimeError`]; contract violations go through [`fatal!`] and never return.
//! - **Explicit identity**: sessions, services and threads carry typed identifiers
//!   that cannot be confused with one another.
//!
//! ## Key Types
//!
//! - [`SessionId`]: Unique identifier for a session
//! - [`ServiceId`]: Unique identifier for a service
//! - [`ThreadRef`]: Identity (id + name) of an OS thread taking part in messaging
//! - [`RuntimeError`]: Recoverable result codes

pub mod error;
pub mod fatal;
pub mod ids;
pub mod thread;

pub use error::{RuntimeError, RuntimeResult};
pub use ids::{ServiceId, SessionId};
pub use thread::ThreadRef;
