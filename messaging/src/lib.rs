//! # Messaging
//!
//! Sessions, services and messages on top of the `ipc` plumbing.
//!
//! ## Philosophy
//!
//! - **Protocols are contracts**: a client and a service talk only if they
//!   agree on the protocol id and its maximum payload size. Disagreeing on the
//!   size is a programming error and aborts.
//! - **Callbacks have a home thread**: every handler runs on the event loop
//!   of the thread that created the session or service.
//! - **Requests get answers**: a request either receives its response or, if
//!   the session closes, a `None` completion, exactly once.
//! - **Misuse is fatal**: using deleted objects, answering twice, or calling a
//!   client-only operation on a server session goes through `fatal!`.
//!
//! ## Example
//!
//! ```no_run
//! use messaging::Runtime;
//!
//! let runtime = Runtime::global();
//! let protocol = runtime.get_protocol("calc-v1", 64);
//! let session = runtime.create_session(&protocol, "calculator");
//! session.open_sync().unwrap();
//!
//! let request = session.create_msg();
//! request.payload_mut()[0] = 2;
//! if let Some(response) = request.request_sync_response() {
//!     println!("result: {}", response.payload()[0]);
//! }
//! ```

mod config;
mod endpoint;
mod message;
mod runtime;
mod service;
mod session;
mod transaction;

pub use config::{ConfigError, RuntimeConfig};
pub use message::{current_service_message, kill_client, Message, PayloadError};
pub use runtime::Runtime;
pub use service::{HandlerRef, Service};
pub use session::{OpenCallback, ReceiveHandler, Role, Session, SessionHandler, SessionState};
pub use transaction::ResponseCallback;

pub use core_types::{RuntimeError, RuntimeResult};
pub use ipc::{Credentials, Protocol};
