//! Messages
//!
//! A [`Message`] is a pooled buffer bound to a session. Cloning a message adds
//! a reference and keeps its session alive; the buffer goes back to the
//! protocol's pool when the last reference drops.
//!
//! A request received by a service must be answered with [`Message::respond`].
//! Releasing it unanswered while the session is open closes that session.

use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;
use std::os::fd::OwnedFd;
use std::sync::{Arc, Weak};

use core_types::{fatal, RuntimeResult};
use ipc::{Frame, PooledBuffer};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::session::{Role, Session};

/// Errors moving structured data in and out of a payload
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The encoded value does not fit the protocol's payload
    #[error("encoded payload is {size} bytes, protocol allows {max}")]
    TooLarge { size: usize, max: usize },
    #[error("payload JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

struct MessageBody {
    buffer: PooledBuffer,
    fd: Option<OwnedFd>,
    response_fd: Option<OwnedFd>,
    responded: bool,
}

struct MessageInner {
    session: Session,
    /// Transaction of a received request; fixed for the message's life
    txn_id: u32,
    body: Mutex<MessageBody>,
}

impl MessageInner {
    fn needs_response(&self) -> bool {
        self.txn_id != 0 && self.session.role() == Role::Server
    }
}

impl Drop for MessageInner {
    fn drop(&mut self) {
        let responded = self.body.get_mut().responded;
        if !self.needs_response() || responded || !self.session.is_open() {
            return;
        }
        tracing::error!(
            session = %self.session,
            service = %self.session.service_name(),
            txn_id = self.txn_id,
            "request released without a response, closing session"
        );
        self.session.close_unresponded();
    }
}

/// Reference-counted handle to a message
#[derive(Clone)]
pub struct Message {
    inner: Arc<MessageInner>,
}

thread_local! {
    static CURRENT_RX: RefCell<Option<Weak<MessageInner>>> = const { RefCell::new(None) };
}

/// Restores the previous in-flight message when a receive handler returns
struct RxScope {
    previous: Option<Weak<MessageInner>>,
}

impl RxScope {
    fn enter(message: &Message) -> Self {
        let previous = CURRENT_RX.with(|current| {
            current
                .borrow_mut()
                .replace(Arc::downgrade(&message.inner))
        });
        Self { previous }
    }
}

impl Drop for RxScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_RX.with(|current| *current.borrow_mut() = previous);
    }
}

/// Message whose service receive handler is running on this thread
pub fn current_service_message() -> Option<Message> {
    let inner = CURRENT_RX.with(|current| current.borrow().as_ref().and_then(Weak::upgrade))?;
    Some(Message { inner })
}

/// Drops the client whose message is being handled
///
/// Only valid inside a service receive handler.
pub fn kill_client(reason: &str) {
    match current_service_message() {
        Some(message) => {
            let session = message.session();
            tracing::error!(
                session = %session,
                service = %session.service_name(),
                reason,
                "killing client"
            );
            session.close();
        }
        None => fatal!(
            "kill_client() called outside of a service receive handler: {}",
            reason
        ),
    }
}

/// Hands an inbound message to the handler that should see it; runs on the owner loop
pub(crate) fn deliver(message: Message) {
    let session = message.session().clone();
    let handler = match session.role() {
        Role::Client => session.receive_handler(),
        Role::Server => session.service().and_then(|service| service.receive_handler()),
    };
    let Some(handler) = handler else {
        tracing::warn!(
            session = %session,
            service = %session.service_name(),
            "no receive handler set, dropping message"
        );
        return;
    };

    match session.role() {
        Role::Server => {
            let _scope = RxScope::enter(&message);
            handler(message);
        }
        Role::Client => handler(message),
    }
}

impl Message {
    pub(crate) fn new(session: Session) -> Self {
        let buffer = session.protocol().pool().alloc();
        Self::from_parts(session, buffer, 0, None)
    }

    pub(crate) fn from_frame(session: Session, frame: Frame) -> Self {
        let mut buffer = session.protocol().pool().alloc();
        let payload = buffer.payload_mut();
        let len = payload.len().min(frame.payload.len());
        payload[..len].copy_from_slice(&frame.payload[..len]);
        buffer.set_txn_id(frame.txn_id);
        Self::from_parts(session, buffer, frame.txn_id, frame.fd)
    }

    fn from_parts(session: Session, buffer: PooledBuffer, txn_id: u32, fd: Option<OwnedFd>) -> Self {
        Self {
            inner: Arc::new(MessageInner {
                session,
                txn_id,
                body: Mutex::new(MessageBody {
                    buffer,
                    fd,
                    response_fd: None,
                    responded: false,
                }),
            }),
        }
    }

    // ===== Accessors =====

    /// Session the message belongs to
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// Transaction id the message arrived with, 0 for notifications and
    /// locally created messages
    pub fn txn_id(&self) -> u32 {
        self.inner.txn_id
    }

    /// True for a request received by a service
    pub fn needs_response(&self) -> bool {
        self.inner.needs_response()
    }

    pub fn max_payload_size(&self) -> usize {
        self.inner.session.protocol().max_payload_size()
    }

    /// Read view of the payload region
    ///
    /// The view locks the message. Drop it before calling `encode_json`,
    /// `decode_json`, `set_fd`, `take_fd` or any send on the same message,
    /// or the thread deadlocks.
    pub fn payload(&self) -> impl Deref<Target = [u8]> + '_ {
        MutexGuard::map(self.inner.body.lock(), |body| body.buffer.payload_mut())
    }

    /// Write view of the payload region
    ///
    /// Locks the message like [`Message::payload`].
    pub fn payload_mut(&self) -> MappedMutexGuard<'_, [u8]> {
        MutexGuard::map(self.inner.body.lock(), |body| body.buffer.payload_mut())
    }

    /// Writes `value` as JSON at the start of the payload, NUL padded
    pub fn encode_json<T: Serialize>(&self, value: &T) -> Result<(), PayloadError> {
        let bytes = serde_json::to_vec(value)?;
        let mut payload = self.payload_mut();
        if bytes.len() > payload.len() {
            return Err(PayloadError::TooLarge {
                size: bytes.len(),
                max: payload.len(),
            });
        }
        payload.fill(0);
        payload[..bytes.len()].copy_from_slice(&bytes);
        Ok(())
    }

    /// Reads a JSON value written by [`Message::encode_json`]
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T, PayloadError> {
        let payload = self.payload();
        let end = payload
            .iter()
            .rposition(|&byte| byte != 0)
            .map_or(0, |last| last + 1);
        Ok(serde_json::from_slice(&payload[..end])?)
    }

    // ===== File descriptors =====

    /// Attaches a file descriptor to send with the message
    ///
    /// On a request that needs a response the fd is held for the response.
    pub fn set_fd(&self, fd: OwnedFd) {
        let for_response = self.inner.needs_response();
        let mut body = self.inner.body.lock();
        let slot = if for_response {
            &mut body.response_fd
        } else {
            &mut body.fd
        };
        if slot.is_some() {
            drop(body);
            fatal!(
                "File descriptor already set on message for service '{}'.",
                self.inner.session.service_name()
            );
        }
        *slot = Some(fd);
    }

    /// Takes the received file descriptor, if any
    pub fn take_fd(&self) -> Option<OwnedFd> {
        self.inner.body.lock().fd.take()
    }

    // ===== Reference counting =====

    /// Adds a reference; same as `clone`
    pub fn add_ref(&self) -> Message {
        self.clone()
    }

    /// Drops this reference; same as `drop`
    pub fn release(self) {}

    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    // ===== Transmission =====

    fn frame(&self, txn_id: u32) -> Frame {
        let mut body = self.inner.body.lock();
        body.buffer.set_txn_id(txn_id);
        let fd = body.fd.take();
        Frame::new(txn_id, body.buffer.payload().to_vec()).with_fd(fd)
    }

    /// Sends a one-way message
    pub fn send(self) -> RuntimeResult {
        self.inner.session.check_live();
        if self.needs_response() {
            fatal!(
                "Message::send() used on a request from a client of '{}'; it needs respond().",
                self.inner.session.service_name()
            );
        }
        let frame = self.frame(0);
        self.inner.session.send_frame(frame)
    }

    /// Sends a request; `callback` receives the response, or `None` if the
    /// session closes first
    ///
    /// The callback runs on the session owner's loop.
    pub fn request_response(
        self,
        callback: impl FnOnce(Option<Message>) + Send + 'static,
    ) -> RuntimeResult {
        let session = &self.inner.session;
        session.check_live();
        session.require_client("request_response");
        session.request_async(Box::new(callback), |txn_id| self.frame(txn_id))
    }

    /// Sends a request and blocks until its response arrives
    ///
    /// Returns `None` if the session closes first, or if the service runs on
    /// the calling thread.
    pub fn request_sync_response(self) -> Option<Message> {
        let session = &self.inner.session;
        session.check_live();
        session.require_client("request_sync_response");
        session.request_sync(|txn_id| self.frame(txn_id))
    }

    /// Sends this message back as the response to the request it carries
    pub fn respond(self) -> RuntimeResult {
        let session = &self.inner.session;
        session.check_live();
        let frame = {
            let mut body = self.inner.body.lock();
            if !self.inner.needs_response() {
                drop(body);
                fatal!(
                    "Message::respond() used on a message that needs no response (service '{}').",
                    session.service_name()
                );
            }
            if body.responded {
                drop(body);
                fatal!(
                    "Request to service '{}' answered twice.",
                    session.service_name()
                );
            }
            body.responded = true;
            if body.fd.take().is_some() {
                tracing::warn!(
                    service = %session.service_name(),
                    "closing unfetched file descriptor of answered request"
                );
            }
            let fd = body.response_fd.take();
            Frame::new(self.inner.txn_id, body.buffer.payload().to_vec()).with_fd(fd)
        };
        session.send_frame(frame)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = self.inner.body.lock();
        f.debug_struct("Message")
            .field("session", &self.inner.session.id())
            .field("txn_id", &self.inner.txn_id)
            .field("has_fd", &body.fd.is_some())
            .field("responded", &body.responded)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Runtime, RuntimeConfig};
    use serde::Deserialize;
    use std::fs::File;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Add {
        a: i32,
        b: i32,
    }

    fn session(size: usize) -> Session {
        let runtime = Runtime::new(RuntimeConfig::default());
        let protocol = runtime.get_protocol("proto-v1", size);
        runtime.create_session(&protocol, "calculator")
    }

    fn some_fd() -> OwnedFd {
        OwnedFd::from(tempfile::tempfile().unwrap())
    }

    // ===== Buffers =====

    #[test]
    fn test_new_message_is_zeroed() {
        let session = session(16);
        let message = session.create_msg();
        assert_eq!(message.txn_id(), 0);
        assert_eq!(message.max_payload_size(), 16);
        assert!(message.payload().iter().all(|&byte| byte == 0));
        assert!(!message.needs_response());
    }

    #[test]
    fn test_accessors_while_payload_held() {
        let session = session(16);
        let message = session.create_msg();
        let mut payload = message.payload_mut();
        payload[0] = 7;
        assert_eq!(message.txn_id(), 0);
        assert!(!message.needs_response());
        assert_eq!(message.max_payload_size(), 16);
        drop(payload);
        assert_eq!(message.payload()[0], 7);
    }

    #[test]
    fn test_buffer_returns_to_pool() {
        let session = session(16);
        let pool = session.protocol().pool().clone();
        let message = session.create_msg();
        assert_eq!(pool.stats().in_use, 1);
        drop(message);
        assert_eq!(pool.stats().in_use, 0);
    }

    #[test]
    fn test_ref_counting() {
        let session = session(16);
        let message = session.create_msg();
        let extra = message.add_ref();
        assert_eq!(message.ref_count(), 2);
        extra.release();
        assert_eq!(message.ref_count(), 1);
    }

    // ===== JSON =====

    #[test]
    fn test_json_payload() {
        let session = session(64);
        let message = session.create_msg();
        message.encode_json(&Add { a: 2, b: 3 }).unwrap();
        assert_eq!(message.decode_json::<Add>().unwrap(), Add { a: 2, b: 3 });
    }

    #[test]
    fn test_json_too_large() {
        let session = session(4);
        let message = session.create_msg();
        let err = message.encode_json(&Add { a: 2, b: 3 }).unwrap_err();
        assert!(matches!(err, PayloadError::TooLarge { max: 4, .. }));
    }

    // ===== File descriptors =====

    #[test]
    fn test_take_fd_once() {
        let session = session(8);
        let message = session.create_msg();
        message.set_fd(some_fd());
        let fd = message.take_fd();
        assert!(fd.is_some());
        assert!(message.take_fd().is_none());
        let _file = File::from(fd.unwrap());
    }

    #[test]
    #[should_panic(expected = "File descriptor already set")]
    fn test_double_set_fd_is_fatal() {
        let session = session(8);
        let message = session.create_msg();
        message.set_fd(some_fd());
        message.set_fd(some_fd());
    }

    // ===== Contract =====

    #[test]
    fn test_send_on_closed_session() {
        let session = session(8);
        let message = session.create_msg();
        assert_eq!(message.send(), Err(core_types::RuntimeError::Closed));
    }

    #[test]
    #[should_panic(expected = "needs no response")]
    fn test_respond_without_request_is_fatal() {
        let session = session(8);
        let _ = session.create_msg().respond();
    }

    #[test]
    #[should_panic(expected = "outside of a service receive handler")]
    fn test_kill_client_outside_handler_is_fatal() {
        kill_client("bad input");
    }

    #[test]
    fn test_no_current_message_outside_handler() {
        assert!(current_service_message().is_none());
    }
}
