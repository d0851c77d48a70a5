//! Sessions
//!
//! A session is one end of a connection between a client and a service. It
//! moves through `Created -> Opening -> Open -> Closed` and is pinned to the
//! thread that created it (for server sessions, the service's thread): every
//! handler and completion callback for the session runs on that thread's
//! event loop.
//!
//! Locks inside a session guard only its own tables. They are never held
//! while calling into a transport, so two sessions of one connection cannot
//! deadlock each other.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;

use core_types::{fatal, RuntimeError, RuntimeResult, SessionId, ThreadRef};
use event_loop::LoopHandle;
use ipc::{ChannelTransport, Credentials, Frame, InboundSink, Protocol, Transport, TransportEvent};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use services_registry::{ServiceKey, Waiter, WaiterId};

use crate::endpoint;
use crate::message::Message;
use crate::runtime::{Lookup, Runtime};
use crate::service::{Service, ServiceShared};
use crate::transaction::{Pending, ResponseCallback, SyncSlot, TransactionTable};

/// Handler taking a session: open and close notifications
pub type SessionHandler = Arc<dyn Fn(&Session) + Send + Sync + 'static>;

/// Handler for inbound messages
pub type ReceiveHandler = Arc<dyn Fn(Message) + Send + Sync + 'static>;

/// Completion of an asynchronous open
pub type OpenCallback = Box<dyn FnOnce(&Session) + Send + 'static>;

/// Opaque value attached to a session or service
pub(crate) type Context = Arc<dyn Any + Send + Sync>;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Created, not connected
    Created,
    /// Waiting for the service
    Opening,
    /// Connected
    Open,
    /// Closed by either side
    Closed,
}

/// Which end of the connection a session is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Client,
    Server,
}

struct SessionInner {
    state: SessionState,
    deleted: bool,
    transport: Option<Arc<dyn Transport>>,
    transactions: TransactionTable,
    receive_handler: Option<ReceiveHandler>,
    close_handler: Option<SessionHandler>,
    open_callback: Option<OpenCallback>,
    open_waiter: Option<WaiterId>,
    context: Option<Context>,
    peer_thread: Option<ThreadRef>,
    credentials: Option<Credentials>,
}

pub(crate) struct SessionShared {
    id: SessionId,
    runtime: Runtime,
    protocol: Protocol,
    service_name: String,
    role: Role,
    owner: LoopHandle,
    service: Weak<ServiceShared>,
    inner: Mutex<SessionInner>,
}

impl Drop for SessionShared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if let Some(id) = inner.open_waiter.take() {
            let key = ServiceKey::new(&self.service_name, self.protocol.id());
            self.runtime.cancel_wait(&key, id);
        }
        if let Some(transport) = inner.transport.take() {
            transport.close();
        }
    }
}

/// Handle to a session
///
/// Cloning adds a reference; the session lives while any handle or message
/// refers to it.
#[derive(Clone)]
pub struct Session {
    shared: Arc<SessionShared>,
}

/// Reports a protocol size mismatch between a client and a service
pub(crate) fn fatal_size_mismatch(protocol_id: &str, client: usize, server: usize) -> ! {
    fatal!(
        "Client and server disagree on the maximum message size of protocol '{}' (client {}, server {}).",
        protocol_id,
        client,
        server
    )
}

impl Session {
    fn new(
        runtime: Runtime,
        protocol: Protocol,
        service_name: &str,
        role: Role,
        owner: LoopHandle,
        service: Weak<ServiceShared>,
    ) -> Self {
        Self {
            shared: Arc::new(SessionShared {
                id: SessionId::new(),
                runtime,
                protocol,
                service_name: service_name.to_string(),
                role,
                owner,
                service,
                inner: Mutex::new(SessionInner {
                    state: SessionState::Created,
                    deleted: false,
                    transport: None,
                    transactions: TransactionTable::new(),
                    receive_handler: None,
                    close_handler: None,
                    open_callback: None,
                    open_waiter: None,
                    context: None,
                    peer_thread: None,
                    credentials: None,
                }),
            }),
        }
    }

    pub(crate) fn new_client(runtime: Runtime, protocol: Protocol, service_name: &str) -> Self {
        Self::new(
            runtime,
            protocol,
            service_name,
            Role::Client,
            event_loop::current(),
            Weak::new(),
        )
    }

    pub(crate) fn new_server(service: &Service) -> Self {
        Self::new(
            service.runtime().clone(),
            service.protocol().clone(),
            service.name(),
            Role::Server,
            service.owner().clone(),
            service.downgrade(),
        )
    }

    // ===== Accessors =====

    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn is_client(&self) -> bool {
        self.shared.role == Role::Client
    }

    pub fn protocol(&self) -> &Protocol {
        &self.shared.protocol
    }

    /// Name of the service this session talks to
    pub fn service_name(&self) -> &str {
        &self.shared.service_name
    }

    pub fn state(&self) -> SessionState {
        self.shared.inner.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Thread whose event loop runs this session's callbacks
    pub fn owner_thread(&self) -> &ThreadRef {
        self.shared.owner.thread()
    }

    /// Thread running the other end, when it lives in this process
    pub fn peer_thread(&self) -> Option<ThreadRef> {
        self.shared.inner.lock().peer_thread.clone()
    }

    /// The service a server session belongs to
    pub fn service(&self) -> Option<Service> {
        Service::upgrade(&self.shared.service)
    }

    /// Number of handles (including messages) referring to this session
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.shared)
    }

    /// Requests still waiting for their response
    pub fn pending_transactions(&self) -> usize {
        self.shared.inner.lock().transactions.len()
    }

    pub(crate) fn owner(&self) -> &LoopHandle {
        &self.shared.owner
    }

    fn key(&self) -> ServiceKey {
        ServiceKey::new(&self.shared.service_name, self.shared.protocol.id())
    }

    // ===== Handlers and context =====

    /// Installs the handler for messages that are not responses
    pub fn set_receive_handler(&self, handler: impl Fn(Message) + Send + Sync + 'static) {
        self.check_live();
        let _previous = self.shared.inner.lock().receive_handler.replace(Arc::new(handler));
    }

    /// Installs the handler run when the other side closes the session
    ///
    /// A client session closed by its server without a close handler is fatal.
    pub fn set_close_handler(&self, handler: impl Fn(&Session) + Send + Sync + 'static) {
        self.check_live();
        let _previous = self.shared.inner.lock().close_handler.replace(Arc::new(handler));
    }

    pub fn set_context<T: Any + Send + Sync>(&self, context: T) {
        self.check_live();
        let _previous = self.shared.inner.lock().context.replace(Arc::new(context));
    }

    /// Returns the context if one of type `T` is set
    pub fn context<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let context = self.shared.inner.lock().context.clone()?;
        context.downcast::<T>().ok()
    }

    pub(crate) fn receive_handler(&self) -> Option<ReceiveHandler> {
        self.shared.inner.lock().receive_handler.clone()
    }

    // ===== Credentials =====

    /// Credentials of the connected client (server sessions only)
    pub fn client_credentials(&self) -> RuntimeResult<Credentials> {
        self.check_live();
        if self.is_client() {
            fatal!(
                "Client credentials requested on client session to '{}'.",
                self.shared.service_name
            );
        }
        let inner = self.shared.inner.lock();
        if inner.state != SessionState::Open {
            return Err(RuntimeError::Closed);
        }
        inner
            .credentials
            .ok_or_else(|| RuntimeError::CommError("peer credentials unavailable".to_string()))
    }

    pub fn client_user_id(&self) -> RuntimeResult<u32> {
        self.client_credentials().map(|creds| creds.uid)
    }

    pub fn client_process_id(&self) -> RuntimeResult<i32> {
        self.client_credentials().map(|creds| creds.pid)
    }

    // ===== Contract checks =====

    pub(crate) fn check_live(&self) {
        if self.shared.inner.lock().deleted {
            fatal!(
                "Session to '{}' used after it was deleted.",
                self.shared.service_name
            );
        }
    }

    pub(crate) fn require_client(&self, operation: &str) {
        if !self.is_client() {
            fatal!(
                "'{}' is not allowed on server-side session of service '{}'.",
                operation,
                self.shared.service_name
            );
        }
    }

    // ===== Messages =====

    /// Allocates a zeroed message from the protocol's pool
    pub fn create_msg(&self) -> Message {
        self.check_live();
        Message::new(self.clone())
    }

    // ===== Opening =====

    /// A closed session stays closed; retrying takes a new session
    fn begin_open(&self) {
        let mut inner = self.shared.inner.lock();
        match inner.state {
            SessionState::Created => inner.state = SessionState::Opening,
            state => {
                drop(inner);
                fatal!(
                    "Session to '{}' opened while {:?}.",
                    self.shared.service_name,
                    state
                );
            }
        }
    }

    fn abandon_open(&self) {
        {
            let mut inner = self.shared.inner.lock();
            if inner.state == SessionState::Opening {
                inner.state = SessionState::Created;
                inner.open_callback = None;
            }
        }
        self.cancel_open_waiter();
    }

    /// Looks the service up, leaving `waiter` queued at the directory if it
    /// is not advertised yet
    fn find_or_wait(&self, waiter: Waiter<Service>) -> Option<Service> {
        let key = self.key();
        match self.shared.runtime.lookup_or_wait(&key, waiter) {
            Lookup::Found(service) => Some(service),
            Lookup::Queued(id) => {
                let previous = self.shared.inner.lock().open_waiter.replace(id);
                if let Some(previous) = previous {
                    self.shared.runtime.cancel_wait(&key, previous);
                }
                None
            }
        }
    }

    fn cancel_open_waiter(&self) {
        let waiter = self.shared.inner.lock().open_waiter.take();
        if let Some(id) = waiter {
            self.shared.runtime.cancel_wait(&self.key(), id);
        }
    }

    /// Waiter that resumes an async open on the owner loop
    ///
    /// Holds the session weakly so a queued waiter never keeps it alive.
    fn async_open_waiter(&self) -> Waiter<Service> {
        let session = Arc::downgrade(&self.shared);
        let owner = self.shared.owner.clone();
        Box::new(move |service: Service| {
            owner.post(move || {
                if let Some(shared) = session.upgrade() {
                    Session { shared }.complete_open(service);
                }
            });
        })
    }

    fn is_opening(&self) -> bool {
        self.state() == SessionState::Opening
    }

    /// Opens the session asynchronously
    ///
    /// `callback` runs on the owning thread's loop once connected. If the
    /// service is not advertised yet, the session waits for it. Opening a
    /// session that is not in the `Created` state is fatal.
    pub fn open(&self, callback: impl FnOnce(&Session) + Send + 'static) {
        self.check_live();
        self.require_client("open");
        self.begin_open();
        self.shared.inner.lock().open_callback = Some(Box::new(callback));

        match self.find_or_wait(self.async_open_waiter()) {
            Some(service) => match self.connect_local(&service) {
                Ok(()) => self.post_open_callback(),
                Err(err) => {
                    tracing::debug!(error = %err, "service refused the session");
                    let session = self.clone();
                    self.owner().post(move || session.complete_open(service));
                }
            },
            None => match self.connect_socket() {
                Ok(true) => self.post_open_callback(),
                Ok(false) => {
                    tracing::debug!(service = %self.key(), "waiting for service to be advertised")
                }
                Err(err) => tracing::debug!(error = %err, "socket connect failed"),
            },
        }
    }

    fn complete_open(&self, service: Service) {
        if !self.is_opening() {
            return;
        }
        match self.connect_local(&service) {
            Ok(()) => self.run_open_callback(),
            Err(err) => {
                tracing::debug!(error = %err, service = %self.key(), "service vanished, waiting again");
                if let Some(service) = self.find_or_wait(self.async_open_waiter()) {
                    let session = self.clone();
                    self.owner().post(move || session.complete_open(service));
                }
            }
        }
    }

    fn post_open_callback(&self) {
        let session = self.clone();
        self.owner().post(move || session.run_open_callback());
    }

    fn run_open_callback(&self) {
        let callback = self.shared.inner.lock().open_callback.take();
        if let Some(callback) = callback {
            callback(self);
        }
    }

    /// Opens the session, blocking until connected
    ///
    /// Waits for the service to be advertised. With
    /// [`RuntimeConfig::open_timeout`](crate::RuntimeConfig) set, gives up with
    /// `Err(Timeout)`.
    pub fn open_sync(&self) -> RuntimeResult {
        self.check_live();
        self.require_client("open_sync");
        self.begin_open();

        let config = self.shared.runtime.config();
        let deadline = config.open_timeout.map(|timeout| Instant::now() + timeout);
        let polls_socket = config.socket_dir.is_some();
        let retry = config.connect_retry_interval;

        let slot = SyncSlot::new();
        let filler = Arc::clone(&slot);
        let waiter = Box::new(move |service: Service| filler.fill(service));

        if let Some(service) = self.find_or_wait(waiter) {
            return self.finish_sync_open(service);
        }

        loop {
            match self.connect_socket() {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(err) => tracing::debug!(error = %err, "socket connect failed"),
            }

            let wake = match (deadline, polls_socket) {
                (Some(deadline), true) => Some(deadline.min(Instant::now() + retry)),
                (Some(deadline), false) => Some(deadline),
                (None, true) => Some(Instant::now() + retry),
                (None, false) => None,
            };
            let found = match wake {
                Some(wake) => slot.wait_until(wake),
                None => Some(slot.wait()),
            };
            if let Some(service) = found {
                return self.finish_sync_open(service);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                self.abandon_open();
                return Err(RuntimeError::Timeout);
            }
        }
    }

    fn finish_sync_open(&self, service: Service) -> RuntimeResult {
        match self.connect_local(&service) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.abandon_open();
                Err(err)
            }
        }
    }

    /// Opens the session if the service is reachable right now
    pub fn try_open_sync(&self) -> RuntimeResult {
        self.check_live();
        self.require_client("try_open_sync");
        self.begin_open();

        let key = self.key();
        let result = match self.shared.runtime.lookup_service(&key) {
            Some(service) => self.connect_local(&service),
            None => match self.connect_socket() {
                Ok(true) => Ok(()),
                Ok(false) => Err(RuntimeError::NotFound(key.to_string())),
                Err(err) => Err(err),
            },
        };
        if result.is_err() {
            self.abandon_open();
        }
        result
    }

    /// Connects to a service in this process; runs on the client's thread
    fn connect_local(&self, service: &Service) -> RuntimeResult {
        let client_size = self.shared.protocol.max_payload_size();
        let server_size = service.protocol().max_payload_size();
        if client_size != server_size {
            fatal_size_mismatch(self.shared.protocol.id(), client_size, server_size);
        }

        let (client_end, server_end) = ChannelTransport::pair();
        let credentials = client_end.peer_credentials();
        service.accept(
            Arc::new(server_end),
            Some(ThreadRef::current()),
            credentials,
        )?;
        self.attach(Arc::new(client_end), Some(service.owner().thread().clone()), None);
        tracing::debug!(session = %self.shared.id, service = %self.key(), "session opened");
        Ok(())
    }

    /// Connects through the service's socket, if sockets are configured
    fn connect_socket(&self) -> RuntimeResult<bool> {
        let Some(dir) = self.shared.runtime.config().socket_dir.clone() else {
            return Ok(false);
        };
        match endpoint::connect(&dir, &self.shared.service_name, &self.shared.protocol)? {
            Some(transport) => {
                let credentials = transport.peer_credentials();
                self.attach(Arc::new(transport), None, credentials);
                tracing::debug!(session = %self.shared.id, service = %self.key(), "session opened over socket");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Marks the session open on `transport` and starts receiving
    pub(crate) fn attach(
        &self,
        transport: Arc<dyn Transport>,
        peer_thread: Option<ThreadRef>,
        credentials: Option<Credentials>,
    ) {
        {
            let mut inner = self.shared.inner.lock();
            inner.state = SessionState::Open;
            inner.transport = Some(Arc::clone(&transport));
            inner.peer_thread = peer_thread;
            inner.credentials = credentials;
        }
        self.cancel_open_waiter();
        transport.start(self.sink());
    }

    /// Marks a server session open without receiving yet
    pub(crate) fn attach_server(
        &self,
        transport: &Arc<dyn Transport>,
        peer_thread: Option<ThreadRef>,
        credentials: Option<Credentials>,
    ) {
        let mut inner = self.shared.inner.lock();
        inner.state = SessionState::Open;
        inner.transport = Some(Arc::clone(transport));
        inner.peer_thread = peer_thread;
        inner.credentials = credentials;
    }

    pub(crate) fn start_receiving(&self, transport: &Arc<dyn Transport>) {
        transport.start(self.sink());
    }

    // ===== Closing =====

    /// Closes the session
    ///
    /// Pending transactions complete with `None`. No handler runs on this
    /// side; the peer's close handlers run on the peer's side. Closing a
    /// session that is not open does nothing.
    pub fn close(&self) {
        self.check_live();
        self.close_local();
    }

    fn close_local(&self) {
        let (transport, pending) = {
            let mut inner = self.shared.inner.lock();
            match inner.state {
                SessionState::Open | SessionState::Opening => {}
                SessionState::Created | SessionState::Closed => return,
            }
            inner.state = SessionState::Closed;
            inner.open_callback = None;
            (inner.transport.take(), inner.transactions.drain())
        };
        tracing::debug!(session = %self.shared.id, service = %self.key(), "session closed locally");
        self.cancel_open_waiter();

        if let Some(transport) = transport {
            transport.close();
        }
        self.resolve_pending(pending);

        if let Some(service) = self.service() {
            service.remove_session(self);
        }
    }

    /// Closes a server session whose request was released unanswered
    pub(crate) fn close_unresponded(&self) {
        self.close_local();
        if let Some(service) = self.service() {
            let session = self.clone();
            self.owner()
                .post(move || service.run_close_handlers(&session));
        }
    }

    fn handle_remote_close(&self) {
        let (transport, pending) = {
            let mut inner = self.shared.inner.lock();
            if inner.state != SessionState::Open {
                return;
            }
            inner.state = SessionState::Closed;
            (inner.transport.take(), inner.transactions.drain())
        };
        tracing::debug!(session = %self.shared.id, service = %self.key(), "session closed by peer");
        drop(transport);
        self.resolve_pending(pending);

        let session = self.clone();
        match self.shared.role {
            Role::Client => self.owner().post(move || {
                let handler = session.shared.inner.lock().close_handler.clone();
                match handler {
                    Some(handler) => handler(&session),
                    None => fatal!(
                        "Server closed the session to service '{}' and no close handler is set.",
                        session.shared.service_name
                    ),
                }
            }),
            Role::Server => {
                let service = self.service();
                if let Some(service) = &service {
                    service.remove_session(self);
                }
                self.owner().post(move || {
                    if let Some(service) = service {
                        service.run_close_handlers(&session);
                    }
                    let handler = session.shared.inner.lock().close_handler.clone();
                    if let Some(handler) = handler {
                        handler(&session);
                    }
                });
            }
        }
    }

    fn resolve_pending(&self, pending: Vec<Pending>) {
        for entry in pending {
            match entry {
                Pending::Sync(slot) => slot.fill(None),
                Pending::Callback(callback) => self.owner().post(move || callback(None)),
            }
        }
    }

    /// Deletes a client session, closing it first if needed
    ///
    /// Any handle used afterwards is fatal.
    pub fn delete(self) {
        self.check_live();
        self.require_client("delete");
        self.close_local();
        self.shared.inner.lock().deleted = true;
    }

    // ===== Transmission =====

    fn open_transport(&self) -> RuntimeResult<Arc<dyn Transport>> {
        let inner = self.shared.inner.lock();
        match (&inner.state, &inner.transport) {
            (SessionState::Open, Some(transport)) => Ok(Arc::clone(transport)),
            _ => Err(RuntimeError::Closed),
        }
    }

    pub(crate) fn send_frame(&self, frame: Frame) -> RuntimeResult {
        let transport = self.open_transport()?;
        transport.send(frame).map_err(RuntimeError::from)
    }

    /// Registers a transaction, transmits, and undoes the registration on failure
    fn transact(&self, pending: Pending, frame_for: impl FnOnce(u32) -> Frame) -> RuntimeResult {
        let (txn_id, transport) = {
            let mut inner = self.shared.inner.lock();
            let transport = match (&inner.state, &inner.transport) {
                (SessionState::Open, Some(transport)) => Arc::clone(transport),
                _ => return Err(RuntimeError::Closed),
            };
            let txn_id = inner.transactions.next_id();
            inner.transactions.insert(txn_id, pending);
            (txn_id, transport)
        };

        match transport.send(frame_for(txn_id)) {
            Ok(()) => Ok(()),
            Err(err) => {
                let removed = self.shared.inner.lock().transactions.take(txn_id);
                match removed {
                    Some(_) => Err(err.into()),
                    // Already completed by a close; the completion reports it.
                    None => Ok(()),
                }
            }
        }
    }

    pub(crate) fn request_async(
        &self,
        callback: ResponseCallback,
        frame_for: impl FnOnce(u32) -> Frame,
    ) -> RuntimeResult {
        self.transact(Pending::Callback(callback), frame_for)
    }

    pub(crate) fn request_sync(&self, frame_for: impl FnOnce(u32) -> Frame) -> Option<Message> {
        if !self.shared.owner.is_current() {
            fatal!(
                "Thread '{}' attempted a synchronous request on a session owned by thread '{}'.",
                ThreadRef::current(),
                self.shared.owner.thread()
            );
        }
        if self.peer_thread().is_some_and(|peer| peer.is_current()) {
            tracing::error!(
                service = %self.key(),
                "synchronous request to a service running on the calling thread refused"
            );
            return None;
        }

        let slot = SyncSlot::new();
        if let Err(err) = self.transact(Pending::Sync(Arc::clone(&slot)), frame_for) {
            tracing::debug!(error = %err, "synchronous request not sent");
            return None;
        }
        slot.wait()
    }

    // ===== Inbound =====

    fn sink(&self) -> InboundSink {
        let weak = Arc::downgrade(&self.shared);
        Arc::new(move |event| {
            if let Some(shared) = weak.upgrade() {
                Session { shared }.handle_event(event);
            }
        })
    }

    /// Clients always take fds; a service must opt in
    fn accepts_fds(&self) -> bool {
        match self.shared.role {
            Role::Client => true,
            Role::Server => self
                .service()
                .is_some_and(|service| service.fd_reception_enabled()),
        }
    }

    fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Frame(frame) => self.handle_frame(frame),
            TransportEvent::Closed => self.handle_remote_close(),
        }
    }

    fn handle_frame(&self, mut frame: Frame) {
        if frame.fd.is_some() && !self.accepts_fds() {
            tracing::warn!(
                session = %self.shared.id,
                service = %self.shared.service_name,
                "closing file descriptor from client; fd reception is not enabled"
            );
            frame.fd = None;
        }
        let txn_id = frame.txn_id;
        let message = Message::from_frame(self.clone(), frame);

        if self.is_client() && txn_id != 0 {
            let pending = self.shared.inner.lock().transactions.take(txn_id);
            match pending {
                Some(Pending::Sync(slot)) => return slot.fill(Some(message)),
                Some(Pending::Callback(callback)) => {
                    return self.owner().post(move || callback(Some(message)))
                }
                None => tracing::warn!(
                    session = %self.shared.id,
                    txn_id,
                    "response matches no outstanding request"
                ),
            }
        }

        self.owner().post(move || crate::message::deliver(message));
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Session {}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("role", &self.shared.role)
            .field("service", &self.shared.service_name)
            .field("protocol", &self.shared.protocol)
            .field("state", &self.state())
            .finish()
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.shared.id)
    }
}
