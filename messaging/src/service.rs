//! Services
//!
//! A service is the server end of a protocol: it owns the server-side
//! sessions of its clients and dispatches their messages to one receive
//! handler, on the thread that created the service.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use core_types::{fatal, RuntimeError, RuntimeResult, ServiceId, ThreadRef};
use event_loop::LoopHandle;
use ipc::{Credentials, Protocol, Transport};
use parking_lot::Mutex;
use services_registry::{ServiceDescriptor, ServiceKey};

use crate::endpoint::Listener;
use crate::message::Message;
use crate::runtime::Runtime;
use crate::session::{Context, ReceiveHandler, Session, SessionHandler};

#[derive(Default)]
struct ServiceState {
    advertised: bool,
    deleted: bool,
    receive_handler: Option<ReceiveHandler>,
    open_handlers: Vec<(u64, SessionHandler)>,
    close_handlers: Vec<(u64, SessionHandler)>,
    context: Option<Context>,
    sessions: Vec<Session>,
    listener: Option<Listener>,
}

pub(crate) struct ServiceShared {
    id: ServiceId,
    runtime: Runtime,
    protocol: Protocol,
    name: String,
    owner: LoopHandle,
    next_handler: AtomicU64,
    fd_reception: AtomicBool,
    state: Mutex<ServiceState>,
}

/// Handle to a service
#[derive(Clone)]
pub struct Service {
    shared: Arc<ServiceShared>,
}

/// Registration of an open or close handler
///
/// Dropping it leaves the handler installed; call [`HandlerRef::remove`].
#[derive(Debug)]
pub struct HandlerRef {
    service: Weak<ServiceShared>,
    id: u64,
}

impl HandlerRef {
    /// Uninstalls the handler
    pub fn remove(self) {
        if let Some(service) = Service::upgrade(&self.service) {
            service.remove_handler(self);
        }
    }
}

impl Service {
    pub(crate) fn new(runtime: Runtime, protocol: Protocol, name: &str) -> Self {
        Self {
            shared: Arc::new(ServiceShared {
                id: ServiceId::new(),
                runtime,
                protocol,
                name: name.to_string(),
                owner: event_loop::current(),
                next_handler: AtomicU64::new(1),
                fd_reception: AtomicBool::new(false),
                state: Mutex::new(ServiceState::default()),
            }),
        }
    }

    pub(crate) fn upgrade(weak: &Weak<ServiceShared>) -> Option<Service> {
        weak.upgrade().map(|shared| Service { shared })
    }

    pub(crate) fn downgrade(&self) -> Weak<ServiceShared> {
        Arc::downgrade(&self.shared)
    }

    // ===== Accessors =====

    pub fn id(&self) -> ServiceId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn protocol(&self) -> &Protocol {
        &self.shared.protocol
    }

    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(&self.shared.name, self.shared.protocol.id())
    }

    pub fn is_advertised(&self) -> bool {
        self.shared.state.lock().advertised
    }

    /// Number of open client sessions
    pub fn session_count(&self) -> usize {
        self.shared.state.lock().sessions.len()
    }

    /// Thread whose loop runs this service's handlers
    pub fn owner_thread(&self) -> &ThreadRef {
        self.shared.owner.thread()
    }

    pub(crate) fn runtime(&self) -> &Runtime {
        &self.shared.runtime
    }

    pub(crate) fn owner(&self) -> &LoopHandle {
        &self.shared.owner
    }

    fn descriptor(&self) -> ServiceDescriptor {
        ServiceDescriptor {
            id: self.shared.id,
            key: self.key(),
            max_payload_size: self.shared.protocol.max_payload_size(),
        }
    }

    fn check_live(&self) {
        if self.shared.state.lock().deleted {
            fatal!("Service '{}' used after it was deleted.", self.shared.name);
        }
    }

    // ===== Handlers and context =====

    /// Installs the handler for messages from clients
    pub fn set_receive_handler(&self, handler: impl Fn(Message) + Send + Sync + 'static) {
        self.check_live();
        // The previous handler may own requests; drop it outside the lock.
        let _previous = self
            .shared
            .state
            .lock()
            .receive_handler
            .replace(Arc::new(handler));
    }

    pub(crate) fn receive_handler(&self) -> Option<ReceiveHandler> {
        self.shared.state.lock().receive_handler.clone()
    }

    /// Adds a handler run when a client opens a session
    pub fn add_open_handler(&self, handler: impl Fn(&Session) + Send + Sync + 'static) -> HandlerRef {
        self.check_live();
        let id = self.shared.next_handler.fetch_add(1, Ordering::Relaxed);
        self.shared
            .state
            .lock()
            .open_handlers
            .push((id, Arc::new(handler)));
        HandlerRef {
            service: self.downgrade(),
            id,
        }
    }

    /// Adds a handler run when a client session closes
    pub fn add_close_handler(&self, handler: impl Fn(&Session) + Send + Sync + 'static) -> HandlerRef {
        self.check_live();
        let id = self.shared.next_handler.fetch_add(1, Ordering::Relaxed);
        self.shared
            .state
            .lock()
            .close_handlers
            .push((id, Arc::new(handler)));
        HandlerRef {
            service: self.downgrade(),
            id,
        }
    }

    pub fn remove_handler(&self, handler: HandlerRef) {
        if !Weak::ptr_eq(&handler.service, &self.downgrade()) {
            fatal!(
                "Handler removed from service '{}' it was not added to.",
                self.shared.name
            );
        }
        let mut state = self.shared.state.lock();
        state.open_handlers.retain(|(id, _)| *id != handler.id);
        state.close_handlers.retain(|(id, _)| *id != handler.id);
    }

    pub fn set_context<T: Any + Send + Sync>(&self, context: T) {
        self.check_live();
        let _previous = self.shared.state.lock().context.replace(Arc::new(context));
    }

    /// Returns the context if one of type `T` is set
    pub fn context<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let context = self.shared.state.lock().context.clone()?;
        context.downcast::<T>().ok()
    }

    fn run_open_handlers(&self, session: &Session) {
        let handlers: Vec<_> = self
            .shared
            .state
            .lock()
            .open_handlers
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            handler(session);
        }
    }

    pub(crate) fn run_close_handlers(&self, session: &Session) {
        let handlers: Vec<_> = self
            .shared
            .state
            .lock()
            .close_handlers
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            handler(session);
        }
    }

    // ===== File descriptors =====

    /// Lets clients send file descriptors to this service
    ///
    /// Off by default: an fd arriving from a client is closed with a warning
    /// and the message is delivered without it.
    pub fn enable_fd_reception(&self) {
        self.check_live();
        self.shared.fd_reception.store(true, Ordering::Release);
    }

    pub fn fd_reception_enabled(&self) -> bool {
        self.shared.fd_reception.load(Ordering::Acquire)
    }

    // ===== Discoverability =====

    /// Makes the service reachable by clients
    ///
    /// Fails with `Err(Duplicate)` if another service already advertises the
    /// same name and protocol. Advertising twice is a no-op.
    pub fn advertise(&self) -> RuntimeResult {
        self.check_live();
        if self.is_advertised() {
            return Ok(());
        }

        let descriptor = self.descriptor();
        let waiters = self
            .shared
            .runtime
            .register_service(descriptor.clone(), self.clone())
            .map_err(RuntimeError::from)?;

        let listener = match self.shared.runtime.config().socket_dir.clone() {
            Some(dir) => match Listener::bind(&dir, self) {
                Ok(listener) => Some(listener),
                Err(err) => {
                    self.shared.runtime.unregister_service(&descriptor);
                    self.shared.runtime.restore_waiters(&descriptor.key, waiters);
                    return Err(RuntimeError::CommError(format!(
                        "could not listen for service '{}': {}",
                        self.shared.name, err
                    )));
                }
            },
            None => None,
        };

        {
            let mut state = self.shared.state.lock();
            state.advertised = true;
            state.listener = listener;
        }
        tracing::info!(service = %descriptor.key, id = %self.shared.id, "service advertised");

        for (_, waiter) in waiters {
            waiter(self.clone());
        }
        Ok(())
    }

    /// Stops new clients from finding the service
    ///
    /// Existing sessions stay open.
    pub fn hide(&self) {
        self.check_live();
        self.withdraw();
    }

    fn withdraw(&self) {
        let listener = {
            let mut state = self.shared.state.lock();
            if !state.advertised {
                return;
            }
            state.advertised = false;
            state.listener.take()
        };
        self.shared.runtime.unregister_service(&self.descriptor());
        if let Some(listener) = listener {
            listener.stop();
        }
        tracing::info!(service = %self.key(), "service hidden");
    }

    /// Hides the service and closes every client session
    pub fn delete(self) {
        self.check_live();
        self.withdraw();
        let (sessions, handlers) = {
            let mut state = self.shared.state.lock();
            state.deleted = true;
            let handlers = (
                state.receive_handler.take(),
                std::mem::take(&mut state.open_handlers),
                std::mem::take(&mut state.close_handlers),
                state.context.take(),
            );
            (std::mem::take(&mut state.sessions), handlers)
        };
        tracing::debug!(service = %self.key(), sessions = sessions.len(), "service deleted");
        for session in sessions {
            session.close();
        }
        // Requests still held by handlers are released after their sessions closed.
        drop(handlers);
    }

    // ===== Sessions =====

    /// Creates the server session for a newly connected client
    ///
    /// Open handlers are queued on the service loop before the transport
    /// starts delivering, so they run before the client's first message.
    pub(crate) fn accept(
        &self,
        transport: Arc<dyn Transport>,
        peer_thread: Option<ThreadRef>,
        credentials: Option<Credentials>,
    ) -> RuntimeResult {
        if self.shared.state.lock().deleted {
            transport.close();
            return Err(RuntimeError::Closed);
        }

        let session = Session::new_server(self);
        session.attach_server(&transport, peer_thread, credentials);
        self.shared.state.lock().sessions.push(session.clone());
        tracing::debug!(service = %self.key(), session = %session, "client connected");

        let service = self.clone();
        let opened = session.clone();
        self.shared
            .owner
            .post(move || service.run_open_handlers(&opened));

        session.start_receiving(&transport);
        Ok(())
    }

    pub(crate) fn remove_session(&self, session: &Session) {
        self.shared
            .state
            .lock()
            .sessions
            .retain(|existing| existing != session);
    }
}

impl PartialEq for Service {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Service {}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("protocol", &self.shared.protocol)
            .field("advertised", &self.is_advertised())
            .finish()
    }
}
