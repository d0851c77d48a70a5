//! Runtime context
//!
//! The runtime owns the protocol registry and the service directory. Most
//! programs use [`Runtime::global`]; tests build isolated runtimes with
//! [`Runtime::new`].

use std::fmt;
use std::sync::{Arc, OnceLock};

use ipc::{Protocol, ProtocolRegistry};
use parking_lot::Mutex;
use services_registry::{ServiceDescriptor, ServiceKey, ServiceRegistry, Waiter, WaiterId};

use crate::config::RuntimeConfig;
use crate::service::Service;
use crate::session::Session;

/// Outcome of [`Runtime::lookup_or_wait`]
pub(crate) enum Lookup {
    Found(Service),
    /// The waiter was queued; the id withdraws it
    Queued(WaiterId),
}

struct RuntimeInner {
    config: RuntimeConfig,
    protocols: ProtocolRegistry,
    directory: Mutex<ServiceRegistry<Service>>,
}

/// Shared handle to a messaging runtime
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

static GLOBAL: OnceLock<Runtime> = OnceLock::new();

impl Runtime {
    /// Creates an isolated runtime
    pub fn new(config: RuntimeConfig) -> Self {
        let protocols = ProtocolRegistry::new(config.pool_config());
        Self {
            inner: Arc::new(RuntimeInner {
                config,
                protocols,
                directory: Mutex::new(ServiceRegistry::new()),
            }),
        }
    }

    /// Process-wide runtime with the default configuration
    pub fn global() -> &'static Runtime {
        GLOBAL.get_or_init(|| Runtime::new(RuntimeConfig::default()))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Installs the log subscriber described by the configuration
    pub fn init_logging(&self) -> bool {
        services_logger::init_logging(&self.inner.config.log)
    }

    /// Returns the protocol for the pair, registering it on first use
    pub fn get_protocol(&self, id: &str, max_payload_size: usize) -> Protocol {
        self.inner.protocols.get(id, max_payload_size)
    }

    pub fn protocols(&self) -> Vec<Protocol> {
        self.inner.protocols.protocols()
    }

    /// Creates a client session owned by the calling thread
    pub fn create_session(&self, protocol: &Protocol, service_name: &str) -> Session {
        Session::new_client(self.clone(), protocol.clone(), service_name)
    }

    /// Creates a hidden service owned by the calling thread
    pub fn create_service(&self, protocol: &Protocol, name: &str) -> Service {
        Service::new(self.clone(), protocol.clone(), name)
    }

    /// Descriptors of every advertised service
    pub fn services(&self) -> Vec<ServiceDescriptor> {
        self.inner.directory.lock().descriptors()
    }

    pub(crate) fn lookup_service(&self, key: &ServiceKey) -> Option<Service> {
        self.inner.directory.lock().lookup(key).ok()
    }

    /// Looks a service up, or queues `waiter` for it under the same lock
    ///
    /// When the service is found the waiter is dropped without running.
    pub(crate) fn lookup_or_wait(&self, key: &ServiceKey, waiter: Waiter<Service>) -> Lookup {
        let mut directory = self.inner.directory.lock();
        match directory.lookup(key) {
            Ok(service) => Lookup::Found(service),
            Err(_) => Lookup::Queued(directory.add_waiter(key.clone(), waiter)),
        }
    }

    /// Puts back waiters taken by an advertise that then failed
    ///
    /// If another service claimed the key in the meantime, the waiters run
    /// with it instead.
    pub(crate) fn restore_waiters(&self, key: &ServiceKey, waiters: Vec<(WaiterId, Waiter<Service>)>) {
        let service = {
            let mut directory = self.inner.directory.lock();
            match directory.lookup(key) {
                Ok(service) => service,
                Err(_) => {
                    for (id, waiter) in waiters {
                        directory.restore_waiter(key.clone(), id, waiter);
                    }
                    return;
                }
            }
        };
        for (_, waiter) in waiters {
            waiter(service.clone());
        }
    }

    /// Withdraws a waiter queued by [`lookup_or_wait`](Self::lookup_or_wait)
    pub(crate) fn cancel_wait(&self, key: &ServiceKey, id: WaiterId) {
        if self.inner.directory.lock().remove_waiter(key, id) {
            tracing::trace!(service = %key, "open waiter withdrawn");
        }
    }

    /// Number of clients waiting for `key` to be advertised
    pub fn waiting_clients(&self, key: &ServiceKey) -> usize {
        self.inner.directory.lock().waiter_count(key)
    }

    /// Advertises a service and hands back the clients that were waiting for it
    pub(crate) fn register_service(
        &self,
        descriptor: ServiceDescriptor,
        service: Service,
    ) -> Result<Vec<(WaiterId, Waiter<Service>)>, services_registry::RegistryError> {
        let mut directory = self.inner.directory.lock();
        let key = descriptor.key.clone();
        directory.register(descriptor, service)?;
        Ok(directory.take_waiters(&key))
    }

    pub(crate) fn unregister_service(&self, descriptor: &ServiceDescriptor) {
        let result = self
            .inner
            .directory
            .lock()
            .unregister(&descriptor.key, descriptor.id);
        if let Err(err) = result {
            tracing::debug!(error = %err, "service was not advertised");
        }
    }

    /// True if both handles share one runtime
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("protocols", &self.inner.protocols.count())
            .field("services", &self.inner.directory.lock().count())
            .finish()
    }
}
