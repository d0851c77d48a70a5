//! # Service Registry
//!
//! This crate implements the directory that clients use to find services.
//!
//! ## Philosophy
//!
//! A service is found by its name together with the id of the protocol it
//! speaks. Two services may share a name if they speak different protocols.
//! Clients that ask for a service before it is advertised leave a waiter that
//! fires when it appears.
//!
//! The registry is a plain data structure; callers provide the locking and
//! fire waiters outside their lock.

use core_types::{RuntimeError, ServiceId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Directory key: service name plus protocol id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey {
    pub name: String,
    pub protocol_id: String,
}

impl ServiceKey {
    pub fn new(name: &str, protocol_id: &str) -> Self {
        Self {
            name: name.to_string(),
            protocol_id: protocol_id.to_string(),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.protocol_id)
    }
}

/// Error types for registry operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Another service is already advertised under this key
    #[error("service {0} is already advertised")]
    AlreadyRegistered(ServiceKey),
    /// Nothing advertised under this key
    #[error("service {0} not found")]
    NotFound(ServiceKey),
}

impl From<RegistryError> for RuntimeError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::AlreadyRegistered(key) => RuntimeError::Duplicate(key.to_string()),
            RegistryError::NotFound(key) => RuntimeError::NotFound(key.to_string()),
        }
    }
}

/// Descriptor for an advertised service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub id: ServiceId,
    pub key: ServiceKey,
    pub max_payload_size: usize,
}

/// Callback for a client waiting on a key
pub type Waiter<E> = Box<dyn FnOnce(E) + Send>;

/// Token for a queued waiter, used to withdraw it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaiterId(u64);

/// Service directory
///
/// `E` is whatever the caller needs to reach the service (a handle in
/// process, for instance).
pub struct ServiceRegistry<E> {
    services: HashMap<ServiceKey, (ServiceDescriptor, E)>,
    waiters: HashMap<ServiceKey, Vec<(WaiterId, Waiter<E>)>>,
    next_waiter: u64,
}

impl<E: Clone> ServiceRegistry<E> {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
            waiters: HashMap::new(),
            next_waiter: 1,
        }
    }

    /// Registers a service
    ///
    /// Waiters for the key are left in place; collect them with
    /// [`take_waiters`](Self::take_waiters).
    pub fn register(&mut self, descriptor: ServiceDescriptor, entry: E) -> Result<(), RegistryError> {
        if self.services.contains_key(&descriptor.key) {
            return Err(RegistryError::AlreadyRegistered(descriptor.key));
        }
        tracing::debug!(service = %descriptor.key, "service registered");
        self.services
            .insert(descriptor.key.clone(), (descriptor, entry));
        Ok(())
    }

    /// Looks up a service
    pub fn lookup(&self, key: &ServiceKey) -> Result<E, RegistryError> {
        self.services
            .get(key)
            .map(|(_, entry)| entry.clone())
            .ok_or_else(|| RegistryError::NotFound(key.clone()))
    }

    /// Returns the descriptor for a key
    pub fn descriptor(&self, key: &ServiceKey) -> Option<&ServiceDescriptor> {
        self.services.get(key).map(|(descriptor, _)| descriptor)
    }

    /// Lists all descriptors, ordered by key
    pub fn descriptors(&self) -> Vec<ServiceDescriptor> {
        let mut list: Vec<_> = self
            .services
            .values()
            .map(|(descriptor, _)| descriptor.clone())
            .collect();
        list.sort_by(|a, b| a.key.cmp(&b.key));
        list
    }

    /// Unregisters the service with this id from the key
    ///
    /// Fails with `NotFound` if the key is free or held by a different service.
    pub fn unregister(&mut self, key: &ServiceKey, id: ServiceId) -> Result<E, RegistryError> {
        match self.services.get(key) {
            Some((descriptor, _)) if descriptor.id == id => {}
            _ => return Err(RegistryError::NotFound(key.clone())),
        }
        tracing::debug!(service = %key, "service unregistered");
        self.services
            .remove(key)
            .map(|(_, entry)| entry)
            .ok_or_else(|| RegistryError::NotFound(key.clone()))
    }

    /// Queues a waiter for a key that is not registered yet
    pub fn add_waiter(&mut self, key: ServiceKey, waiter: Waiter<E>) -> WaiterId {
        let id = WaiterId(self.next_waiter);
        self.next_waiter += 1;
        self.waiters.entry(key).or_default().push((id, waiter));
        id
    }

    /// Withdraws a queued waiter without running it
    ///
    /// Returns `false` if the waiter was already taken.
    pub fn remove_waiter(&mut self, key: &ServiceKey, id: WaiterId) -> bool {
        let Some(queue) = self.waiters.get_mut(key) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|(queued, _)| *queued != id);
        let removed = queue.len() != before;
        if queue.is_empty() {
            self.waiters.remove(key);
        }
        removed
    }

    /// Removes and returns the waiters for a key, oldest first
    pub fn take_waiters(&mut self, key: &ServiceKey) -> Vec<(WaiterId, Waiter<E>)> {
        self.waiters.remove(key).unwrap_or_default()
    }

    /// Puts back a waiter returned by [`take_waiters`](Self::take_waiters),
    /// keeping its id valid for [`remove_waiter`](Self::remove_waiter)
    pub fn restore_waiter(&mut self, key: ServiceKey, id: WaiterId, waiter: Waiter<E>) {
        self.waiters.entry(key).or_default().push((id, waiter));
    }

    /// Number of clients waiting on a key
    pub fn waiter_count(&self, key: &ServiceKey) -> usize {
        self.waiters.get(key).map_or(0, Vec::len)
    }

    /// Returns the number of registered services
    pub fn count(&self) -> usize {
        self.services.len()
    }
}

impl<E: Clone> Default for ServiceRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}
