//! Diagnostic dump contract
//!
//! Field names of the synchronization snapshot and the service directory.

use services_registry::{ServiceDescriptor, ServiceKey};

// ===== Field Names =====
pub const SNAPSHOT_FIELDS: &[&str] = &["mutexes", "semaphores", "threads"];
pub const MUTEX_FIELDS: &[&str] = &["name", "recursive", "traceable", "lock_count", "owner", "waiters"];
pub const THREAD_FIELDS: &[&str] = &[
    "id",
    "name",
    "waiting_on_mutex",
    "held_mutexes",
    "waiting_on_semaphore",
];
pub const DESCRIPTOR_FIELDS: &[&str] = &["id", "key", "max_payload_size"];
pub const KEY_FIELDS: &[&str] = &["name", "protocol_id"];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use core_types::ServiceId;
    use thread_sync::{snapshot, Mutex};

    #[test]
    fn test_snapshot_contract() {
        let mutex = Mutex::new_traceable_recursive("contract-lock");
        let _guard = mutex.lock_guard();

        let view = snapshot();
        verify_fields(&view, SNAPSHOT_FIELDS);
        verify_fields(view.mutex("contract-lock").unwrap(), MUTEX_FIELDS);
        verify_fields(&view.threads[0], THREAD_FIELDS);
    }

    #[test]
    fn test_descriptor_contract() {
        let descriptor = ServiceDescriptor {
            id: ServiceId::new(),
            key: ServiceKey::new("calculator", "proto-v1"),
            max_payload_size: 64,
        };
        verify_fields(&descriptor, DESCRIPTOR_FIELDS);
        verify_fields(&descriptor.key, KEY_FIELDS);
    }
}
