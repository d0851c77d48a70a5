//! # Wire and Format Contract Tests
//!
//! This crate provides "golden" tests for everything that leaves a process,
//! so the formats don't drift accidentally over time.
//!
//! ## Philosophy
//!
//! - **Explicit over implicit**: byte layouts and field names are written out
//! - **Testability first**: contract tests fail when a format changes
//! - **Mechanism not policy**: define what must be stable, not how to use it
//!
//! ## Structure
//!
//! Each format has a module with contract tests that verify:
//! - Frame byte layout
//! - Handshake message fields
//! - Configuration keys and defaults
//! - Diagnostic dump fields

pub mod config;
pub mod diagnostics;
pub mod frame;
pub mod handshake;

/// Common test helpers for contract validation
pub mod test_helpers {
    use serde::Serialize;
    use serde_json::Value;

    /// Serializes `value` and returns its top-level object
    pub fn to_object<T: Serialize>(value: &T) -> serde_json::Map<String, Value> {
        match serde_json::to_value(value).expect("value serializes") {
            Value::Object(map) => map,
            other => panic!("expected a JSON object, got {}", other),
        }
    }

    /// Verifies the object has exactly the expected keys
    pub fn verify_fields<T: Serialize>(value: &T, expected: &[&str]) {
        let object = to_object(value);
        let mut actual: Vec<&str> = object.keys().map(String::as_str).collect();
        actual.sort_unstable();
        let mut expected = expected.to_vec();
        expected.sort_unstable();
        assert_eq!(
            actual, expected,
            "Field set changed: expected {:?}, got {:?}",
            expected, actual
        );
    }
}
