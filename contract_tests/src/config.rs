//! Runtime configuration contract

use messaging::RuntimeConfig;

// ===== Keys =====
pub const CONFIG_FIELDS: &[&str] = &[
    "initial_pool_size",
    "pool_high_water",
    "open_timeout",
    "socket_dir",
    "connect_retry_interval",
    "log",
];
pub const LOG_FIELDS: &[&str] = &["level", "with_target", "with_thread_names"];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use std::time::Duration;

    #[test]
    fn test_config_keys_contract() {
        verify_fields(&RuntimeConfig::default(), CONFIG_FIELDS);
        verify_fields(&RuntimeConfig::default().log, LOG_FIELDS);
    }

    #[test]
    fn test_durations_are_milliseconds() {
        let config = RuntimeConfig::default().with_open_timeout(Duration::from_secs(3));
        let object = to_object(&config);
        assert_eq!(object["open_timeout"], 3000);
        assert_eq!(object["connect_retry_interval"], 50);
    }

    #[test]
    fn test_log_level_is_lowercase() {
        let object = to_object(&RuntimeConfig::default().log);
        assert_eq!(object["level"], "info");
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(
            RuntimeConfig::from_json_str("{}").unwrap(),
            RuntimeConfig::default()
        );
    }
}
