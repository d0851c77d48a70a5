//! Runtime configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use core_types::RuntimeError;
use ipc::PoolConfig;
use serde::{Deserialize, Serialize};
use services_logger::LogConfig;
use thiserror::Error;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

impl From<ConfigError> for RuntimeError {
    fn from(err: ConfigError) -> Self {
        RuntimeError::CommError(err.to_string())
    }
}

/// Settings for a [`Runtime`](crate::Runtime)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Buffers pre-allocated in each protocol's message pool
    pub initial_pool_size: usize,
    /// Pool size above which growth is reported; `None` means the initial size
    pub pool_high_water: Option<usize>,
    /// Upper bound for [`Session::open_sync`](crate::Session::open_sync); `None` waits forever
    #[serde(with = "optional_millis")]
    pub open_timeout: Option<Duration>,
    /// Directory holding one listening socket per advertised service
    pub socket_dir: Option<PathBuf>,
    /// How often a blocked open retries the service socket
    #[serde(with = "millis")]
    pub connect_retry_interval: Duration,
    pub log: LogConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            initial_pool_size: ipc::pool::DEFAULT_INITIAL_CAPACITY,
            pool_high_water: None,
            open_timeout: None,
            socket_dir: None,
            connect_retry_interval: Duration::from_millis(50),
            log: LogConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn with_initial_pool_size(mut self, size: usize) -> Self {
        self.initial_pool_size = size;
        self
    }

    pub fn with_pool_high_water(mut self, high_water: usize) -> Self {
        self.pool_high_water = Some(high_water);
        self
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = Some(timeout);
        self
    }

    pub fn with_socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = Some(dir.into());
        self
    }

    pub fn with_connect_retry_interval(mut self, interval: Duration) -> Self {
        self.connect_retry_interval = interval;
        self
    }

    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// Pool sizing derived from this configuration
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            initial_capacity: self.initial_pool_size,
            high_water: self.pool_high_water,
        }
    }

    /// Parses a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod optional_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use services_logger::LogLevel;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.initial_pool_size, 10);
        assert_eq!(config.pool_high_water, None);
        assert_eq!(config.open_timeout, None);
        assert_eq!(config.socket_dir, None);
        assert_eq!(config.connect_retry_interval, Duration::from_millis(50));
        assert_eq!(config.pool_config().high_water_mark(), 10);
    }

    #[test]
    fn test_builder() {
        let config = RuntimeConfig::default()
            .with_initial_pool_size(4)
            .with_pool_high_water(32)
            .with_open_timeout(Duration::from_millis(250))
            .with_socket_dir("/tmp/sockets");

        assert_eq!(config.pool_config().initial_capacity, 4);
        assert_eq!(config.pool_config().high_water_mark(), 32);
        assert_eq!(config.open_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.socket_dir, Some(PathBuf::from("/tmp/sockets")));
    }

    #[test]
    fn test_from_json_partial() {
        let config = RuntimeConfig::from_json_str(
            r#"{"initial_pool_size": 2, "open_timeout": 500, "log": {"level": "debug"}}"#,
        )
        .unwrap();

        assert_eq!(config.initial_pool_size, 2);
        assert_eq!(config.open_timeout, Some(Duration::from_millis(500)));
        assert_eq!(config.log.level, LogLevel::Debug);
        assert_eq!(config.connect_retry_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_json_round_trip() {
        let config = RuntimeConfig::default().with_open_timeout(Duration::from_secs(2));
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(RuntimeConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_invalid_json() {
        let result = RuntimeConfig::from_json_str("{ not json");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"socket_dir": "/run/msg"}}"#).unwrap();

        let config = RuntimeConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.socket_dir, Some(PathBuf::from("/run/msg")));
    }

    #[test]
    fn test_missing_file() {
        let result = RuntimeConfig::from_json_file("/nonexistent/runtime.json");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
