//! # Logger Service
//!
//! This crate sets up structured logging for the messaging runtime.
//!
//! ## Philosophy
//!
//! Logging is explicit and structured, not text-based or printf-style.
//! Library crates only emit `tracing` events; the process that embeds the
//! runtime decides once, through [`init_logging`], where they go.

use serde::{Deserialize, Serialize};

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational messages
    Info,
    /// Warnings
    Warn,
    /// Errors
    Error,
}

impl LogLevel {
    /// Maps onto the equivalent `tracing` level
    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Most verbose level that is emitted
    pub level: LogLevel,
    /// Include the event target (module path)
    pub with_target: bool,
    /// Include the emitting thread's name
    pub with_thread_names: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            with_target: false,
            with_thread_names: true,
        }
    }
}

impl LogConfig {
    /// Creates a configuration at the given level
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    /// Sets whether targets are printed
    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    /// Sets whether thread names are printed
    pub fn with_thread_names(mut self, enabled: bool) -> Self {
        self.with_thread_names = enabled;
        self
    }
}

/// Installs the global `tracing` subscriber.
///
/// Returns `false` if a subscriber was already installed, which makes repeated
/// calls (one per test, for instance) harmless.
pub fn init_logging(config: &LogConfig) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(config.level.as_tracing_level())
        .with_target(config.with_target)
        .with_thread_names(config.with_thread_names)
        .try_init()
        .is_ok()
}
