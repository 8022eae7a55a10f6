use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What drives breakpoint reconciliation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncModeSetting {
    /// Backend notifications and console commands trigger refreshes.
    #[default]
    Events,
    /// Refresh only when asked.
    Manual,
}

/// Log verbosity level.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Most verbose.
    Trace,
    /// Debug messages, including MI traffic.
    Debug,
    /// Informational messages (default).
    #[default]
    Info,
    /// Warnings only.
    Warn,
    /// Errors only.
    Error,
}

impl LogLevel {
    /// The `tracing` filter directive for this level.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Session executor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long a blocking query waits, in milliseconds (1-600000).
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    /// Prefix of the executor thread name.
    #[serde(default = "default_executor_name")]
    pub executor_name: String,
}

fn default_query_timeout_ms() -> u64 {
    10_000
}

fn default_executor_name() -> String {
    "dbgsync".to_string()
}

fn default_true() -> bool {
    true
}

impl SessionConfig {
    /// The query timeout as a [`Duration`].
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: default_query_timeout_ms(),
            executor_name: default_executor_name(),
        }
    }
}

/// Breakpoint synchronization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakpointsConfig {
    /// Event-driven or manual reconciliation.
    #[serde(default)]
    pub sync_mode: SyncModeSetting,
    /// Insert unresolvable locations as pending.
    #[serde(default = "default_true")]
    pub allow_pending: bool,
    /// Keep at most one `-break-list` in flight.
    #[serde(default = "default_true")]
    pub coalesce_refresh: bool,
}

impl Default for BreakpointsConfig {
    fn default() -> Self {
        Self {
            sync_mode: SyncModeSetting::Events,
            allow_pending: true,
            coalesce_refresh: true,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log verbosity level.
    #[serde(default)]
    pub level: LogLevel,
    /// Log file; the platform default when unset.
    pub file: Option<PathBuf>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Session executor settings.
    #[serde(default)]
    pub session: SessionConfig,
    /// Breakpoint synchronization settings.
    #[serde(default)]
    pub breakpoints: BreakpointsConfig,
    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,
}
