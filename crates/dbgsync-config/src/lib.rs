//! dbgsync-config: configuration files and logging helpers for dbgsync.
pub mod config;
pub mod error;
pub mod load;
pub mod logging;
pub mod merge;
pub mod paths;
pub mod validate;

pub use config::{BreakpointsConfig, Config, LogConfig, LogLevel, SessionConfig, SyncModeSetting};
pub use error::ConfigError;
pub use load::{load_config, load_file, load_from_str};
