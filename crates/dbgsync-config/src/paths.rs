//! Standard per-user directories.
use std::path::PathBuf;

use crate::error::ConfigError;

/// Application directory name under the platform roots.
pub const APP_NAME: &str = "dbgsync";

/// Resolved user directories for dbgsync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    home: PathBuf,
}

impl AppPaths {
    /// Resolve the user's home directory.
    ///
    /// # Errors
    ///
    /// Fails when no home directory can be determined.
    pub fn new() -> Result<Self, ConfigError> {
        let home = dirs::home_dir()
            .or_else(|| std::env::var("HOME").ok().map(PathBuf::from))
            .ok_or(ConfigError::NoHome)?;
        Ok(Self { home })
    }

    /// Rooted at an explicit home, for tests.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// `~/.config/dbgsync`
    pub fn config_dir(&self) -> PathBuf {
        self.home.join(".config").join(APP_NAME)
    }

    /// `~/.local/share/dbgsync`
    pub fn data_dir(&self) -> PathBuf {
        self.home.join(".local").join("share").join(APP_NAME)
    }

    /// `<data_dir>/logs`
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }
}
