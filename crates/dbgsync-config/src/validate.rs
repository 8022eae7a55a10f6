use crate::config::Config;
use crate::error::ConfigError;

/// Longest accepted query timeout, in milliseconds.
pub const MAX_QUERY_TIMEOUT_MS: u64 = 600_000;

/// Validate a [`Config`], returning every violation found.
pub fn validate(config: &Config) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    let timeout = config.session.query_timeout_ms;
    if timeout == 0 || timeout > MAX_QUERY_TIMEOUT_MS {
        errors.push(ConfigError::Validation {
            field: "session.query_timeout_ms".to_string(),
            message: format!("must be 1-{MAX_QUERY_TIMEOUT_MS}, got {timeout}"),
        });
    }

    // Thread names cannot carry NUL.
    let name = &config.session.executor_name;
    if name.trim().is_empty() || name.contains('\0') {
        errors.push(ConfigError::Validation {
            field: "session.executor_name".to_string(),
            message: "must be a non-empty thread name".to_string(),
        });
    }

    if let Some(file) = &config.log.file {
        if file.as_os_str().is_empty() {
            errors.push(ConfigError::Validation {
                field: "log.file".to_string(),
                message: "must not be empty".to_string(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn valid_default_config_passes() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut cfg = Config::default();
        cfg.session.query_timeout_ms = 0;
        let errs = validate(&cfg).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].to_string().contains("session.query_timeout_ms"));
    }

    #[test]
    fn timeout_bounds_are_inclusive() {
        let mut cfg = Config::default();
        cfg.session.query_timeout_ms = 1;
        assert!(validate(&cfg).is_ok());
        cfg.session.query_timeout_ms = MAX_QUERY_TIMEOUT_MS;
        assert!(validate(&cfg).is_ok());
        cfg.session.query_timeout_ms = MAX_QUERY_TIMEOUT_MS + 1;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn blank_executor_name_rejected() {
        let mut cfg = Config::default();
        cfg.session.executor_name = "  ".into();
        let errs = validate(&cfg).unwrap_err();
        assert!(errs[0].to_string().contains("session.executor_name"));
    }

    #[test]
    fn multiple_errors_returned() {
        let mut cfg = Config::default();
        cfg.session.query_timeout_ms = 0;
        cfg.session.executor_name = String::new();
        cfg.log.file = Some(PathBuf::new());
        assert_eq!(validate(&cfg).unwrap_err().len(), 3);
    }
}
