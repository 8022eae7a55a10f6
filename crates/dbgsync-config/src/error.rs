use std::path::PathBuf;
use thiserror::Error;

/// Errors from loading, parsing or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The specified config file was not found.
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    /// Failed to create the default config file.
    #[error("failed to create default config: {0}")]
    CreateDefault(String),

    /// TOML parsing failed.
    #[error("TOML parse error: {0}")]
    Parse(String),

    /// A config value failed validation.
    #[error("validation error: {field}: {message}")]
    Validation {
        /// The dotted field path (e.g. `session.query_timeout_ms`).
        field: String,
        /// Human-readable description of the violation.
        message: String,
    },

    /// Several values failed validation.
    #[error("{} invalid settings: {}", .0.len(), join(.0))]
    Invalid(Vec<ConfigError>),

    /// No home directory to resolve per-user paths against.
    #[error("could not determine home directory")]
    NoHome,

    /// An I/O error occurred while reading or writing config files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Fold validation failures into one error.
    pub fn from_violations(mut errors: Vec<ConfigError>) -> Self {
        if errors.len() == 1 {
            errors.remove(0)
        } else {
            ConfigError::Invalid(errors)
        }
    }
}

fn join(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display_contains_path() {
        let err = ConfigError::NotFound(PathBuf::from("/tmp/missing.toml"));
        let msg = format!("{err}");
        assert!(msg.contains("/tmp/missing.toml"));
        assert!(msg.contains("config file not found"));
    }

    #[test]
    fn parse_display_contains_details() {
        let err = ConfigError::Parse("unexpected `=`".into());
        assert_eq!(err.to_string(), "TOML parse error: unexpected `=`");
    }

    #[test]
    fn validation_display_contains_field_and_message() {
        let err = ConfigError::Validation {
            field: "session.query_timeout_ms".into(),
            message: "must be 1-600000, got 0".into(),
        };
        assert_eq!(
            err.to_string(),
            "validation error: session.query_timeout_ms: must be 1-600000, got 0"
        );
    }

    #[test]
    fn single_violation_is_returned_as_is() {
        let err = ConfigError::from_violations(vec![ConfigError::Validation {
            field: "a".into(),
            message: "bad".into(),
        }]);
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn several_violations_are_joined() {
        let err = ConfigError::from_violations(vec![
            ConfigError::Validation {
                field: "a".into(),
                message: "bad".into(),
            },
            ConfigError::Validation {
                field: "b".into(),
                message: "worse".into(),
            },
        ]);
        assert_eq!(
            err.to_string(),
            "2 invalid settings: validation error: a: bad; validation error: b: worse"
        );
    }

    #[test]
    fn io_error_display_contains_inner() {
        let inner = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = ConfigError::from(inner);
        assert!(err.to_string().contains("file missing"));
    }
}
