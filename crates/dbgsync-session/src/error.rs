//! Session error taxonomy.

use std::time::Duration;

use thiserror::Error;

/// Coarse classification of a [`SessionError`].
///
/// Callers use this to tell a caller-side timeout apart from a genuine
/// backend failure without matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or unmatched wire traffic.
    Protocol,
    /// The backend understood the request and refused it.
    BackendRejected,
    /// A caller stopped waiting.
    Timeout,
    /// The session went away before the operation finished.
    Cancelled,
    /// Internal contract broken (double completion, executor re-entry, ...).
    InvariantViolation,
    /// Several child operations failed.
    Multiple,
    /// Transport I/O failure.
    Io,
}

/// Errors reported through request monitors and queries.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Malformed record or a reply that matches no pending command.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The backend rejected the command; `message` is the backend text verbatim.
    #[error("{message}")]
    BackendRejected {
        /// Error text as sent by the backend.
        message: String,
    },

    /// The caller-side wait expired. The operation itself keeps running.
    #[error("timed out after {waited:?}")]
    Timeout {
        /// How long the caller waited.
        waited: Duration,
    },

    /// The session was torn down while the operation was pending.
    #[error("operation cancelled: session terminated")]
    Cancelled,

    /// An internal invariant was broken.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Aggregated failures from a counting monitor, in completion order.
    #[error("{} operations failed: {}", .0.len(), join_messages(.0))]
    Multiple(Vec<SessionError>),

    /// Transport I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Return the coarse kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Protocol(_) => ErrorKind::Protocol,
            SessionError::BackendRejected { .. } => ErrorKind::BackendRejected,
            SessionError::Timeout { .. } => ErrorKind::Timeout,
            SessionError::Cancelled => ErrorKind::Cancelled,
            SessionError::InvariantViolation(_) => ErrorKind::InvariantViolation,
            SessionError::Multiple(_) => ErrorKind::Multiple,
            SessionError::Io(_) => ErrorKind::Io,
        }
    }

    /// Shorthand for a [`SessionError::BackendRejected`].
    pub fn rejected(message: impl Into<String>) -> Self {
        SessionError::BackendRejected {
            message: message.into(),
        }
    }
}

fn join_messages(errors: &[SessionError]) -> String {
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
    fn rejected_displays_backend_text_verbatim() {
        let err = SessionError::rejected("No source file named x.c.");
        assert_eq!(err.to_string(), "No source file named x.c.");
        assert_eq!(err.kind(), ErrorKind::BackendRejected);
    }

    #[test]
    fn timeout_kind_is_distinct_from_backend_errors() {
        let err = SessionError::Timeout {
            waited: Duration::from_millis(50),
        };
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_ne!(err.kind(), ErrorKind::BackendRejected);
        assert!(err.to_string().contains("50ms"));
    }

    #[test]
    fn multiple_lists_every_child() {
        let err = SessionError::Multiple(vec![
            SessionError::rejected("first"),
            SessionError::Cancelled,
        ]);
        let msg = err.to_string();
        assert!(msg.starts_with("2 operations failed"), "got: {msg}");
        assert!(msg.contains("first"));
        assert!(msg.contains("cancelled"));
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = SessionError::from(io);
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("pipe closed"));
    }

    #[test]
    fn protocol_and_invariant_display() {
        assert_eq!(
            SessionError::Protocol("unknown token 9".into()).to_string(),
            "protocol error: unknown token 9"
        );
        assert_eq!(
            SessionError::InvariantViolation("double completion".into()).to_string(),
            "invariant violation: double completion"
        );
    }
}
