//! Breakpoint service error types.

use dbgsync_session::{ErrorKind, SessionError};
use thiserror::Error;

use crate::attributes::BreakpointKey;
use crate::model::PlatformId;

/// Errors from structured breakpoint operations.
#[derive(Debug, Error)]
pub enum BreakpointError {
    /// A user breakpoint with the same natural key exists or is being created.
    #[error("a breakpoint already exists at {key}")]
    Duplicate {
        /// The conflicting key.
        key: BreakpointKey,
        /// The breakpoint that owns it; `None` while its insert is in flight.
        existing: Option<PlatformId>,
    },

    /// No platform breakpoint with this id.
    #[error("no breakpoint {0}")]
    NotFound(PlatformId),

    /// The request itself is malformed.
    #[error("invalid breakpoint: {0}")]
    Invalid(String),

    /// The session or backend failed the operation.
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl BreakpointError {
    /// Classify for callers that only care about the session-level kind.
    pub fn session_kind(&self) -> Option<ErrorKind> {
        match self {
            BreakpointError::Session(e) => Some(e.kind()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::BreakpointLocation;

    #[test]
    fn error_duplicate_display() {
        let err = BreakpointError::Duplicate {
            key: BreakpointLocation::Line {
                file: "main.c".into(),
                line: 12,
            }
            .key(),
            existing: Some(PlatformId(3)),
        };
        assert_eq!(err.to_string(), "a breakpoint already exists at line main.c:12");
    }

    #[test]
    fn error_not_found_display() {
        assert_eq!(
            BreakpointError::NotFound(PlatformId(9)).to_string(),
            "no breakpoint #9"
        );
    }

    #[test]
    fn error_session_is_transparent() {
        let err = BreakpointError::from(SessionError::rejected("No symbol \"x\" in current context."));
        assert_eq!(err.to_string(), "No symbol \"x\" in current context.");
        assert_eq!(err.session_kind(), Some(ErrorKind::BackendRejected));
        assert_eq!(BreakpointError::Invalid("empty".into()).session_kind(), None);
    }
}
