//! MI wire error types.
use dbgsync_session::SessionError;

/// Errors from decoding MI output records or command lines.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MiParseError {
    /// The line was blank.
    #[error("empty record")]
    Empty,

    /// Input ended in the middle of a construct.
    #[error("unexpected end of input at column {0}")]
    UnexpectedEnd(usize),

    /// A character that does not fit the grammar.
    #[error("unexpected character '{found}' at column {column}")]
    Unexpected {
        /// The offending character.
        found: char,
        /// Zero-based byte column.
        column: usize,
    },

    /// A result record with an unknown class after `^`.
    #[error("unknown result class: {0}")]
    UnknownResultClass(String),

    /// A malformed backslash escape in a C string.
    #[error("invalid escape sequence at column {0}")]
    BadEscape(usize),

    /// A command line that is not `[token]-operation ...`.
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

impl From<MiParseError> for SessionError {
    fn from(err: MiParseError) -> Self {
        SessionError::Protocol(err.to_string())
    }
}
