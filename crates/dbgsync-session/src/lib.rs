//! dbgsync-session: execution model for debugger sessions.
//!
//! Provides the single-threaded session executor, request monitors, the
//! blocking [`Query`] bridge, context handles and the shared error type.
pub mod context;
pub mod error;
pub mod executor;
pub mod monitor;
pub mod query;

pub use context::{ContextHandle, ContextKind, ContextSegment, SessionId};
pub use error::{ErrorKind, SessionError};
pub use executor::{Executor, Lifecycle, SessionState};
pub use monitor::{Completion, CountingRequestMonitor, RequestMonitor, SessionResult};
pub use query::Query;
