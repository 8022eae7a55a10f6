//! dbgsync-mi: GDB/MI protocol plumbing.
//!
//! Record parsing and encoding, command construction, the line transport,
//! the token-correlating [`CommandControl`], the [`EventDispatcher`] and an
//! in-process simulated backend for tests and demos.
pub mod command;
pub mod control;
pub mod error;
pub mod events;
pub mod linespec;
pub mod output;
pub mod sim;
pub mod transport;

pub use command::{BreakInsert, InsertLocation, MiCommand, WatchMode};
pub use control::{CommandControl, CommandListener};
pub use error::MiParseError;
pub use events::{EventDispatcher, ExecState, ListenerId, MiEvent};
pub use linespec::{parse_linespec, Linespec};
pub use output::{
    parse_record, AsyncKind, AsyncRecord, MiResult, MiValue, Record, ResultClass, ResultRecord,
    StreamKind, StreamRecord,
};
pub use transport::{RecordSink, Transport};
