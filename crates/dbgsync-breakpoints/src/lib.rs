//! dbgsync-breakpoints: platform breakpoints kept in sync with a debugger.
//!
//! The [`BreakpointModel`] holds structured ("platform") breakpoints. The
//! [`BreakpointManager`] pushes structured requests to the backend, and the
//! [`BreakpointSynchronizer`] folds whatever the backend reports (including
//! breakpoints typed on its console) back into the model. [`DebugSession`]
//! wires it all onto a session executor behind a blocking API.
pub mod attributes;
pub mod console;
pub mod error;
pub mod manager;
pub mod model;
pub mod services;
pub mod session;
pub mod synchronizer;
pub mod target;

pub use attributes::{BreakpointAttributes, BreakpointKey, BreakpointKind, BreakpointLocation};
pub use error::BreakpointError;
pub use manager::BreakpointManager;
pub use model::{
    AttributeChange, BreakpointModel, ChangeOrigin, ModelEvent, ModelListenerId, Origin,
    PlatformBreakpoint, PlatformId,
};
pub use services::Services;
pub use session::{DebugSession, SessionOptions};
pub use synchronizer::{reconcile, BreakpointSynchronizer, Reconciled, SyncMode};
pub use target::{TargetBreakpoint, TargetTable};
