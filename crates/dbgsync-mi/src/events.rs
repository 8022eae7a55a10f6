//! Typed backend events and their dispatcher.
//!
//! Async and stream records are converted into [`MiEvent`]s and delivered
//! synchronously, in arrival order, to every registered listener. Events are
//! hints: listeners re-query authoritative state instead of trusting the
//! payload.
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use dbgsync_session::{ContextHandle, ContextSegment, SessionError, SessionId};

use crate::output::{AsyncKind, AsyncRecord, MiResult, MiValue, StreamKind, StreamRecord};

/// Execution state reported by `*running` / `*stopped`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecState {
    /// The target resumed.
    Running,
    /// The target stopped.
    Stopped {
        /// The `reason` field, when present.
        reason: Option<String>,
        /// Breakpoint number for `breakpoint-hit` stops.
        breakpoint: Option<u32>,
    },
}

/// A backend notification.
#[derive(Debug, Clone, PartialEq)]
pub enum MiEvent {
    /// `*running` or `*stopped`.
    StateChanged {
        /// Thread, thread group or session the change applies to.
        context: ContextHandle,
        /// New state.
        state: ExecState,
    },
    /// `=breakpoint-created`.
    BreakpointCreated {
        /// The target breakpoint.
        context: ContextHandle,
        /// The `bkpt` tuple as sent.
        bkpt: MiValue,
    },
    /// `=breakpoint-modified`.
    BreakpointModified {
        /// The target breakpoint.
        context: ContextHandle,
        /// The `bkpt` tuple as sent.
        bkpt: MiValue,
    },
    /// `=breakpoint-deleted`.
    BreakpointDeleted {
        /// The deleted target breakpoint.
        context: ContextHandle,
    },
    /// `=memory-changed`.
    MemoryChanged {
        /// Thread group whose memory changed.
        context: ContextHandle,
        /// Start address as sent.
        address: String,
        /// Length in bytes, when given.
        len: Option<u64>,
    },
    /// Stream output.
    ConsoleOutput {
        /// The session.
        context: ContextHandle,
        /// Which stream.
        kind: StreamKind,
        /// Unescaped text.
        text: String,
    },
    /// Anything else.
    Other {
        /// The session.
        context: ContextHandle,
        /// Record class.
        class: String,
        /// Payload.
        results: Vec<MiResult>,
    },
}

impl MiEvent {
    /// The context the event applies to.
    pub fn context(&self) -> &ContextHandle {
        match self {
            MiEvent::StateChanged { context, .. }
            | MiEvent::BreakpointCreated { context, .. }
            | MiEvent::BreakpointModified { context, .. }
            | MiEvent::BreakpointDeleted { context }
            | MiEvent::MemoryChanged { context, .. }
            | MiEvent::ConsoleOutput { context, .. }
            | MiEvent::Other { context, .. } => context,
        }
    }

    /// Whether this is one of the `=breakpoint-*` notifications.
    pub fn is_breakpoint_change(&self) -> bool {
        matches!(
            self,
            MiEvent::BreakpointCreated { .. }
                | MiEvent::BreakpointModified { .. }
                | MiEvent::BreakpointDeleted { .. }
        )
    }

    /// Number of the target breakpoint a breakpoint event refers to.
    pub fn breakpoint_number(&self) -> Option<u32> {
        match self.context().leaf() {
            Some(ContextSegment::Breakpoint(n)) if self.is_breakpoint_change() => Some(*n),
            _ => None,
        }
    }

    /// Convert an async record.
    pub fn from_async(session: SessionId, record: &AsyncRecord) -> Self {
        let root = ContextHandle::session(session);
        let other = || MiEvent::Other {
            context: root.clone(),
            class: record.class.clone(),
            results: record.results.clone(),
        };
        match (record.kind, record.class.as_str()) {
            (AsyncKind::Exec, "running") => MiEvent::StateChanged {
                context: thread_context(session, record),
                state: ExecState::Running,
            },
            (AsyncKind::Exec, "stopped") => MiEvent::StateChanged {
                context: thread_context(session, record),
                state: ExecState::Stopped {
                    reason: str_field(record, "reason").map(str::to_string),
                    breakpoint: str_field(record, "bkptno").and_then(|n| n.parse().ok()),
                },
            },
            (AsyncKind::Notify, "breakpoint-created" | "breakpoint-modified") => {
                let Some(bkpt) = record.get("bkpt") else {
                    return other();
                };
                let Some(number) = bkpt.get_str("number").and_then(|n| n.parse().ok()) else {
                    return other();
                };
                let context = breakpoint_context(session, number);
                if record.class == "breakpoint-created" {
                    MiEvent::BreakpointCreated {
                        context,
                        bkpt: bkpt.clone(),
                    }
                } else {
                    MiEvent::BreakpointModified {
                        context,
                        bkpt: bkpt.clone(),
                    }
                }
            }
            (AsyncKind::Notify, "breakpoint-deleted") => {
                match str_field(record, "id").and_then(|n| n.parse().ok()) {
                    Some(number) => MiEvent::BreakpointDeleted {
                        context: breakpoint_context(session, number),
                    },
                    None => other(),
                }
            }
            (AsyncKind::Notify, "memory-changed") => {
                let context = match str_field(record, "thread-group") {
                    Some(group) => root.child(ContextSegment::ThreadGroup(group.to_string())),
                    None => root.clone(),
                };
                MiEvent::MemoryChanged {
                    context,
                    address: str_field(record, "addr").unwrap_or_default().to_string(),
                    len: str_field(record, "len").and_then(parse_number),
                }
            }
            _ => other(),
        }
    }

    /// Convert a stream record.
    pub fn from_stream(session: SessionId, record: StreamRecord) -> Self {
        MiEvent::ConsoleOutput {
            context: ContextHandle::session(session),
            kind: record.kind,
            text: record.text,
        }
    }
}

fn str_field<'a>(record: &'a AsyncRecord, name: &str) -> Option<&'a str> {
    record.get(name).and_then(MiValue::as_str)
}

fn parse_number(s: &str) -> Option<u64> {
    match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

fn breakpoint_context(session: SessionId, number: u32) -> ContextHandle {
    ContextHandle::breakpoint_target(session).child(ContextSegment::Breakpoint(number))
}

fn thread_context(session: SessionId, record: &AsyncRecord) -> ContextHandle {
    let root = ContextHandle::session(session);
    match str_field(record, "thread-id").and_then(|t| t.parse().ok()) {
        Some(thread) => root.child(ContextSegment::Thread(thread)),
        None => root,
    }
}

/// Identifier returned by [`EventDispatcher::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Rc<dyn Fn(&MiEvent) -> Result<(), SessionError>>;

/// Fans events out to listeners on the executor thread.
pub struct EventDispatcher {
    session: SessionId,
    next_id: Cell<u64>,
    listeners: RefCell<Vec<(ListenerId, Listener)>>,
}

impl EventDispatcher {
    /// Create a dispatcher for `session`.
    pub fn new(session: SessionId) -> Self {
        Self {
            session,
            next_id: Cell::new(1),
            listeners: RefCell::new(Vec::new()),
        }
    }

    /// Register a listener. Listeners run in registration order.
    pub fn add_listener(
        &self,
        listener: impl Fn(&MiEvent) -> Result<(), SessionError> + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.listeners.borrow_mut().push((id, Rc::new(listener)));
        id
    }

    /// Unregister a listener. Returns whether it was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// How many listeners are registered.
    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Deliver `event` to every listener registered at the time of the call.
    ///
    /// A failing or panicking listener is logged and skipped.
    pub fn dispatch(&self, event: &MiEvent) {
        // Snapshot so listeners may add or remove listeners while running.
        let listeners: Vec<(ListenerId, Listener)> = self.listeners.borrow().clone();
        for (id, listener) in listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(session = %self.session, listener = id.0, "event listener failed: {e}");
                }
                Err(_) => {
                    tracing::error!(session = %self.session, listener = id.0, "event listener panicked");
                }
            }
        }
    }

    /// Convert and deliver an async record.
    pub fn dispatch_async(&self, record: &AsyncRecord) {
        self.dispatch(&MiEvent::from_async(self.session, record));
    }

    /// Convert and deliver a stream record.
    pub fn dispatch_stream(&self, record: StreamRecord) {
        self.dispatch(&MiEvent::from_stream(self.session, record));
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("session", &self.session)
            .field("listeners", &self.listener_count())
            .finish()
    }
}
