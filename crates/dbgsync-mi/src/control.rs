//! Command correlator.
//!
//! Assigns tokens, writes commands in FIFO order and completes each command's
//! monitor exactly once when the matching result record arrives. Async and
//! stream records are handed to the [`EventDispatcher`].
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use dbgsync_session::{Completion, RequestMonitor, SessionError, SessionId, SessionResult};

use crate::command::{self, MiCommand};
use crate::events::EventDispatcher;
use crate::output::{Record, ResultClass, ResultRecord};
use crate::transport::Transport;

/// Observer of completed commands, called before the command's own monitor.
pub type CommandListener = Rc<dyn Fn(&MiCommand, &SessionResult<ResultRecord>)>;

struct PendingCommand {
    command: MiCommand,
    monitor: RequestMonitor<ResultRecord>,
}

/// Correlates outgoing commands with their result records.
pub struct CommandControl {
    session: SessionId,
    transport: Transport,
    events: Rc<EventDispatcher>,
    next_token: Cell<u64>,
    pending: RefCell<BTreeMap<u64, PendingCommand>>,
    sent: RefCell<HashMap<String, usize>>,
    listeners: RefCell<Vec<CommandListener>>,
}

impl CommandControl {
    /// Create a correlator writing through `transport`.
    pub fn new(session: SessionId, transport: Transport, events: Rc<EventDispatcher>) -> Self {
        Self {
            session,
            transport,
            events,
            next_token: Cell::new(1),
            pending: RefCell::new(BTreeMap::new()),
            sent: RefCell::new(HashMap::new()),
            listeners: RefCell::new(Vec::new()),
        }
    }

    /// The event dispatcher fed by this correlator.
    pub fn events(&self) -> &Rc<EventDispatcher> {
        &self.events
    }

    /// Send `command`; `monitor` completes when its reply arrives.
    ///
    /// Returns the token assigned to the command.
    pub fn queue_command(&self, command: MiCommand, monitor: RequestMonitor<ResultRecord>) -> u64 {
        let token = self.next_token.get();
        self.next_token.set(token + 1);
        let line = command.encode(token);
        *self
            .sent
            .borrow_mut()
            .entry(command.operation().to_string())
            .or_insert(0) += 1;

        self.pending
            .borrow_mut()
            .insert(token, PendingCommand { command, monitor });
        if let Err(e) = self.transport.send_line(line) {
            let pending = self.pending.borrow_mut().remove(&token);
            if let Some(p) = pending {
                p.monitor.fail(e);
            }
        }
        token
    }

    /// Send `command` and return a future for its reply.
    pub fn send(&self, command: MiCommand) -> Completion<ResultRecord> {
        let (rm, completion) = RequestMonitor::channel();
        self.queue_command(command, rm);
        completion
    }

    /// Route one decoded record.
    pub fn process_record(&self, record: Record) {
        match record {
            Record::Result(result) => self.process_result(result),
            Record::Async(record) => self.events.dispatch_async(&record),
            Record::Stream(record) => self.events.dispatch_stream(record),
            Record::Prompt => {}
        }
    }

    fn process_result(&self, record: ResultRecord) {
        let Some(token) = record.token else {
            let err = SessionError::Protocol(format!("result record without token: {record:?}"));
            tracing::warn!(session = %self.session, "{err}");
            return;
        };
        // Release the borrow before running continuations; they may queue more.
        let pending = self.pending.borrow_mut().remove(&token);
        let Some(PendingCommand { command, monitor }) = pending else {
            let err = SessionError::Protocol(format!("reply for unknown token {token}"));
            tracing::warn!(session = %self.session, token, "{err}");
            return;
        };

        let result = match record.class {
            ResultClass::Error => {
                let message = record.error_message().unwrap_or("unknown error").to_string();
                tracing::debug!(session = %self.session, token, op = command.operation(), "rejected: {message}");
                Err(SessionError::BackendRejected { message })
            }
            ResultClass::Done | ResultClass::Running | ResultClass::Connected | ResultClass::Exit => {
                Ok(record)
            }
        };

        let listeners: Vec<CommandListener> = self.listeners.borrow().clone();
        for listener in listeners {
            listener(&command, &result);
        }
        monitor.complete(result);
    }

    /// Observe every completed command.
    pub fn add_command_listener(&self, listener: impl Fn(&MiCommand, &SessionResult<ResultRecord>) + 'static) {
        self.listeners.borrow_mut().push(Rc::new(listener));
    }

    /// Fail every pending command with [`SessionError::Cancelled`].
    ///
    /// Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.pending.borrow_mut());
        let count = drained.len();
        for (_, pending) in drained {
            pending.monitor.fail(SessionError::Cancelled);
        }
        if count > 0 {
            tracing::debug!(session = %self.session, count, "cancelled pending commands");
        }
        count
    }

    /// Number of commands awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    /// How many commands with `operation` have been sent.
    pub fn commands_sent(&self, operation: &str) -> usize {
        self.sent.borrow().get(operation).copied().unwrap_or(0)
    }

    /// Completes once every reply to a command queued before it was processed.
    pub fn barrier(&self) -> Completion<()> {
        let (rm, completion) = RequestMonitor::channel();
        self.queue_command(
            command::list_features(),
            RequestMonitor::immediate(move |result: SessionResult<ResultRecord>| match result {
                Ok(_) | Err(SessionError::BackendRejected { .. }) => rm.done(()),
                Err(e) => rm.fail(e),
            }),
        );
        completion
    }
}

impl std::fmt::Debug for CommandControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandControl")
            .field("session", &self.session)
            .field("next_token", &self.next_token.get())
            .field("pending", &self.pending_count())
            .finish()
    }
}
