//! Per-session service graph, owned by the session executor.
use std::future::Future;
use std::rc::Rc;

use dbgsync_mi::{command, CommandControl, EventDispatcher, Record, RecordSink, ResultRecord, Transport};
use dbgsync_session::{Completion, Executor, SessionId, SessionResult, SessionState};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::manager::BreakpointManager;
use crate::model::BreakpointModel;
use crate::session::SessionOptions;
use crate::synchronizer::BreakpointSynchronizer;
use crate::target::TargetTable;

/// Everything a session runs on its executor thread.
#[derive(Debug)]
pub struct Services {
    session: SessionId,
    control: Rc<CommandControl>,
    model: Rc<BreakpointModel>,
    targets: Rc<TargetTable>,
    manager: BreakpointManager,
    synchronizer: Rc<BreakpointSynchronizer>,
}

impl Services {
    /// Wire the services to a backend. Must run on the executor thread.
    pub fn new<R, W>(executor: &Executor<Services>, reader: R, writer: W, options: &SessionOptions) -> Self
    where
        R: AsyncRead + Unpin + 'static,
        W: AsyncWrite + Unpin + 'static,
    {
        let session = executor.session_id();
        let transport = Transport::spawn(executor, reader, writer);
        let events = Rc::new(EventDispatcher::new(session));
        let control = Rc::new(CommandControl::new(session, transport, events));
        let model = Rc::new(BreakpointModel::new());
        let targets = Rc::new(TargetTable::new());

        let manager = BreakpointManager::new(
            session,
            Rc::clone(&control),
            Rc::clone(&model),
            Rc::clone(&targets),
        );
        manager.set_allow_pending(options.allow_pending);
        let synchronizer = BreakpointSynchronizer::new(
            session,
            Rc::clone(&control),
            Rc::clone(&model),
            Rc::clone(&targets),
            options.sync_mode,
            options.coalesce_refresh,
        );
        synchronizer.attach();
        tracing::debug!(%session, mode = ?options.sync_mode, "session services ready");

        Self {
            session,
            control,
            model,
            targets,
            manager,
            synchronizer,
        }
    }

    /// The session id.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Command correlator.
    pub fn control(&self) -> &Rc<CommandControl> {
        &self.control
    }

    /// Platform breakpoint model.
    pub fn model(&self) -> &Rc<BreakpointModel> {
        &self.model
    }

    /// Target breakpoint bindings.
    pub fn targets(&self) -> &Rc<TargetTable> {
        &self.targets
    }

    /// Structured breakpoint API.
    pub fn manager(&self) -> &BreakpointManager {
        &self.manager
    }

    /// The synchronizer.
    pub fn synchronizer(&self) -> &Rc<BreakpointSynchronizer> {
        &self.synchronizer
    }

    /// Run `text` on the backend console.
    pub fn console(&self, text: &str) -> Completion<ResultRecord> {
        self.control.send(command::console(text))
    }

    /// Resolves once every outstanding command has been answered and the
    /// synchronizer has nothing left to refresh.
    pub fn settle(&self) -> impl Future<Output = SessionResult<()>> + 'static {
        let control = Rc::clone(&self.control);
        let synchronizer = Rc::clone(&self.synchronizer);
        async move {
            loop {
                control.barrier().await?;
                if synchronizer.is_idle() && control.pending_count() == 0 {
                    return Ok(());
                }
            }
        }
    }
}

impl SessionState for Services {
    fn on_shutdown(&self) {
        self.control.cancel_all();
    }
}

impl RecordSink for Services {
    fn on_record(state: &Rc<Self>, record: Record) {
        state.control.process_record(record);
    }

    fn on_disconnect(state: &Rc<Self>, error: Option<String>) {
        match error {
            Some(error) => tracing::warn!(session = %state.session, "backend connection lost: {error}"),
            None => tracing::debug!(session = %state.session, "backend closed the connection"),
        }
        state.control.cancel_all();
    }
}
