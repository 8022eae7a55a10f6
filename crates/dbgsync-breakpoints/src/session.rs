//! Blocking facade over a debugger session.
//!
//! [`DebugSession`] owns the session executor. Every method is a [`Query`]:
//! it runs on the executor thread and blocks the caller for at most the
//! configured timeout. Call it from any thread except the executor's own.
use std::future::{self, Future};
use std::rc::Rc;
use std::time::Duration;

use dbgsync_mi::sim::{Program, SimBackend, SimHandle};
use dbgsync_mi::ResultRecord;
use dbgsync_session::{Executor, Lifecycle, Query, SessionError, SessionId, SessionResult};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::attributes::{BreakpointAttributes, BreakpointLocation};
use crate::error::BreakpointError;
use crate::model::{ModelEvent, ModelListenerId, PlatformBreakpoint, PlatformId};
use crate::services::Services;
use crate::synchronizer::SyncMode;

/// Tunables for one session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Prefix of the executor thread name.
    pub executor_name: String,
    /// How long each blocking call waits.
    pub query_timeout: Duration,
    /// What drives breakpoint reconciliation.
    pub sync_mode: SyncMode,
    /// Insert unresolvable locations as pending instead of failing.
    pub allow_pending: bool,
    /// Keep at most one breakpoint refresh in flight.
    pub coalesce_refresh: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            executor_name: "dbgsync".into(),
            query_timeout: Duration::from_secs(10),
            sync_mode: SyncMode::Events,
            allow_pending: true,
            coalesce_refresh: true,
        }
    }
}

/// A running session.
#[derive(Debug)]
pub struct DebugSession {
    executor: Executor<Services>,
    timeout: Duration,
}

impl DebugSession {
    /// Start a session talking MI over `reader`/`writer`.
    pub fn start<R, W>(
        id: SessionId,
        reader: R,
        writer: W,
        options: SessionOptions,
    ) -> Result<Self, SessionError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let timeout = options.query_timeout;
        let name = options.executor_name.clone();
        let executor = Executor::spawn(id, &name, move |exec| {
            Services::new(exec, reader, writer, &options)
        })?;
        tracing::info!(session = %id, "session started");
        Ok(Self { executor, timeout })
    }

    /// Start a session against a fresh simulated backend.
    pub fn with_simulator(
        id: SessionId,
        program: Program,
        options: SessionOptions,
    ) -> Result<(Self, SimHandle), SessionError> {
        let (sim, stream) = SimBackend::start(program)?;
        let (reader, writer) = tokio::io::split(stream);
        let session = Self::start(id, reader, writer, options)?;
        Ok((session, sim))
    }

    /// Session id.
    pub fn id(&self) -> SessionId {
        self.executor.session_id()
    }

    /// The underlying executor, for custom queries.
    pub fn executor(&self) -> &Executor<Services> {
        &self.executor
    }

    /// Timeout applied to every call.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Create a user breakpoint.
    pub fn create(&self, attributes: BreakpointAttributes) -> Result<PlatformId, BreakpointError> {
        self.call(move |s| s.manager().create(attributes))
    }

    /// Delete a breakpoint and its targets.
    pub fn delete(&self, id: PlatformId) -> Result<(), BreakpointError> {
        self.call(move |s| s.manager().delete(id))
    }

    /// Enable or disable a breakpoint.
    pub fn set_enabled(&self, id: PlatformId, enabled: bool) -> Result<(), BreakpointError> {
        self.call(move |s| s.manager().set_enabled(id, enabled))
    }

    /// Set or clear (with `""`) a condition.
    pub fn set_condition(&self, id: PlatformId, condition: &str) -> Result<(), BreakpointError> {
        let condition = condition.to_string();
        self.call(move |s| s.manager().set_condition(id, &condition))
    }

    /// Set the ignore count.
    pub fn set_ignore_count(&self, id: PlatformId, count: u32) -> Result<(), BreakpointError> {
        self.call(move |s| s.manager().set_ignore_count(id, count))
    }

    /// Run a console command; returns the backend's reply.
    pub fn console(&self, text: &str) -> SessionResult<ResultRecord> {
        let text = text.to_string();
        self.query(move |s| s.console(&text))
    }

    /// Wait until the backend and the synchronizer are quiet.
    pub fn settle(&self) -> SessionResult<()> {
        self.query(|s| s.settle())
    }

    /// Reconcile against a fresh breakpoint list.
    pub fn refresh(&self) -> SessionResult<()> {
        self.query(|s| s.synchronizer().refresh())
    }

    /// Drop cached target state and rebuild it from a fresh list.
    pub fn flush_cache(&self) -> SessionResult<()> {
        self.query(|s| s.synchronizer().flush_cache())
    }

    /// Change what drives reconciliation.
    pub fn set_sync_mode(&self, mode: SyncMode) -> SessionResult<()> {
        self.read(move |s| s.synchronizer().set_mode(mode))
    }

    /// Current sync mode.
    pub fn sync_mode(&self) -> SessionResult<SyncMode> {
        self.read(|s| s.synchronizer().mode())
    }

    /// Whether later creates may leave breakpoints pending.
    pub fn set_allow_pending(&self, allow: bool) -> SessionResult<()> {
        self.read(move |s| s.manager().set_allow_pending(allow))
    }

    /// Every platform breakpoint, in id order.
    pub fn breakpoints(&self) -> SessionResult<Vec<PlatformBreakpoint>> {
        self.read(|s| s.model().all())
    }

    /// One platform breakpoint.
    pub fn breakpoint(&self, id: PlatformId) -> SessionResult<Option<PlatformBreakpoint>> {
        self.read(move |s| s.model().get(id))
    }

    /// The platform breakpoint at `location`, if any.
    pub fn find(&self, location: BreakpointLocation) -> SessionResult<Option<PlatformBreakpoint>> {
        self.read(move |s| {
            let model = s.model();
            model.find(&location.key()).and_then(|id| model.get(id))
        })
    }

    /// Backend numbers bound to `id`.
    pub fn targets_of(&self, id: PlatformId) -> SessionResult<Vec<u32>> {
        self.read(move |s| s.targets().targets_of(id))
    }

    /// How many commands with `operation` this session has sent.
    pub fn commands_sent(&self, operation: &str) -> SessionResult<usize> {
        let operation = operation.to_string();
        self.read(move |s| s.control().commands_sent(&operation))
    }

    /// How many breakpoint refreshes have been sent.
    pub fn refresh_count(&self) -> SessionResult<u64> {
        self.read(|s| s.synchronizer().refresh_count())
    }

    /// Observe model changes. The listener runs on the executor thread.
    pub fn subscribe(
        &self,
        listener: impl Fn(&ModelEvent) + Send + 'static,
    ) -> SessionResult<ModelListenerId> {
        self.read(move |s| s.model().add_listener(listener))
    }

    /// Stop observing.
    pub fn unsubscribe(&self, id: ModelListenerId) -> SessionResult<bool> {
        self.read(move |s| s.model().remove_listener(id))
    }

    /// Cancel everything pending and stop the executor. Idempotent.
    pub fn shutdown(&self) -> SessionResult<()> {
        self.executor.shutdown()
    }

    fn query<R, F, Fut>(&self, op: F) -> SessionResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&Services) -> Fut + Send + 'static,
        Fut: Future<Output = SessionResult<R>> + 'static,
    {
        Query::new(&self.executor, move |s: Rc<Services>| op(&s)).get_timeout(self.timeout)
    }

    fn read<R, F>(&self, op: F) -> SessionResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&Services) -> R + Send + 'static,
    {
        self.query(move |s| future::ready(Ok(op(s))))
    }

    fn call<T, F, Fut>(&self, op: F) -> Result<T, BreakpointError>
    where
        T: Send + 'static,
        F: FnOnce(&Services) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, BreakpointError>> + 'static,
    {
        self.query(move |s| {
            let fut = op(s);
            async move { Ok::<_, SessionError>(fut.await) }
        })?
    }
}

impl Drop for DebugSession {
    fn drop(&mut self) {
        if self.executor.lifecycle() == Lifecycle::Terminated {
            return;
        }
        if let Err(err) = self.executor.shutdown() {
            tracing::error!(session = %self.executor.session_id(), "session shutdown failed: {err}");
        }
    }
}
