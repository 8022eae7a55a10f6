//! Single-threaded session executor.
//!
//! Every session owns one executor: a dedicated OS thread running a
//! current-thread tokio runtime and a [`LocalSet`]. The session state is built
//! on that thread and never leaves it, so it can use `Rc` and `RefCell`
//! freely. Other threads interact with it only by enqueueing tasks.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

use tokio::sync::{mpsc, oneshot};
use tokio::task::LocalSet;

use crate::context::SessionId;
use crate::error::SessionError;
use crate::monitor::{Completion, SessionResult};

/// State owned by an executor.
pub trait SessionState: 'static {
    /// Called on the executor thread after the queue has been drained and
    /// before the state is dropped. Implementations fail every pending
    /// monitor with [`SessionError::Cancelled`].
    fn on_shutdown(&self) {}
}

impl SessionState for () {}

/// Lifecycle of an executor (and of the session it serves).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Accepting tasks.
    Active,
    /// No new tasks accepted; queued tasks are being drained.
    ShuttingDown,
    /// The executor thread has exited.
    Terminated,
}

const ACTIVE: u8 = 0;
const SHUTTING_DOWN: u8 = 1;
const TERMINATED: u8 = 2;

fn lifecycle_from(raw: u8) -> Lifecycle {
    match raw {
        ACTIVE => Lifecycle::Active,
        SHUTTING_DOWN => Lifecycle::ShuttingDown,
        _ => Lifecycle::Terminated,
    }
}

type Job<S> = Box<dyn FnOnce(&Rc<S>) + Send>;

enum Message<S> {
    Job(Job<S>),
    Shutdown,
}

struct Inner<S> {
    id: SessionId,
    tx: mpsc::UnboundedSender<Message<S>>,
    thread: OnceLock<ThreadId>,
    lifecycle: AtomicU8,
    join: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a session executor. Cheap to clone and safe to share.
pub struct Executor<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for Executor<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> std::fmt::Debug for Executor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("id", &self.inner.id)
            .field("lifecycle", &lifecycle_from(self.inner.lifecycle.load(Ordering::Acquire)))
            .finish()
    }
}

impl<S: SessionState> Executor<S> {
    /// Start an executor thread named `<name>-executor-<id>`.
    ///
    /// `init` runs on the new thread, inside the executor's local set, and
    /// builds the session state. It receives a handle to the executor so the
    /// state can enqueue work on itself (for example from transport tasks).
    pub fn spawn<F>(id: SessionId, name: &str, init: F) -> Result<Self, SessionError>
    where
        F: FnOnce(&Executor<S>) -> S + Send + 'static,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let executor = Executor {
            inner: Arc::new(Inner {
                id,
                tx,
                thread: OnceLock::new(),
                lifecycle: AtomicU8::new(ACTIVE),
                join: Mutex::new(None),
            }),
        };

        let thread_exec = executor.clone();
        let handle = thread::Builder::new()
            .name(format!("{name}-executor-{id}"))
            .spawn(move || {
                let _ = thread_exec.inner.thread.set(thread::current().id());
                let local = LocalSet::new();
                // Built inside the local set so `init` may spawn local tasks.
                let state = local.block_on(&runtime, async { Rc::new(init(&thread_exec)) });
                tracing::debug!(session = %thread_exec.inner.id, "executor started");

                local.block_on(&runtime, run_loop(rx, Rc::clone(&state)));

                state.on_shutdown();
                {
                    // Dropping the local set cancels in-flight local tasks;
                    // their monitors report Cancelled.
                    let _guard = runtime.enter();
                    drop(local);
                    drop(state);
                }
                thread_exec
                    .inner
                    .lifecycle
                    .store(TERMINATED, Ordering::Release);
                tracing::debug!(session = %thread_exec.inner.id, "executor terminated");
            })?;

        *executor
            .inner
            .join
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
        Ok(executor)
    }

    /// The session this executor serves.
    pub fn session_id(&self) -> SessionId {
        self.inner.id
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        lifecycle_from(self.inner.lifecycle.load(Ordering::Acquire))
    }

    /// Whether the calling thread is this executor's thread.
    pub fn is_executor_thread(&self) -> bool {
        self.inner
            .thread
            .get()
            .is_some_and(|id| *id == thread::current().id())
    }

    /// Enqueue a fire-and-forget task.
    ///
    /// Fails with [`SessionError::Cancelled`] once shutdown has begun.
    pub fn execute<F>(&self, f: F) -> Result<(), SessionError>
    where
        F: FnOnce(&Rc<S>) + Send + 'static,
    {
        if self.inner.lifecycle.load(Ordering::Acquire) != ACTIVE {
            return Err(SessionError::Cancelled);
        }
        self.inner
            .tx
            .send(Message::Job(Box::new(f)))
            .map_err(|_| SessionError::Cancelled)
    }

    /// Enqueue a task and receive its return value.
    pub fn submit<R, F>(&self, f: F) -> Completion<R>
    where
        R: Send + 'static,
        F: FnOnce(&Rc<S>) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        // A rejected task drops `tx`, which resolves the completion as Cancelled.
        let _ = self.execute(move |state| {
            let _ = tx.send(Ok(f(state)));
        });
        Completion::from_receiver(rx)
    }

    /// Enqueue a task that continues asynchronously on the executor.
    ///
    /// The returned future is spawned on the executor's local set.
    pub fn submit_async<R, F, Fut>(&self, f: F) -> Completion<R>
    where
        R: Send + 'static,
        F: FnOnce(Rc<S>) -> Fut + Send + 'static,
        Fut: Future<Output = SessionResult<R>> + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let _ = self.execute(move |state| {
            let fut = f(Rc::clone(state));
            tokio::task::spawn_local(async move {
                let _ = tx.send(fut.await);
            });
        });
        Completion::from_receiver(rx)
    }

    /// Stop accepting tasks, drain the queue, run the shutdown hook and join
    /// the executor thread. Idempotent.
    pub fn shutdown(&self) -> Result<(), SessionError> {
        if self.is_executor_thread() {
            return Err(SessionError::InvariantViolation(
                "executor cannot shut itself down from its own thread".into(),
            ));
        }
        if self
            .inner
            .lifecycle
            .compare_exchange(ACTIVE, SHUTTING_DOWN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::debug!(session = %self.inner.id, "executor shutting down");
            let _ = self.inner.tx.send(Message::Shutdown);
        }

        let handle = self
            .inner
            .join
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.join().map_err(|_| {
                SessionError::InvariantViolation("executor thread panicked".into())
            })?;
        }
        Ok(())
    }
}

async fn run_loop<S: SessionState>(mut rx: mpsc::UnboundedReceiver<Message<S>>, state: Rc<S>) {
    while let Some(msg) = rx.recv().await {
        match msg {
            Message::Job(job) => run_job(job, &state),
            Message::Shutdown => break,
        }
    }

    rx.close();
    while let Ok(msg) = rx.try_recv() {
        if let Message::Job(job) = msg {
            run_job(job, &state);
        }
    }
}

fn run_job<S>(job: Job<S>, state: &Rc<S>) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job(state))) {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!("executor task panicked: {msg}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::cell::RefCell;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct Log {
        entries: RefCell<Vec<u32>>,
    }

    impl SessionState for Log {}

    fn spawn_log() -> Executor<Log> {
        Executor::spawn(SessionId(1), "test", |_| Log::default()).unwrap()
    }

    #[test]
    fn tasks_run_in_submission_order() {
        let exec = spawn_log();
        for i in 0..100 {
            exec.execute(move |s| s.entries.borrow_mut().push(i)).unwrap();
        }
        let rt = tokio::runtime::Runtime::new().unwrap();
        let entries = rt
            .block_on(exec.submit(|s| s.entries.borrow().clone()))
            .unwrap();
        assert_eq!(entries, (0..100).collect::<Vec<_>>());
        exec.shutdown().unwrap();
    }

    #[tokio::test]
    async fn submit_runs_on_executor_thread() {
        let exec = spawn_log();
        assert!(!exec.is_executor_thread());
        let handle = exec.clone();
        let on_thread = exec.submit(move |_| handle.is_executor_thread()).await.unwrap();
        assert!(on_thread);
        let name = exec
            .submit(|_| thread::current().name().map(str::to_string))
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("test-executor-1"));
        exec.shutdown().unwrap();
    }

    #[tokio::test]
    async fn panicking_task_does_not_stop_the_queue() {
        let exec = spawn_log();
        exec.execute(|_| panic!("boom")).unwrap();
        exec.execute(|s| s.entries.borrow_mut().push(1)).unwrap();
        let len = exec.submit(|s| s.entries.borrow().len()).await.unwrap();
        assert_eq!(len, 1);
        exec.shutdown().unwrap();
    }

    #[tokio::test]
    async fn submit_async_awaits_on_executor() {
        let exec = spawn_log();
        let value = exec
            .submit_async(|state| async move {
                tokio::task::yield_now().await;
                state.entries.borrow_mut().push(5);
                Ok(state.entries.borrow().len())
            })
            .await
            .unwrap();
        assert_eq!(value, 1);
        exec.shutdown().unwrap();
    }

    struct Hooked {
        hook_runs: Arc<AtomicUsize>,
    }

    impl SessionState for Hooked {
        fn on_shutdown(&self) {
            self.hook_runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn shutdown_drains_queue_then_runs_hook_once() {
        let hook_runs = Arc::new(AtomicUsize::new(0));
        let ran = Arc::new(AtomicUsize::new(0));
        let hr = Arc::clone(&hook_runs);
        let exec = Executor::spawn(SessionId(2), "test", move |_| Hooked { hook_runs: hr }).unwrap();
        for _ in 0..10 {
            let ran = Arc::clone(&ran);
            exec.execute(move |_| {
                thread::sleep(Duration::from_millis(1));
                ran.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        exec.shutdown().unwrap();
        exec.shutdown().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 10);
        assert_eq!(hook_runs.load(Ordering::SeqCst), 1);
        assert_eq!(exec.lifecycle(), Lifecycle::Terminated);
    }

    #[tokio::test]
    async fn tasks_after_shutdown_are_rejected() {
        let exec = spawn_log();
        let closer = exec.clone();
        tokio::task::spawn_blocking(move || closer.shutdown())
            .await
            .unwrap()
            .unwrap();
        let err = exec.execute(|_| {}).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        let err = exec.submit(|_| 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn pending_async_work_is_cancelled_on_shutdown() {
        let exec = spawn_log();
        let never = exec.submit_async(|_| async {
            std::future::pending::<()>().await;
            Ok(())
        });
        let closer = exec.clone();
        tokio::task::spawn_blocking(move || closer.shutdown())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(never.await.unwrap_err().kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn shutdown_from_executor_thread_is_refused() {
        let exec = spawn_log();
        let inner = exec.clone();
        let result = exec.submit(move |_| inner.shutdown()).await.unwrap();
        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvariantViolation);
        exec.shutdown().unwrap();
    }
}
