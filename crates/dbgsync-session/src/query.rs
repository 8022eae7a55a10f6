//! Blocking bridge from foreign threads into a session executor.
//!
//! A [`Query`] enqueues an asynchronous operation on the executor and parks
//! the calling thread until the result arrives. Timing out only stops the
//! caller from waiting; the operation keeps running to completion on the
//! executor.

use std::future::Future;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::mpsc;
use std::time::Duration;

use crate::error::SessionError;
use crate::executor::{Executor, SessionState};
use crate::monitor::SessionResult;

/// A one-shot synchronous request against an executor.
pub struct Query<'a, S, R, F> {
    executor: &'a Executor<S>,
    op: F,
    _result: PhantomData<fn() -> R>,
}

impl<'a, S, R, F, Fut> Query<'a, S, R, F>
where
    S: SessionState,
    R: Send + 'static,
    F: FnOnce(Rc<S>) -> Fut + Send + 'static,
    Fut: Future<Output = SessionResult<R>> + 'static,
{
    /// Prepare a query. `op` runs on the executor thread and returns the
    /// future whose output is delivered to the caller.
    pub fn new(executor: &'a Executor<S>, op: F) -> Self {
        Self {
            executor,
            op,
            _result: PhantomData,
        }
    }

    /// Block until the operation completes.
    pub fn get(self) -> SessionResult<R> {
        let rx = self.start()?;
        rx.recv().unwrap_or(Err(SessionError::Cancelled))
    }

    /// Block for at most `timeout`.
    ///
    /// On expiry returns [`SessionError::Timeout`]; the operation is not
    /// cancelled and its eventual result is discarded.
    pub fn get_timeout(self, timeout: Duration) -> SessionResult<R> {
        let session = self.executor.session_id();
        let rx = self.start()?;
        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::debug!(%session, ?timeout, "query timed out");
                Err(SessionError::Timeout { waited: timeout })
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(SessionError::Cancelled),
        }
    }

    fn start(self) -> SessionResult<mpsc::Receiver<SessionResult<R>>> {
        if self.executor.is_executor_thread() {
            return Err(SessionError::InvariantViolation(
                "query issued from the executor thread would deadlock".into(),
            ));
        }
        let (tx, rx) = mpsc::channel();
        let op = self.op;
        self.executor.execute(move |state| {
            let fut = op(Rc::clone(state));
            tokio::task::spawn_local(async move {
                // The caller may have timed out and dropped the receiver.
                let _ = tx.send(fut.await);
            });
        })?;
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SessionId;
    use crate::error::ErrorKind;
    use crate::monitor::RequestMonitor;
    use std::cell::Cell;
    use std::time::Instant;

    #[derive(Default)]
    struct Counter {
        value: Cell<u32>,
    }

    impl SessionState for Counter {}

    fn spawn_counter() -> Executor<Counter> {
        Executor::spawn(SessionId(3), "query", |_| Counter::default()).unwrap()
    }

    #[test]
    fn get_returns_operation_result() {
        let exec = spawn_counter();
        let value = Query::new(&exec, |state: Rc<Counter>| async move {
            state.value.set(state.value.get() + 41);
            Ok(state.value.get() + 1)
        })
        .get()
        .unwrap();
        assert_eq!(value, 42);
        exec.shutdown().unwrap();
    }

    #[test]
    fn get_propagates_operation_error() {
        let exec = spawn_counter();
        let err = Query::new(&exec, |_state: Rc<Counter>| async {
            Err::<(), _>(SessionError::rejected("No symbol \"x\" in current context."))
        })
        .get()
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendRejected);
        assert_eq!(err.to_string(), "No symbol \"x\" in current context.");
        exec.shutdown().unwrap();
    }

    #[test]
    fn timeout_leaves_operation_running() {
        let exec = spawn_counter();
        let started = Instant::now();
        let err = Query::new(&exec, |state: Rc<Counter>| async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            state.value.set(7);
            Ok(())
        })
        .get_timeout(Duration::from_millis(20))
        .unwrap_err();
        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(err.kind(), ErrorKind::Timeout);

        let value = Query::new(&exec, |state: Rc<Counter>| async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(state.value.get())
        })
        .get()
        .unwrap();
        assert_eq!(value, 7);
        exec.shutdown().unwrap();
    }

    #[test]
    fn query_on_executor_thread_is_refused() {
        let exec = spawn_counter();
        let inner = exec.clone();
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let result = rt
            .block_on(exec.submit(move |_| {
                Query::new(&inner, |_s: Rc<Counter>| async { Ok(1u32) }).get()
            }))
            .unwrap();
        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvariantViolation);
        exec.shutdown().unwrap();
    }

    #[test]
    fn query_awaiting_a_dropped_monitor_is_cancelled() {
        let exec = spawn_counter();
        let err = Query::new(&exec, |_s: Rc<Counter>| {
            let (rm, completion) = RequestMonitor::<u32>::channel();
            drop(rm);
            completion
        })
        .get()
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        exec.shutdown().unwrap();
    }

    #[test]
    fn query_after_shutdown_is_cancelled() {
        let exec = spawn_counter();
        exec.shutdown().unwrap();
        let err = Query::new(&exec, |_s: Rc<Counter>| async { Ok(()) })
            .get()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
