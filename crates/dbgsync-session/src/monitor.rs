//! Request monitors: one-shot completion tokens for asynchronous operations.
//!
//! A [`RequestMonitor`] is the producer side of an operation's outcome. It is
//! consumed by [`RequestMonitor::done`], [`RequestMonitor::fail`] or
//! [`RequestMonitor::complete`], which makes a second completion impossible.
//! Dropping a monitor that was never completed reports
//! [`SessionError::Cancelled`], so every monitor resolves exactly once.
//!
//! Monitors are confined to the executor thread. The receiving side of a
//! channel monitor, [`Completion`], is an ordinary future and may be awaited
//! anywhere.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::SessionError;

/// Result type carried by monitors.
pub type SessionResult<T> = Result<T, SessionError>;

enum Sink<T> {
    Channel(oneshot::Sender<SessionResult<T>>),
    Immediate(Box<dyn FnOnce(SessionResult<T>)>),
}

/// Producer side of an asynchronous operation's outcome.
pub struct RequestMonitor<T: 'static> {
    sink: Option<Sink<T>>,
}

impl<T: 'static> RequestMonitor<T> {
    /// Create a monitor whose outcome is delivered to the returned [`Completion`].
    pub fn channel() -> (Self, Completion<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sink: Some(Sink::Channel(tx)),
            },
            Completion { rx },
        )
    }

    /// Create a monitor that runs `f` synchronously on the completing thread.
    ///
    /// Only sound because monitors are completed on the owning executor.
    pub fn immediate(f: impl FnOnce(SessionResult<T>) + 'static) -> Self {
        Self {
            sink: Some(Sink::Immediate(Box::new(f))),
        }
    }

    /// A monitor whose outcome nobody waits for. Failures are logged.
    pub fn detached(what: &'static str) -> Self {
        Self::immediate(move |result| {
            if let Err(err) = result {
                tracing::debug!(operation = what, "detached operation failed: {err}");
            }
        })
    }

    /// Create a monitor that forwards to `parent` after mapping the data.
    pub fn forward<U: 'static>(
        parent: RequestMonitor<U>,
        f: impl FnOnce(T) -> SessionResult<U> + 'static,
    ) -> Self {
        Self::immediate(move |result| parent.complete(result.and_then(f)))
    }

    /// Complete successfully with `data`.
    pub fn done(self, data: T) {
        self.complete(Ok(data));
    }

    /// Complete with an error.
    pub fn fail(self, err: SessionError) {
        self.complete(Err(err));
    }

    /// Complete with `result`.
    pub fn complete(mut self, result: SessionResult<T>) {
        if let Some(sink) = self.sink.take() {
            deliver(sink, result);
        }
    }
}

fn deliver<T>(sink: Sink<T>, result: SessionResult<T>) {
    match sink {
        // The receiver may have stopped waiting (e.g. a timed-out query).
        Sink::Channel(tx) => {
            let _ = tx.send(result);
        }
        Sink::Immediate(f) => f(result),
    }
}

impl<T: 'static> Drop for RequestMonitor<T> {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.take() {
            deliver(sink, Err(SessionError::Cancelled));
        }
    }
}

impl<T: 'static> fmt::Debug for RequestMonitor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.sink {
            Some(Sink::Channel(_)) => "channel",
            Some(Sink::Immediate(_)) => "immediate",
            None => "completed",
        };
        f.debug_struct("RequestMonitor").field("sink", &kind).finish()
    }
}

/// Receiving side of a channel [`RequestMonitor`].
///
/// Resolves to the monitor's result, or to [`SessionError::Cancelled`] if the
/// monitor was dropped together with its session.
#[derive(Debug)]
pub struct Completion<T> {
    rx: oneshot::Receiver<SessionResult<T>>,
}

impl<T: 'static> Completion<T> {
    pub(crate) fn from_receiver(rx: oneshot::Receiver<SessionResult<T>>) -> Self {
        Self { rx }
    }

    /// A completion that is already resolved.
    pub fn ready(result: SessionResult<T>) -> Self {
        let (rm, completion) = RequestMonitor::channel();
        rm.complete(result);
        completion
    }

    /// Take the result if it is already available, without waiting.
    pub fn try_result(&mut self) -> Option<SessionResult<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(SessionError::Cancelled)),
        }
    }

    /// Transform the successful value.
    pub fn map<U, F>(self, f: F) -> impl Future<Output = SessionResult<U>>
    where
        F: FnOnce(T) -> U,
    {
        async move { self.await.map(f) }
    }

    /// Chain a dependent asynchronous step.
    pub fn and_then<U, F, Fut>(self, f: F) -> impl Future<Output = SessionResult<U>>
    where
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = SessionResult<U>>,
    {
        async move {
            let value = self.await?;
            f(value).await
        }
    }
}

impl<T> Future for Completion<T> {
    type Output = SessionResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(SessionError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

struct CountingState {
    expected: usize,
    reported: usize,
    errors: Vec<SessionError>,
    parent: Option<RequestMonitor<()>>,
}

/// Aggregates a fixed number of child operations into one completion.
///
/// The parent fires once `expected` children have reported. If any child
/// failed, every failure is reported together.
#[derive(Clone)]
pub struct CountingRequestMonitor {
    state: Rc<RefCell<CountingState>>,
}

impl CountingRequestMonitor {
    /// Create a counter for `expected` children. With zero children the
    /// parent completes immediately.
    pub fn new(expected: usize, parent: RequestMonitor<()>) -> Self {
        let parent = if expected == 0 {
            parent.done(());
            None
        } else {
            Some(parent)
        };
        Self {
            state: Rc::new(RefCell::new(CountingState {
                expected,
                reported: 0,
                errors: Vec::new(),
                parent,
            })),
        }
    }

    /// Hand out a child monitor whose data is discarded.
    pub fn child<T: 'static>(&self) -> RequestMonitor<T> {
        let state = Rc::clone(&self.state);
        RequestMonitor::immediate(move |result: SessionResult<T>| {
            report(&state, result.map(|_| ()));
        })
    }

    /// Number of children that have reported so far.
    pub fn reported(&self) -> usize {
        self.state.borrow().reported
    }
}

fn report(state: &Rc<RefCell<CountingState>>, result: SessionResult<()>) {
    let finished = {
        let mut s = state.borrow_mut();
        if s.reported >= s.expected {
            let err = SessionError::InvariantViolation(format!(
                "counting monitor received report {} of {}",
                s.reported + 1,
                s.expected
            ));
            tracing::error!("{err}");
            return;
        }
        s.reported += 1;
        if let Err(err) = result {
            s.errors.push(err);
        }
        if s.reported == s.expected {
            let errors = std::mem::take(&mut s.errors);
            s.parent.take().map(|parent| (parent, errors))
        } else {
            None
        }
    };

    // Borrow released: the parent's continuation may touch other monitors.
    if let Some((parent, mut errors)) = finished {
        match errors.len() {
            0 => parent.done(()),
            1 => parent.fail(errors.remove(0)),
            _ => parent.fail(SessionError::Multiple(errors)),
        }
    }
}

impl fmt::Debug for CountingRequestMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.state.borrow();
        f.debug_struct("CountingRequestMonitor")
            .field("expected", &s.expected)
            .field("reported", &s.reported)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::cell::Cell;

    #[tokio::test]
    async fn channel_monitor_delivers_data() {
        let (rm, completion) = RequestMonitor::channel();
        rm.done(42);
        assert_eq!(completion.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn dropped_monitor_reports_cancelled() {
        let (rm, completion) = RequestMonitor::<u32>::channel();
        drop(rm);
        let err = completion.await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn immediate_monitor_runs_synchronously() {
        let seen = Rc::new(Cell::new(0));
        let seen2 = Rc::clone(&seen);
        let rm = RequestMonitor::immediate(move |r: SessionResult<u32>| seen2.set(r.unwrap()));
        assert_eq!(seen.get(), 0);
        rm.done(7);
        assert_eq!(seen.get(), 7);
    }

    #[test]
    fn immediate_monitor_dropped_sees_cancel_once() {
        let calls = Rc::new(Cell::new(0));
        let calls2 = Rc::clone(&calls);
        let rm = RequestMonitor::immediate(move |r: SessionResult<()>| {
            assert!(matches!(r, Err(SessionError::Cancelled)));
            calls2.set(calls2.get() + 1);
        });
        drop(rm);
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn forward_maps_into_parent() {
        let (parent, completion) = RequestMonitor::<String>::channel();
        let child = RequestMonitor::forward(parent, |n: u32| Ok(format!("bp {n}")));
        child.done(3);
        assert_eq!(completion.await.unwrap(), "bp 3");
    }

    #[tokio::test]
    async fn completion_combinators() {
        let (rm, completion) = RequestMonitor::channel();
        rm.done(2u32);
        let doubled = completion
            .and_then(|n| async move { Ok::<_, SessionError>(n * 2) })
            .await
            .unwrap();
        assert_eq!(doubled, 4);

        let ready = Completion::ready(Ok(5u32)).map(|n| n + 1).await.unwrap();
        assert_eq!(ready, 6);
    }

    #[test]
    fn try_result_reports_state() {
        let (rm, mut completion) = RequestMonitor::channel();
        assert!(completion.try_result().is_none());
        rm.done("x");
        assert_eq!(completion.try_result().unwrap().unwrap(), "x");
    }

    #[tokio::test]
    async fn counting_monitor_waits_for_all_children() {
        let (parent, mut completion) = RequestMonitor::channel();
        let counting = CountingRequestMonitor::new(3, parent);
        let a = counting.child::<()>();
        let b = counting.child::<u32>();
        let c = counting.child::<()>();
        a.done(());
        b.done(9);
        assert!(completion.try_result().is_none());
        c.done(());
        assert!(completion.await.is_ok());
    }

    #[tokio::test]
    async fn counting_monitor_zero_children_fires_at_once() {
        let (parent, completion) = RequestMonitor::channel();
        let _counting = CountingRequestMonitor::new(0, parent);
        assert!(completion.await.is_ok());
    }

    #[tokio::test]
    async fn counting_monitor_collects_all_errors() {
        let (parent, completion) = RequestMonitor::channel();
        let counting = CountingRequestMonitor::new(3, parent);
        counting
            .child::<()>()
            .fail(SessionError::rejected("No breakpoint number 4."));
        counting.child::<()>().done(());
        counting
            .child::<()>()
            .fail(SessionError::rejected("No breakpoint number 5."));

        match completion.await.unwrap_err() {
            SessionError::Multiple(errors) => {
                assert_eq!(errors.len(), 2);
                assert!(errors[0].to_string().contains("4"));
                assert!(errors[1].to_string().contains("5"));
            }
            other => panic!("expected aggregated errors, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn counting_monitor_single_error_is_reported_as_is() {
        let (parent, completion) = RequestMonitor::channel();
        let counting = CountingRequestMonitor::new(2, parent);
        counting.child::<()>().done(());
        counting.child::<()>().fail(SessionError::Cancelled);
        assert_eq!(completion.await.unwrap_err().kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn counting_monitor_ignores_extra_reports() {
        let fired = Rc::new(Cell::new(0));
        let fired2 = Rc::clone(&fired);
        let parent = RequestMonitor::immediate(move |_: SessionResult<()>| {
            fired2.set(fired2.get() + 1);
        });
        let counting = CountingRequestMonitor::new(1, parent);
        counting.child::<()>().done(());
        counting.child::<()>().done(());
        assert_eq!(fired.get(), 1);
        assert_eq!(counting.reported(), 1);
    }
}
