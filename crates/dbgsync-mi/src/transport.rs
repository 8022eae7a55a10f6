//! Line-oriented transport between a session and its backend.
//!
//! A reader task decodes one record per line and routes it through the
//! executor queue, so record handling is serialized with every other task
//! of the session. A writer task drains outgoing lines in FIFO order. Both
//! run as local tasks on the executor thread.
use std::rc::Rc;

use dbgsync_session::{Executor, SessionError, SessionState};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::output::{parse_record, Record};

/// Session state that consumes decoded backend records.
pub trait RecordSink: SessionState + Sized {
    /// Handle one record. Runs as an executor task.
    fn on_record(state: &Rc<Self>, record: Record);

    /// The backend stream ended or could not be written (`error` is `None`
    /// on clean EOF). May be called once for each direction.
    fn on_disconnect(state: &Rc<Self>, error: Option<String>) {
        let _ = (state, error);
    }
}

/// Handle to the writer side of a transport.
#[derive(Debug, Clone)]
pub struct Transport {
    tx: mpsc::UnboundedSender<String>,
}

impl Transport {
    /// Spawn reader and writer tasks on the current executor's local set.
    ///
    /// Must be called on the executor thread, typically from the state
    /// constructor passed to [`Executor::spawn`].
    pub fn spawn<S, R, W>(executor: &Executor<S>, reader: R, writer: W) -> Self
    where
        S: RecordSink,
        R: AsyncRead + Unpin + 'static,
        W: AsyncWrite + Unpin + 'static,
    {
        let session = executor.session_id();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let writer_exec = executor.clone();
        tokio::task::spawn_local(async move {
            let mut writer = writer;
            let error = loop {
                let Some(line) = rx.recv().await else {
                    break None;
                };
                tracing::debug!(%session, "-> {line}");
                if let Err(e) = write_line(&mut writer, line).await {
                    break Some(e);
                }
            };
            // Lines still queued are never written; later sends fail at once.
            drop(rx);
            if let Some(e) = error {
                tracing::warn!(%session, "transport write failed: {e}");
                let error = format!("write failed: {e}");
                let _ = writer_exec.execute(move |state| S::on_disconnect(state, Some(error)));
            }
        });

        let exec = executor.clone();
        tokio::task::spawn_local(async move {
            let mut lines = BufReader::new(reader).lines();
            let error = loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        tracing::debug!(%session, "<- {line}");
                        let record = match parse_record(&line) {
                            Ok(record) => record,
                            Err(e) => {
                                tracing::warn!(%session, "dropping malformed record {line:?}: {e}");
                                continue;
                            }
                        };
                        if exec.execute(move |state| S::on_record(state, record)).is_err() {
                            return;
                        }
                    }
                    Ok(None) => break None,
                    Err(e) => break Some(e.to_string()),
                }
            };
            tracing::debug!(%session, ?error, "transport reader finished");
            let _ = exec.execute(move |state| S::on_disconnect(state, error));
        });

        Self { tx }
    }

    /// Queue one line for writing. Lines are written in call order.
    pub fn send_line(&self, line: String) -> Result<(), SessionError> {
        self.tx.send(line).map_err(|_| {
            SessionError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "transport writer closed",
            ))
        })
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: String) -> std::io::Result<()> {
    let mut bytes = line.into_bytes();
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::StreamKind;
    use dbgsync_session::SessionId;
    use std::cell::RefCell;

    struct Collector {
        records: RefCell<Vec<Record>>,
        closed: RefCell<Option<Option<String>>>,
        transport: RefCell<Option<Transport>>,
    }

    impl SessionState for Collector {}

    impl RecordSink for Collector {
        fn on_record(state: &Rc<Self>, record: Record) {
            state.records.borrow_mut().push(record);
        }

        fn on_disconnect(state: &Rc<Self>, error: Option<String>) {
            *state.closed.borrow_mut() = Some(error);
        }
    }

    #[tokio::test]
    async fn records_flow_in_both_directions() {
        let (client, backend) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client);
        let (backend_read, mut backend_write) = tokio::io::split(backend);

        let exec = Executor::spawn(SessionId(1), "transport", move |exec| {
            let transport = Transport::spawn(exec, client_read, client_write);
            Collector {
                records: RefCell::new(Vec::new()),
                closed: RefCell::new(None),
                transport: RefCell::new(Some(transport)),
            }
        })
        .unwrap();

        exec.submit(|s| {
            let transport = s.transport.borrow();
            transport.as_ref().map(|t| t.send_line("1-break-list".into()))
        })
        .await
        .unwrap()
        .unwrap()
        .unwrap();
        let mut backend_lines = BufReader::new(backend_read).lines();
        assert_eq!(
            backend_lines.next_line().await.unwrap().as_deref(),
            Some("1-break-list")
        );

        backend_write
            .write_all(b"~\"hello\\n\"\nnot a record\n\n1^done\n")
            .await
            .unwrap();
        drop(backend_write);
        drop(backend_lines);

        let mut closed = None;
        for _ in 0..100 {
            closed = exec.submit(|s| s.closed.borrow().clone()).await.unwrap();
            if closed.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(closed, Some(None));

        let records = exec.submit(|s| s.records.borrow().clone()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(&records[0], Record::Stream(s) if s.kind == StreamKind::Console));
        assert!(matches!(&records[1], Record::Result(r) if r.token == Some(1)));

        exec.shutdown().unwrap();
    }

    struct BrokenPipe;

    impl AsyncWrite for BrokenPipe {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::task::Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "backend gone",
            )))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn write_failure_is_reported_and_closes_the_writer() {
        let (client, _backend) = tokio::io::duplex(4096);
        let (client_read, _client_write) = tokio::io::split(client);

        let exec = Executor::spawn(SessionId(2), "transport", move |exec| {
            let transport = Transport::spawn(exec, client_read, BrokenPipe);
            Collector {
                records: RefCell::new(Vec::new()),
                closed: RefCell::new(None),
                transport: RefCell::new(Some(transport)),
            }
        })
        .unwrap();

        exec.submit(|s| {
            let transport = s.transport.borrow();
            transport.as_ref().map(|t| t.send_line("1-break-list".into()))
        })
        .await
        .unwrap()
        .unwrap()
        .unwrap();

        let mut closed = None;
        for _ in 0..100 {
            closed = exec.submit(|s| s.closed.borrow().clone()).await.unwrap();
            if closed.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let error = closed.flatten().unwrap();
        assert!(error.contains("backend gone"), "{error}");

        let later = exec
            .submit(|s| {
                let transport = s.transport.borrow();
                transport.as_ref().map(|t| t.send_line("2-break-list".into()))
            })
            .await
            .unwrap()
            .unwrap();
        assert!(later.is_err());

        exec.shutdown().unwrap();
    }
}
