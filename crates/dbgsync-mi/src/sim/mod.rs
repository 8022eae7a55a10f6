//! In-process simulated GDB/MI backend.
//!
//! [`SimBackend::start`] runs a small GDB look-alike on its own thread and
//! hands back the client end of an in-memory pipe. It speaks enough MI for
//! breakpoint work: `-break-*`, `-exec-continue`, `-exec-interrupt`,
//! `-list-features`, `-gdb-exit` and console commands through
//! `-interpreter-exec console`. Console-originated changes are announced
//! with `=breakpoint-*` notifications, like a real backend.
//!
//! The [`SimHandle`] drives the backend from outside the session: typing on
//! the backend's own console, loading symbols, injecting raw output and
//! inspecting the breakpoint table.
mod console;
mod program;
mod state;

use std::io;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, WriteHalf};
use tokio::sync::mpsc;

pub use console::{parse_console, BreakFlavor, ConsoleCommand};
pub use program::{format_address, Function, Location, Program, SourceFile};
pub use state::BreakpointSnapshot;

use state::SimState;

/// Size of the in-memory pipe in each direction.
const PIPE_CAPACITY: usize = 64 * 1024;

enum SimControl {
    Console(String, std_mpsc::Sender<()>),
    LoadSymbols(Program, std_mpsc::Sender<()>),
    Emit(String, std_mpsc::Sender<()>),
    Stop,
}

/// Entry point for the simulated backend.
pub struct SimBackend;

impl SimBackend {
    /// Start a backend debugging `program`.
    ///
    /// Returns the control handle and the client end of the MI pipe.
    pub fn start(program: Program) -> io::Result<(SimHandle, DuplexStream)> {
        let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
        let state = Arc::new(Mutex::new(SimState::new(program)));
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let thread_state = Arc::clone(&state);
        let thread = std::thread::Builder::new()
            .name("dbgsync-sim".into())
            .spawn(move || runtime.block_on(serve(thread_state, server, control_rx)))?;

        Ok((
            SimHandle {
                state,
                control: control_tx,
                thread: Some(thread),
            },
            client,
        ))
    }
}

/// Out-of-band control over a running simulated backend.
///
/// Methods that produce output block until that output has been written to
/// the pipe. Dropping the handle stops the backend.
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
    control: mpsc::UnboundedSender<SimControl>,
    thread: Option<JoinHandle<()>>,
}

impl SimHandle {
    /// Type `text` on the backend's own console, bypassing MI.
    pub fn console(&self, text: &str) {
        self.round_trip(|ack| SimControl::Console(text.to_string(), ack));
    }

    /// Load additional symbols, resolving pending breakpoints.
    pub fn load_symbols(&self, program: Program) {
        self.round_trip(|ack| SimControl::LoadSymbols(program, ack));
    }

    /// Write `line` to the client verbatim.
    pub fn emit_raw(&self, line: &str) {
        self.round_trip(|ack| SimControl::Emit(line.to_string(), ack));
    }

    /// Turn `=breakpoint-*` notifications on or off.
    pub fn set_notifications(&self, on: bool) {
        lock(&self.state).set_notifications(on);
    }

    /// Whether console breakpoints on unknown locations become pending.
    pub fn set_console_pending(&self, on: bool) {
        lock(&self.state).set_console_pending(on);
    }

    /// The backend's breakpoint table, ordered by number.
    pub fn snapshot(&self) -> Vec<BreakpointSnapshot> {
        lock(&self.state).snapshot()
    }

    /// How many times the backend received MI `operation`.
    pub fn commands_received(&self, operation: &str) -> usize {
        lock(&self.state).received(operation)
    }

    /// Stop the backend thread and wait for it. Idempotent.
    pub fn shutdown(&mut self) {
        let _ = self.control.send(SimControl::Stop);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("simulated backend thread panicked");
            }
        }
    }

    fn round_trip(&self, message: impl FnOnce(std_mpsc::Sender<()>) -> SimControl) {
        let (ack_tx, ack_rx) = std_mpsc::channel();
        if self.control.send(message(ack_tx)).is_err() {
            tracing::warn!("simulated backend is not running");
            return;
        }
        let _ = ack_rx.recv();
    }
}

impl Drop for SimHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SimHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimHandle")
            .field("running", &self.thread.is_some())
            .finish()
    }
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn write_lines(writer: &mut WriteHalf<DuplexStream>, lines: &[String]) -> io::Result<()> {
    for line in lines {
        tracing::trace!(line = %line, "sim ->");
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }
    writer.flush().await
}

async fn serve(
    state: Arc<Mutex<SimState>>,
    stream: DuplexStream,
    mut control: mpsc::UnboundedReceiver<SimControl>,
) {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    if write_lines(&mut writer, &["(gdb)".to_string()]).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "sim read failed");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                tracing::trace!(line = %line, "sim <-");
                let reply = lock(&state).handle_line(&line);
                if write_lines(&mut writer, &reply.lines).await.is_err() || reply.exit {
                    break;
                }
            }
            Some(message) = control.recv() => {
                let (output, ack) = match message {
                    SimControl::Console(text, ack) => (lock(&state).cli(&text).lines, ack),
                    SimControl::LoadSymbols(program, ack) => {
                        (lock(&state).load_symbols(program).lines, ack)
                    }
                    SimControl::Emit(line, ack) => (vec![line], ack),
                    SimControl::Stop => break,
                };
                let written = write_lines(&mut writer, &output).await;
                let _ = ack.send(());
                if written.is_err() {
                    break;
                }
            }
            else => break,
        }
    }
    tracing::debug!("simulated backend stopped");
}
