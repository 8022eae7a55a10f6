//! Console script replay.
//!
//! A script holds one console command per line. Blank lines and lines
//! starting with `#` are skipped; `!flush` drops the synchronizer's cache
//! and rebuilds it from a fresh breakpoint list.
use anyhow::{bail, Context, Result};
use dbgsync_breakpoints::{DebugSession, PlatformBreakpoint, SyncMode};
use dbgsync_session::ErrorKind;
use tracing::{info, warn};

/// One script line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Run on the backend console.
    Console { line: usize, text: String },
    /// Force a full refresh.
    Flush { line: usize },
}

/// Parse a script.
pub fn parse(source: &str) -> Result<Vec<Step>> {
    let mut steps = Vec::new();
    for (idx, raw) in source.lines().enumerate() {
        let line = idx + 1;
        let text = raw.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        match text.strip_prefix('!') {
            Some("flush") => steps.push(Step::Flush { line }),
            Some(directive) => bail!("line {line}: unknown directive !{directive}"),
            None => steps.push(Step::Console {
                line,
                text: text.to_string(),
            }),
        }
    }
    Ok(steps)
}

/// Play `steps` against `session` and return the converged breakpoint table.
///
/// Commands the backend rejects are reported on stderr and the replay
/// continues, like a debugger sourcing a command file with errors ignored.
pub fn replay(session: &DebugSession, steps: &[Step]) -> Result<Vec<PlatformBreakpoint>> {
    for step in steps {
        match step {
            Step::Console { line, text } => {
                if let Err(err) = session.console(text) {
                    if err.kind() != ErrorKind::BackendRejected {
                        return Err(err).with_context(|| format!("line {line}: {text}"));
                    }
                    warn!(line, "console command rejected: {err}");
                    eprintln!("dbgsync: line {line}: {err}");
                }
            }
            Step::Flush { line } => session
                .flush_cache()
                .with_context(|| format!("line {line}: !flush"))?,
        }
    }

    match session.sync_mode()? {
        SyncMode::Events => session.settle()?,
        SyncMode::Manual => session.flush_cache()?,
    }
    let table = session.breakpoints()?;
    info!(steps = steps.len(), breakpoints = table.len(), "script replayed");
    Ok(table)
}
