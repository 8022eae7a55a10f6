mod cli;
mod script;

use std::env;
use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::error;
use tracing_subscriber::EnvFilter;

use dbgsync_breakpoints::{DebugSession, SessionOptions, SyncMode};
use dbgsync_config::logging::{
    default_log_file_path, ensure_log_dir, rotate_log_files, DEFAULT_MAX_LOG_FILES,
    DEFAULT_MAX_LOG_SIZE,
};
use dbgsync_config::paths::AppPaths;
use dbgsync_config::{load_config, load_file, Config, LogConfig, SyncModeSetting};
use dbgsync_mi::sim::Program;
use dbgsync_session::SessionId;

use cli::Cli;

fn session_options(config: &Config, manual: bool) -> SessionOptions {
    let sync_mode = match (manual, config.breakpoints.sync_mode) {
        (true, _) | (false, SyncModeSetting::Manual) => SyncMode::Manual,
        (false, SyncModeSetting::Events) => SyncMode::Events,
    };
    SessionOptions {
        executor_name: config.session.executor_name.clone(),
        query_timeout: config.session.query_timeout(),
        sync_mode,
        allow_pending: config.breakpoints.allow_pending,
        coalesce_refresh: config.breakpoints.coalesce_refresh,
    }
}

fn init_logging(log: &LogConfig, to_stderr: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log.level.as_filter()));

    if to_stderr {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(());
    }

    let path = log.file.clone().unwrap_or_else(default_log_file_path);
    ensure_log_dir(&path).with_context(|| format!("failed to create log dir for {}", path.display()))?;
    rotate_log_files(&path, DEFAULT_MAX_LOG_SIZE, DEFAULT_MAX_LOG_FILES)
        .with_context(|| format!("failed to rotate {}", path.display()))?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn load(cli: &Cli) -> Result<Config> {
    if let Some(path) = &cli.config {
        return load_file(path).with_context(|| format!("failed to load {}", path.display()));
    }
    let paths = AppPaths::new().context("failed to detect user directories")?;
    let project_dir = env::current_dir().ok();
    Ok(load_config(&paths.config_dir(), project_dir.as_deref()).unwrap_or_else(|e| {
        eprintln!("dbgsync: config load failed, using defaults: {e}");
        Config::default()
    }))
}

fn run(cli: Cli) -> Result<()> {
    let config = load(&cli)?;
    init_logging(&config.log, cli.log_stderr)?;

    let source = std::fs::read_to_string(&cli.script)
        .with_context(|| format!("failed to read script {}", cli.script.display()))?;
    let steps = script::parse(&source)?;

    let options = session_options(&config, cli.manual);
    let (session, _sim) = DebugSession::with_simulator(SessionId(1), Program::demo(), options)
        .context("failed to start debug session")?;

    let table = script::replay(&session, &steps);
    if let Err(e) = session.shutdown() {
        error!("session shutdown failed: {e}");
    }
    let table = table?;

    let json = serde_json::to_string_pretty(&table).context("failed to encode breakpoints")?;
    println!("{json}");
    Ok(())
}

fn main() {
    let cli = match Cli::parse(env::args().skip(1)) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("dbgsync: {e:#}");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(cli) {
        eprintln!("dbgsync: {e:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn manual_flag_overrides_config() {
        let config = Config::default();
        assert_eq!(session_options(&config, true).sync_mode, SyncMode::Manual);
        assert_eq!(session_options(&config, false).sync_mode, SyncMode::Events);
    }

    #[test]
    fn options_follow_config() {
        let mut config = Config::default();
        config.session.query_timeout_ms = 1500;
        config.session.executor_name = "replay".into();
        config.breakpoints.sync_mode = SyncModeSetting::Manual;
        config.breakpoints.allow_pending = false;

        let options = session_options(&config, false);
        assert_eq!(options.query_timeout, std::time::Duration::from_millis(1500));
        assert_eq!(options.executor_name, "replay");
        assert_eq!(options.sync_mode, SyncMode::Manual);
        assert!(!options.allow_pending);
        assert!(options.coalesce_refresh);
    }

    #[test]
    fn unset_log_file_falls_back_to_default() {
        let log = LogConfig::default();
        let path: PathBuf = log.file.clone().unwrap_or_else(default_log_file_path);
        assert!(path.ends_with("dbgsync.log"));
    }
}
