use std::path::PathBuf;

use anyhow::{bail, Result};

pub const USAGE: &str = "usage: dbgsync [--config <path>] [--manual] [--log-stderr] <script>";

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cli {
    pub config: Option<PathBuf>,
    pub manual: bool,
    pub log_stderr: bool,
    pub script: PathBuf,
}

impl Cli {
    /// Parse arguments, excluding the program name.
    pub fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut config = None;
        let mut manual = false;
        let mut log_stderr = false;
        let mut script = None;

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => match args.next() {
                    Some(path) => config = Some(PathBuf::from(path)),
                    None => bail!("--config needs a path\n{USAGE}"),
                },
                "--manual" => manual = true,
                "--log-stderr" => log_stderr = true,
                flag if flag.starts_with("--") => bail!("unknown option {flag}\n{USAGE}"),
                _ if script.is_some() => bail!("more than one script given\n{USAGE}"),
                _ => script = Some(PathBuf::from(arg)),
            }
        }

        let Some(script) = script else {
            bail!("no script given\n{USAGE}");
        };
        Ok(Self {
            config,
            manual,
            log_stderr,
            script,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli> {
        Cli::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn script_only() {
        let cli = parse(&["session.gdb"]).unwrap();
        assert_eq!(cli.script, PathBuf::from("session.gdb"));
        assert!(cli.config.is_none());
        assert!(!cli.manual);
        assert!(!cli.log_stderr);
    }

    #[test]
    fn all_flags_in_any_order() {
        let cli = parse(&["--manual", "s.gdb", "--config", "c.toml", "--log-stderr"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("c.toml")));
        assert!(cli.manual);
        assert!(cli.log_stderr);
        assert_eq!(cli.script, PathBuf::from("s.gdb"));
    }

    #[test]
    fn missing_script_is_an_error() {
        let err = parse(&["--manual"]).unwrap_err();
        assert!(err.to_string().contains("no script given"));
    }

    #[test]
    fn config_without_path_is_an_error() {
        assert!(parse(&["s.gdb", "--config"]).is_err());
    }

    #[test]
    fn unknown_flag_is_an_error() {
        let err = parse(&["--verbose", "s.gdb"]).unwrap_err();
        assert!(err.to_string().contains("--verbose"));
    }

    #[test]
    fn second_script_is_an_error() {
        assert!(parse(&["a.gdb", "b.gdb"]).is_err());
    }
}
