//! Console command and linespec parsing for the simulated backend.
use std::sync::OnceLock;

use regex::Regex;

use crate::command::WatchMode;

/// Flavor of a code breakpoint command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakFlavor {
    /// `break`
    Normal,
    /// `tbreak`
    Temporary,
    /// `hbreak`
    Hardware,
}

/// A parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// `break`, `tbreak`, `hbreak`
    Break {
        /// Which command.
        flavor: BreakFlavor,
        /// Linespec text.
        location: String,
        /// Trailing `if <cond>`.
        condition: Option<String>,
    },
    /// `watch`, `rwatch`, `awatch`
    Watch {
        /// Access mode.
        mode: WatchMode,
        /// Watched expression.
        expression: String,
    },
    /// `delete [numbers]`; empty means all.
    Delete(Vec<u32>),
    /// `enable [numbers]`; empty means all.
    Enable(Vec<u32>),
    /// `disable [numbers]`; empty means all.
    Disable(Vec<u32>),
    /// `condition N [expr]`
    Condition {
        /// Breakpoint number.
        number: u32,
        /// New condition; `None` clears it.
        condition: Option<String>,
    },
    /// `ignore N count`
    Ignore {
        /// Breakpoint number.
        number: u32,
        /// Crossings to skip.
        count: u32,
    },
    /// `clear <linespec>`
    Clear(String),
    /// `set breakpoint pending on|off|auto`
    SetPending(bool),
    /// `continue`
    Continue,
    /// `source <file>`
    Source(String),
}

#[derive(Clone, Copy)]
enum Word {
    Break,
    Tbreak,
    Hbreak,
    Watch,
    Rwatch,
    Awatch,
    Delete,
    Enable,
    Disable,
    Condition,
    Ignore,
    Clear,
    Set,
    Continue,
    Source,
}

/// Command words with the shortest accepted abbreviation.
const COMMANDS: &[(&str, usize, Word)] = &[
    ("break", 1, Word::Break),
    ("tbreak", 2, Word::Tbreak),
    ("hbreak", 2, Word::Hbreak),
    ("watch", 2, Word::Watch),
    ("rwatch", 2, Word::Rwatch),
    ("awatch", 2, Word::Awatch),
    ("delete", 1, Word::Delete),
    ("enable", 2, Word::Enable),
    ("disable", 3, Word::Disable),
    ("condition", 4, Word::Condition),
    ("ignore", 2, Word::Ignore),
    ("clear", 2, Word::Clear),
    ("set", 3, Word::Set),
    ("continue", 1, Word::Continue),
    ("source", 2, Word::Source),
];

fn lookup(word: &str) -> Option<Word> {
    COMMANDS
        .iter()
        .find(|(name, min, _)| word.len() >= *min && name.starts_with(word))
        .map(|(_, _, w)| *w)
}

fn break_args_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<loc>\S+)(?:\s+if\s+(?P<cond>.+))?$").expect("break regex is valid")
    })
}

/// Parse one console line.
pub fn parse_console(text: &str) -> Result<ConsoleCommand, String> {
    let text = text.trim();
    let (word, args) = match text.split_once(char::is_whitespace) {
        Some((w, rest)) => (w, rest.trim()),
        None => (text, ""),
    };
    let Some(cmd) = lookup(word) else {
        return Err(format!("Undefined command: \"{word}\".  Try \"help\"."));
    };

    match cmd {
        Word::Break | Word::Tbreak | Word::Hbreak => {
            let flavor = match cmd {
                Word::Tbreak => BreakFlavor::Temporary,
                Word::Hbreak => BreakFlavor::Hardware,
                _ => BreakFlavor::Normal,
            };
            let caps = break_args_re()
                .captures(args)
                .ok_or_else(|| "No default breakpoint location now selected.".to_string())?;
            Ok(ConsoleCommand::Break {
                flavor,
                location: caps["loc"].to_string(),
                condition: caps.name("cond").map(|c| c.as_str().trim().to_string()),
            })
        }
        Word::Watch | Word::Rwatch | Word::Awatch => {
            if args.is_empty() {
                return Err("Argument required (expression to compute).".into());
            }
            let mode = match cmd {
                Word::Rwatch => WatchMode::Read,
                Word::Awatch => WatchMode::Access,
                _ => WatchMode::Write,
            };
            Ok(ConsoleCommand::Watch {
                mode,
                expression: args.to_string(),
            })
        }
        Word::Delete => Ok(ConsoleCommand::Delete(parse_numbers(args)?)),
        Word::Enable => Ok(ConsoleCommand::Enable(parse_numbers(args)?)),
        Word::Disable => Ok(ConsoleCommand::Disable(parse_numbers(args)?)),
        Word::Condition => {
            let (num, rest) = match args.split_once(char::is_whitespace) {
                Some((n, rest)) => (n, rest.trim()),
                None => (args, ""),
            };
            if num.is_empty() {
                return Err("Argument required (breakpoint number).".into());
            }
            let number = parse_number(num)?;
            Ok(ConsoleCommand::Condition {
                number,
                condition: (!rest.is_empty()).then(|| rest.to_string()),
            })
        }
        Word::Ignore => {
            let mut parts = args.split_whitespace();
            let number = parts
                .next()
                .ok_or_else(|| "Argument required (a breakpoint number).".to_string())
                .and_then(parse_number)?;
            let count = parts
                .next()
                .ok_or_else(|| "Second argument (specified ignore-count) is missing.".to_string())
                .and_then(parse_number)?;
            Ok(ConsoleCommand::Ignore { number, count })
        }
        Word::Clear => {
            if args.is_empty() {
                return Err("No source file specified.".into());
            }
            Ok(ConsoleCommand::Clear(args.to_string()))
        }
        Word::Set => {
            let parts: Vec<&str> = args.split_whitespace().collect();
            match parts.as_slice() {
                ["breakpoint", "pending", "on"] => Ok(ConsoleCommand::SetPending(true)),
                ["breakpoint", "pending", "off" | "auto"] => Ok(ConsoleCommand::SetPending(false)),
                _ => Err(format!("Undefined set command: \"{args}\".  Try \"help set\".")),
            }
        }
        Word::Continue => Ok(ConsoleCommand::Continue),
        Word::Source => {
            if args.is_empty() {
                return Err("source command requires file name of file to source.".into());
            }
            Ok(ConsoleCommand::Source(args.to_string()))
        }
    }
}

fn parse_number(s: &str) -> Result<u32, String> {
    s.parse()
        .map_err(|_| "Convenience variable must have integer value.\nArgs must be numbers or '$' variables.".to_string())
}

/// Parse `1 3-5 7` into individual numbers.
fn parse_numbers(args: &str) -> Result<Vec<u32>, String> {
    let mut out = Vec::new();
    for part in args.split_whitespace() {
        match part.split_once('-') {
            Some((lo, hi)) => {
                let (lo, hi) = (parse_number(lo)?, parse_number(hi)?);
                if hi < lo {
                    return Err(format!("inverted breakpoint range at '{part}'"));
                }
                out.extend(lo..=hi);
            }
            None => out.push(parse_number(part)?),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abbreviations_resolve() {
        assert!(matches!(
            parse_console("b main").unwrap(),
            ConsoleCommand::Break { flavor: BreakFlavor::Normal, .. }
        ));
        assert!(matches!(
            parse_console("tb main.c:3").unwrap(),
            ConsoleCommand::Break { flavor: BreakFlavor::Temporary, .. }
        ));
        assert_eq!(parse_console("d 2").unwrap(), ConsoleCommand::Delete(vec![2]));
        assert_eq!(parse_console("dis").unwrap(), ConsoleCommand::Disable(vec![]));
        assert_eq!(parse_console("en 1 3-4").unwrap(), ConsoleCommand::Enable(vec![1, 3, 4]));
        assert_eq!(parse_console("c").unwrap(), ConsoleCommand::Continue);
        assert!(parse_console("di 1").is_err());
    }

    #[test]
    fn break_with_condition() {
        assert_eq!(
            parse_console("break main.c:12 if counter > 2").unwrap(),
            ConsoleCommand::Break {
                flavor: BreakFlavor::Normal,
                location: "main.c:12".into(),
                condition: Some("counter > 2".into()),
            }
        );
    }

    #[test]
    fn watch_variants() {
        assert_eq!(
            parse_console("rwatch total").unwrap(),
            ConsoleCommand::Watch {
                mode: WatchMode::Read,
                expression: "total".into()
            }
        );
        assert_eq!(
            parse_console("awatch counter").unwrap(),
            ConsoleCommand::Watch {
                mode: WatchMode::Access,
                expression: "counter".into()
            }
        );
        assert!(parse_console("watch").is_err());
    }

    #[test]
    fn condition_and_ignore() {
        assert_eq!(
            parse_console("cond 3").unwrap(),
            ConsoleCommand::Condition {
                number: 3,
                condition: None
            }
        );
        assert_eq!(
            parse_console("condition 3 flag == 1").unwrap(),
            ConsoleCommand::Condition {
                number: 3,
                condition: Some("flag == 1".into())
            }
        );
        assert_eq!(
            parse_console("ignore 2 5").unwrap(),
            ConsoleCommand::Ignore { number: 2, count: 5 }
        );
        assert!(parse_console("ignore 2").is_err());
    }

    #[test]
    fn source_takes_a_file() {
        assert_eq!(
            parse_console("so /tmp/bps.gdb").unwrap(),
            ConsoleCommand::Source("/tmp/bps.gdb".into())
        );
        assert!(parse_console("source").is_err());
    }

    #[test]
    fn unknown_commands_report_backend_text() {
        assert_eq!(
            parse_console("frobnicate").unwrap_err(),
            "Undefined command: \"frobnicate\".  Try \"help\"."
        );
        assert!(parse_console("delete x").is_err());
    }
}
