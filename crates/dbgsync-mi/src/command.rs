//! Outgoing MI commands.
//!
//! A [`MiCommand`] is an operation plus options and parameters. The
//! correlator prefixes it with a token when writing it to the wire.
use std::fmt;

use crate::error::MiParseError;
use crate::output::c_string;

/// A GDB/MI command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiCommand {
    operation: String,
    options: Vec<String>,
    parameters: Vec<String>,
}

impl MiCommand {
    /// Start a command for `operation`, e.g. `-break-list`.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            options: Vec::new(),
            parameters: Vec::new(),
        }
    }

    /// Append an option such as `-f` or `-c`.
    pub fn option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    /// Append a parameter. Quoted on the wire when necessary.
    pub fn param(mut self, param: impl Into<String>) -> Self {
        self.parameters.push(param.into());
        self
    }

    /// The operation name.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Options in order.
    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// Parameters in order.
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    /// Text of a console command wrapped by [`console`], if this is one.
    pub fn console_text(&self) -> Option<&str> {
        if self.operation == "-interpreter-exec"
            && self.parameters.len() == 2
            && self.parameters[0] == "console"
        {
            Some(&self.parameters[1])
        } else {
            None
        }
    }

    /// Wire form with `token` prepended, without the trailing newline.
    pub fn encode(&self, token: u64) -> String {
        format!("{token}{self}")
    }

    /// Parse a command line as written by [`MiCommand::encode`].
    ///
    /// Every word after the operation lands in [`MiCommand::parameters`],
    /// options included; the receiver interprets them in order.
    pub fn parse(line: &str) -> Result<(Option<u64>, MiCommand), MiParseError> {
        let line = line.trim();
        let digits = line.bytes().take_while(u8::is_ascii_digit).count();
        let token = if digits > 0 {
            line[..digits].parse().ok()
        } else {
            None
        };
        let rest = &line[digits..];
        if !rest.starts_with('-') {
            return Err(MiParseError::InvalidCommand(line.to_string()));
        }

        let mut words = split_words(rest)?.into_iter();
        let operation = words
            .next()
            .ok_or_else(|| MiParseError::InvalidCommand(line.to_string()))?;
        let mut cmd = MiCommand::new(operation);
        cmd.parameters.extend(words);
        Ok((token, cmd))
    }
}

fn split_words(s: &str) -> Result<Vec<String>, MiParseError> {
    let mut words = Vec::new();
    let mut chars = s.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '"' {
            chars.next();
            let mut word = String::new();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some('n') => word.push('\n'),
                        Some('t') => word.push('\t'),
                        Some(other) => word.push(other),
                        None => return Err(MiParseError::InvalidCommand(s.to_string())),
                    },
                    Some(other) => word.push(other),
                    None => return Err(MiParseError::InvalidCommand(s.to_string())),
                }
            }
            words.push(word);
        } else {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                word.push(c);
                chars.next();
            }
            words.push(word);
        }
    }
    Ok(words)
}

fn needs_quoting(s: &str) -> bool {
    s.is_empty()
        || s.chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\\' || c.is_control())
}

impl fmt::Display for MiCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.operation)?;
        for opt in &self.options {
            write!(f, " {opt}")?;
        }
        let mut params = self.parameters.iter().peekable();
        if !self.options.is_empty()
            && params.peek().is_some_and(|p| p.starts_with('-'))
        {
            f.write_str(" --")?;
        }
        for p in params {
            if needs_quoting(p) {
                write!(f, " {}", c_string(p))?;
            } else {
                write!(f, " {p}")?;
            }
        }
        Ok(())
    }
}

/// Where a breakpoint should be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertLocation {
    /// `file:line`
    Line {
        /// Source file.
        file: String,
        /// One-based line.
        line: u32,
    },
    /// `[file:]function`
    Function {
        /// Optional source file restricting the lookup.
        file: Option<String>,
        /// Function name.
        function: String,
    },
    /// `*address`
    Address(String),
}

impl InsertLocation {
    /// The location in GDB linespec syntax.
    pub fn linespec(&self) -> String {
        match self {
            InsertLocation::Line { file, line } => format!("{file}:{line}"),
            InsertLocation::Function {
                file: Some(file),
                function,
            } => format!("{file}:{function}"),
            InsertLocation::Function {
                file: None,
                function,
            } => function.clone(),
            InsertLocation::Address(addr) => format!("*{addr}"),
        }
    }
}

/// Arguments for [`break_insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakInsert {
    /// Location.
    pub location: InsertLocation,
    /// `-t`
    pub temporary: bool,
    /// `-h`
    pub hardware: bool,
    /// `-f`: create pending if unresolved.
    pub allow_pending: bool,
    /// `-d`: create disabled.
    pub disabled: bool,
    /// `-c`
    pub condition: Option<String>,
    /// `-i`
    pub ignore_count: u32,
}

impl BreakInsert {
    /// Plain insert at `location`.
    pub fn at(location: InsertLocation) -> Self {
        Self {
            location,
            temporary: false,
            hardware: false,
            allow_pending: false,
            disabled: false,
            condition: None,
            ignore_count: 0,
        }
    }
}

/// Access mode of a watchpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WatchMode {
    /// Break on write (`watch`).
    Write,
    /// Break on read (`rwatch`, `-r`).
    Read,
    /// Break on either (`awatch`, `-a`).
    Access,
}

/// `-break-insert`
pub fn break_insert(args: &BreakInsert) -> MiCommand {
    let mut cmd = MiCommand::new("-break-insert");
    if args.temporary {
        cmd = cmd.option("-t");
    }
    if args.hardware {
        cmd = cmd.option("-h");
    }
    if args.allow_pending {
        cmd = cmd.option("-f");
    }
    if args.disabled {
        cmd = cmd.option("-d");
    }
    if let Some(cond) = &args.condition {
        cmd = cmd.option("-c").option(c_string(cond));
    }
    if args.ignore_count > 0 {
        cmd = cmd.option("-i").option(args.ignore_count.to_string());
    }
    cmd.param(args.location.linespec())
}

/// `-break-watch`
pub fn break_watch(expression: &str, mode: WatchMode) -> MiCommand {
    let cmd = MiCommand::new("-break-watch");
    let cmd = match mode {
        WatchMode::Write => cmd,
        WatchMode::Read => cmd.option("-r"),
        WatchMode::Access => cmd.option("-a"),
    };
    cmd.param(expression)
}

/// `-break-delete`
pub fn break_delete(numbers: &[u32]) -> MiCommand {
    numbers
        .iter()
        .fold(MiCommand::new("-break-delete"), |cmd, n| cmd.param(n.to_string()))
}

/// `-break-enable`
pub fn break_enable(numbers: &[u32]) -> MiCommand {
    numbers
        .iter()
        .fold(MiCommand::new("-break-enable"), |cmd, n| cmd.param(n.to_string()))
}

/// `-break-disable`
pub fn break_disable(numbers: &[u32]) -> MiCommand {
    numbers
        .iter()
        .fold(MiCommand::new("-break-disable"), |cmd, n| cmd.param(n.to_string()))
}

/// `-break-condition`; an empty condition clears it.
pub fn break_condition(number: u32, condition: &str) -> MiCommand {
    let cmd = MiCommand::new("-break-condition").param(number.to_string());
    if condition.is_empty() {
        cmd
    } else {
        cmd.param(condition)
    }
}

/// `-break-after`
pub fn break_after(number: u32, count: u32) -> MiCommand {
    MiCommand::new("-break-after")
        .param(number.to_string())
        .param(count.to_string())
}

/// `-break-list`
pub fn break_list() -> MiCommand {
    MiCommand::new("-break-list")
}

/// `-exec-continue`
pub fn exec_continue() -> MiCommand {
    MiCommand::new("-exec-continue")
}

/// `-exec-interrupt`
pub fn exec_interrupt() -> MiCommand {
    MiCommand::new("-exec-interrupt")
}

/// `-list-features`
pub fn list_features() -> MiCommand {
    MiCommand::new("-list-features")
}

/// `-gdb-exit`
pub fn gdb_exit() -> MiCommand {
    MiCommand::new("-gdb-exit")
}

/// `-interpreter-exec console "<text>"`
pub fn console(text: &str) -> MiCommand {
    MiCommand::new("-interpreter-exec")
        .param("console")
        .param(text)
}
