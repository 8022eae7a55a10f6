//! GDB/MI output records.
//!
//! Decodes one line of backend output into a [`Record`], and renders records
//! back to wire text through [`std::fmt::Display`]. Grammar:
//!
//! ```text
//! record  := [token] ( "^" class | ("*" | "+" | "=") class ) ("," result)*
//!          | ("~" | "@" | "&") c-string
//!          | "(gdb)"
//! result  := name "=" value
//! value   := c-string | "{" [result ("," result)*] "}"
//!          | "[" [value ("," value)*] "]" | "[" result ("," result)* "]"
//! ```
use std::fmt;

use crate::error::MiParseError;

/// A named value inside a record, tuple or result list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiResult {
    /// The variable name.
    pub name: String,
    /// The value.
    pub value: MiValue,
}

impl MiResult {
    /// Build a result.
    pub fn new(name: impl Into<String>, value: MiValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Build a result holding a constant.
    pub fn constant(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, MiValue::Const(value.into()))
    }
}

/// An MI value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiValue {
    /// A C-string constant, unescaped.
    Const(String),
    /// `{name=value,...}`.
    Tuple(Vec<MiResult>),
    /// `[value,...]`.
    List(Vec<MiValue>),
    /// `[name=value,...]`, as used by `-break-list` bodies.
    ResultList(Vec<MiResult>),
}

impl MiValue {
    /// The constant text, if this is a constant.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MiValue::Const(s) => Some(s),
            _ => None,
        }
    }

    /// Look up a field of a tuple or result list.
    pub fn get(&self, name: &str) -> Option<&MiValue> {
        match self {
            MiValue::Tuple(results) | MiValue::ResultList(results) => find(results, name),
            _ => None,
        }
    }

    /// Shorthand for `get(name)?.as_str()`.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(MiValue::as_str)
    }

    /// The elements of a list or the values of a result list.
    pub fn items(&self) -> Vec<&MiValue> {
        match self {
            MiValue::List(values) => values.iter().collect(),
            MiValue::ResultList(results) => results.iter().map(|r| &r.value).collect(),
            _ => Vec::new(),
        }
    }
}

fn find<'a>(results: &'a [MiResult], name: &str) -> Option<&'a MiValue> {
    results.iter().find(|r| r.name == name).map(|r| &r.value)
}

/// Class of a result record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    /// `^done`
    Done,
    /// `^running`
    Running,
    /// `^connected`
    Connected,
    /// `^error`
    Error,
    /// `^exit`
    Exit,
}

impl ResultClass {
    fn as_str(self) -> &'static str {
        match self {
            ResultClass::Done => "done",
            ResultClass::Running => "running",
            ResultClass::Connected => "connected",
            ResultClass::Error => "error",
            ResultClass::Exit => "exit",
        }
    }

    fn parse(s: &str) -> Result<Self, MiParseError> {
        match s {
            "done" => Ok(ResultClass::Done),
            "running" => Ok(ResultClass::Running),
            "connected" => Ok(ResultClass::Connected),
            "error" => Ok(ResultClass::Error),
            "exit" => Ok(ResultClass::Exit),
            other => Err(MiParseError::UnknownResultClass(other.to_string())),
        }
    }
}

/// A reply to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    /// Token of the command this answers.
    pub token: Option<u64>,
    /// Result class.
    pub class: ResultClass,
    /// Payload.
    pub results: Vec<MiResult>,
}

impl ResultRecord {
    /// Build a record.
    pub fn new(token: Option<u64>, class: ResultClass, results: Vec<MiResult>) -> Self {
        Self {
            token,
            class,
            results,
        }
    }

    /// Look up a top-level field.
    pub fn get(&self, name: &str) -> Option<&MiValue> {
        find(&self.results, name)
    }

    /// The `msg` field of an `^error` record.
    pub fn error_message(&self) -> Option<&str> {
        self.get("msg").and_then(MiValue::as_str)
    }
}

/// Which async channel a record arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncKind {
    /// `*`: execution state changes.
    Exec,
    /// `+`: progress.
    Status,
    /// `=`: notifications.
    Notify,
}

impl AsyncKind {
    fn prefix(self) -> char {
        match self {
            AsyncKind::Exec => '*',
            AsyncKind::Status => '+',
            AsyncKind::Notify => '=',
        }
    }
}

/// An unsolicited async record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncRecord {
    /// Optional token.
    pub token: Option<u64>,
    /// Channel.
    pub kind: AsyncKind,
    /// Class, e.g. `stopped` or `breakpoint-created`.
    pub class: String,
    /// Payload.
    pub results: Vec<MiResult>,
}

impl AsyncRecord {
    /// Build a token-less record.
    pub fn new(kind: AsyncKind, class: impl Into<String>, results: Vec<MiResult>) -> Self {
        Self {
            token: None,
            kind,
            class: class.into(),
            results,
        }
    }

    /// Look up a top-level field.
    pub fn get(&self, name: &str) -> Option<&MiValue> {
        find(&self.results, name)
    }
}

/// Stream channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// `~`: console output.
    Console,
    /// `@`: target program output.
    Target,
    /// `&`: debugger log.
    Log,
}

/// Text output from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    /// Channel.
    pub kind: StreamKind,
    /// Unescaped text.
    pub text: String,
}

/// One line of backend output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// `^...`
    Result(ResultRecord),
    /// `*...`, `+...`, `=...`
    Async(AsyncRecord),
    /// `~...`, `@...`, `&...`
    Stream(StreamRecord),
    /// `(gdb)`
    Prompt,
}

/// Parse one line of backend output.
pub fn parse_record(line: &str) -> Result<Record, MiParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Err(MiParseError::Empty);
    }
    if line.trim() == "(gdb)" {
        return Ok(Record::Prompt);
    }
    Parser::new(line).record()
}

/// Render `s` as a quoted MI C-string.
pub fn c_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\{:03o}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Result<u8, MiParseError> {
        let b = self.peek().ok_or(MiParseError::UnexpectedEnd(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    fn expect(&mut self, want: u8) -> Result<(), MiParseError> {
        match self.peek() {
            Some(b) if b == want => {
                self.pos += 1;
                Ok(())
            }
            Some(b) => Err(self.unexpected(b)),
            None => Err(MiParseError::UnexpectedEnd(self.pos)),
        }
    }

    fn unexpected(&self, b: u8) -> MiParseError {
        MiParseError::Unexpected {
            found: b as char,
            column: self.pos,
        }
    }

    fn token(&mut self) -> Option<u64> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        if self.pos == start {
            return None;
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
    }

    fn record(&mut self) -> Result<Record, MiParseError> {
        let token = self.token();
        let prefix = self.bump()?;
        let record = match prefix {
            b'^' => {
                let class = ResultClass::parse(&self.word())?;
                let results = self.trailing_results()?;
                Record::Result(ResultRecord::new(token, class, results))
            }
            b'*' | b'+' | b'=' => {
                let kind = match prefix {
                    b'*' => AsyncKind::Exec,
                    b'+' => AsyncKind::Status,
                    _ => AsyncKind::Notify,
                };
                let class = self.word();
                if class.is_empty() {
                    return Err(match self.peek() {
                        Some(b) => self.unexpected(b),
                        None => MiParseError::UnexpectedEnd(self.pos),
                    });
                }
                let results = self.trailing_results()?;
                Record::Async(AsyncRecord {
                    token,
                    kind,
                    class,
                    results,
                })
            }
            b'~' | b'@' | b'&' => {
                let kind = match prefix {
                    b'~' => StreamKind::Console,
                    b'@' => StreamKind::Target,
                    _ => StreamKind::Log,
                };
                let text = self.c_string()?;
                self.end()?;
                Record::Stream(StreamRecord { kind, text })
            }
            other => {
                self.pos -= 1;
                return Err(self.unexpected(other));
            }
        };
        Ok(record)
    }

    fn word(&mut self) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned()
    }

    fn end(&self) -> Result<(), MiParseError> {
        match self.peek() {
            None => Ok(()),
            Some(b) => Err(self.unexpected(b)),
        }
    }

    fn trailing_results(&mut self) -> Result<Vec<MiResult>, MiParseError> {
        let mut results = Vec::new();
        while self.peek() == Some(b',') {
            self.pos += 1;
            results.push(self.result()?);
        }
        self.end()?;
        Ok(results)
    }

    fn result(&mut self) -> Result<MiResult, MiParseError> {
        let name = self.word();
        if name.is_empty() {
            return Err(match self.peek() {
                Some(b) => self.unexpected(b),
                None => MiParseError::UnexpectedEnd(self.pos),
            });
        }
        self.expect(b'=')?;
        let value = self.value()?;
        Ok(MiResult { name, value })
    }

    fn value(&mut self) -> Result<MiValue, MiParseError> {
        match self.peek() {
            Some(b'"') => Ok(MiValue::Const(self.c_string()?)),
            Some(b'{') => {
                self.pos += 1;
                let mut results = Vec::new();
                if self.peek() == Some(b'}') {
                    self.pos += 1;
                    return Ok(MiValue::Tuple(results));
                }
                loop {
                    results.push(self.result()?);
                    match self.bump()? {
                        b',' => continue,
                        b'}' => return Ok(MiValue::Tuple(results)),
                        other => {
                            self.pos -= 1;
                            return Err(self.unexpected(other));
                        }
                    }
                }
            }
            Some(b'[') => {
                self.pos += 1;
                if self.peek() == Some(b']') {
                    self.pos += 1;
                    return Ok(MiValue::List(Vec::new()));
                }
                if matches!(self.peek(), Some(b'"' | b'{' | b'[')) {
                    let mut values = Vec::new();
                    loop {
                        values.push(self.value()?);
                        match self.bump()? {
                            b',' => continue,
                            b']' => return Ok(MiValue::List(values)),
                            other => {
                                self.pos -= 1;
                                return Err(self.unexpected(other));
                            }
                        }
                    }
                }
                let mut results = Vec::new();
                loop {
                    results.push(self.result()?);
                    match self.bump()? {
                        b',' => continue,
                        b']' => return Ok(MiValue::ResultList(results)),
                        other => {
                            self.pos -= 1;
                            return Err(self.unexpected(other));
                        }
                    }
                }
            }
            Some(b) => Err(self.unexpected(b)),
            None => Err(MiParseError::UnexpectedEnd(self.pos)),
        }
    }

    fn c_string(&mut self) -> Result<String, MiParseError> {
        self.expect(b'"')?;
        let mut out = Vec::new();
        loop {
            match self.bump()? {
                b'"' => break,
                b'\\' => {
                    let at = self.pos;
                    match self.bump()? {
                        b'n' => out.push(b'\n'),
                        b't' => out.push(b'\t'),
                        b'r' => out.push(b'\r'),
                        b'"' => out.push(b'"'),
                        b'\\' => out.push(b'\\'),
                        d @ b'0'..=b'7' => {
                            let mut code = u32::from(d - b'0');
                            for _ in 0..2 {
                                match self.peek() {
                                    Some(n @ b'0'..=b'7') => {
                                        self.pos += 1;
                                        code = code * 8 + u32::from(n - b'0');
                                    }
                                    _ => break,
                                }
                            }
                            let byte = u8::try_from(code).map_err(|_| MiParseError::BadEscape(at))?;
                            out.push(byte);
                        }
                        _ => return Err(MiParseError::BadEscape(at)),
                    }
                }
                b => out.push(b),
            }
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

fn write_results(f: &mut fmt::Formatter<'_>, results: &[MiResult]) -> fmt::Result {
    for (i, r) in results.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{r}")?;
    }
    Ok(())
}

impl fmt::Display for MiResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

impl fmt::Display for MiValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MiValue::Const(s) => f.write_str(&c_string(s)),
            MiValue::Tuple(results) => {
                f.write_str("{")?;
                write_results(f, results)?;
                f.write_str("}")
            }
            MiValue::List(values) => {
                f.write_str("[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("]")
            }
            MiValue::ResultList(results) => {
                f.write_str("[")?;
                write_results(f, results)?;
                f.write_str("]")
            }
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::Result(r) => {
                if let Some(token) = r.token {
                    write!(f, "{token}")?;
                }
                write!(f, "^{}", r.class.as_str())?;
                for res in &r.results {
                    write!(f, ",{res}")?;
                }
                Ok(())
            }
            Record::Async(a) => {
                if let Some(token) = a.token {
                    write!(f, "{token}")?;
                }
                write!(f, "{}{}", a.kind.prefix(), a.class)?;
                for res in &a.results {
                    write!(f, ",{res}")?;
                }
                Ok(())
            }
            Record::Stream(s) => {
                let prefix = match s.kind {
                    StreamKind::Console => '~',
                    StreamKind::Target => '@',
                    StreamKind::Log => '&',
                };
                write!(f, "{prefix}{}", c_string(&s.text))
            }
            Record::Prompt => f.write_str("(gdb)"),
        }
    }
}
