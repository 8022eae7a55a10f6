//! Breakpoint table and command handling of the simulated backend.
use std::collections::{BTreeMap, HashMap};

use crate::command::{MiCommand, WatchMode};
use crate::linespec::{parse_linespec, Linespec};
use crate::output::{
    AsyncKind, AsyncRecord, MiResult, MiValue, Record, ResultClass, ResultRecord, StreamKind,
    StreamRecord,
};

use super::console::{parse_console, BreakFlavor, ConsoleCommand};
use super::program::{format_address, Location, Program};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    Code { hardware: bool },
    Watch { mode: WatchMode, expression: String },
}

#[derive(Debug, Clone)]
struct SimBreakpoint {
    number: u32,
    kind: Kind,
    temporary: bool,
    enabled: bool,
    condition: Option<String>,
    ignore: u32,
    hits: u32,
    original_location: String,
    /// `None` while a code breakpoint is pending.
    resolved: Option<Location>,
}

impl SimBreakpoint {
    fn type_name(&self) -> &'static str {
        match &self.kind {
            Kind::Code { hardware: false } => "breakpoint",
            Kind::Code { hardware: true } => "hw breakpoint",
            Kind::Watch {
                mode: WatchMode::Write,
                ..
            } => "hw watchpoint",
            Kind::Watch {
                mode: WatchMode::Read,
                ..
            } => "read watchpoint",
            Kind::Watch {
                mode: WatchMode::Access,
                ..
            } => "acc watchpoint",
        }
    }

    fn is_pending(&self) -> bool {
        matches!(self.kind, Kind::Code { .. }) && self.resolved.is_none()
    }

    fn to_tuple(&self) -> MiValue {
        let mut fields = vec![
            MiResult::constant("number", self.number.to_string()),
            MiResult::constant("type", self.type_name()),
            MiResult::constant("disp", if self.temporary { "del" } else { "keep" }),
            MiResult::constant("enabled", if self.enabled { "y" } else { "n" }),
        ];
        match (&self.kind, &self.resolved) {
            (Kind::Watch { expression, .. }, _) => {
                fields.push(MiResult::constant("what", expression.clone()));
            }
            (Kind::Code { .. }, Some(loc)) => {
                fields.push(MiResult::constant("addr", format_address(loc.address)));
                if let Some(func) = &loc.function {
                    fields.push(MiResult::constant("func", func.clone()));
                }
                fields.push(MiResult::constant("file", loc.file.clone()));
                fields.push(MiResult::constant("fullname", loc.fullname.clone()));
                fields.push(MiResult::constant("line", loc.line.to_string()));
            }
            (Kind::Code { .. }, None) => {
                fields.push(MiResult::constant("addr", "<PENDING>"));
                fields.push(MiResult::constant("pending", self.original_location.clone()));
            }
        }
        if !self.is_pending() {
            fields.push(MiResult::new(
                "thread-groups",
                MiValue::List(vec![MiValue::Const("i1".into())]),
            ));
        }
        if let Some(cond) = &self.condition {
            fields.push(MiResult::constant("cond", cond.clone()));
        }
        fields.push(MiResult::constant("times", self.hits.to_string()));
        if self.ignore > 0 {
            fields.push(MiResult::constant("ignore", self.ignore.to_string()));
        }
        fields.push(MiResult::constant(
            "original-location",
            self.original_location.clone(),
        ));
        MiValue::Tuple(fields)
    }
}

/// Read-only view of a backend breakpoint, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointSnapshot {
    /// Backend number.
    pub number: u32,
    /// GDB type string, e.g. `breakpoint` or `read watchpoint`.
    pub kind: String,
    /// Enabled flag.
    pub enabled: bool,
    /// Condition.
    pub condition: Option<String>,
    /// Remaining ignore count.
    pub ignore: u32,
    /// Hit count.
    pub hits: u32,
    /// Whether the breakpoint is pending.
    pub pending: bool,
    /// Location as originally given.
    pub original_location: String,
}

/// Who asked for a change; console changes are announced with notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Mi,
    Console,
}

struct InsertRequest {
    spec: String,
    hardware: bool,
    temporary: bool,
    disabled: bool,
    allow_pending: bool,
    condition: Option<String>,
    ignore: u32,
}

/// Output produced for one input line.
#[derive(Debug, Default)]
pub(crate) struct Reply {
    pub lines: Vec<String>,
    pub exit: bool,
}

/// Complete backend state, guarded by the sim's mutex.
/// Nested `source` commands allowed before giving up.
const MAX_SOURCE_DEPTH: usize = 8;

pub(crate) struct SimState {
    program: Program,
    breakpoints: BTreeMap<u32, SimBreakpoint>,
    next_number: u32,
    notifications: bool,
    console_pending: bool,
    received: HashMap<String, usize>,
}

impl SimState {
    pub(crate) fn new(program: Program) -> Self {
        Self {
            program,
            breakpoints: BTreeMap::new(),
            next_number: 1,
            notifications: true,
            console_pending: false,
            received: HashMap::new(),
        }
    }

    pub(crate) fn set_notifications(&mut self, on: bool) {
        self.notifications = on;
    }

    pub(crate) fn set_console_pending(&mut self, on: bool) {
        self.console_pending = on;
    }

    pub(crate) fn received(&self, operation: &str) -> usize {
        self.received.get(operation).copied().unwrap_or(0)
    }

    pub(crate) fn snapshot(&self) -> Vec<BreakpointSnapshot> {
        self.breakpoints
            .values()
            .map(|bp| BreakpointSnapshot {
                number: bp.number,
                kind: bp.type_name().to_string(),
                enabled: bp.enabled,
                condition: bp.condition.clone(),
                ignore: bp.ignore,
                hits: bp.hits,
                pending: bp.is_pending(),
                original_location: bp.original_location.clone(),
            })
            .collect()
    }

    /// Handle one line written by the client.
    pub(crate) fn handle_line(&mut self, line: &str) -> Reply {
        let mut out = Vec::new();
        let (token, cmd) = match MiCommand::parse(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                out.push(error(None, &e.to_string()));
                return finish(out, false);
            }
        };
        *self
            .received
            .entry(cmd.operation().to_string())
            .or_insert(0) += 1;

        let exit = cmd.operation() == "-gdb-exit";
        self.handle_mi(token, &cmd, &mut out);
        finish(out, exit)
    }

    /// Run `text` as if typed on the backend's own console (no MI reply).
    pub(crate) fn cli(&mut self, text: &str) -> Reply {
        let mut out = Vec::new();
        if let Err(msg) = self.console(text, &mut out) {
            out.push(
                Record::Stream(StreamRecord {
                    kind: StreamKind::Log,
                    text: format!("{msg}\n"),
                })
                .to_string(),
            );
        }
        finish(out, false)
    }

    /// Add symbols and resolve pending breakpoints against them.
    pub(crate) fn load_symbols(&mut self, addition: Program) -> Reply {
        self.program.merge(addition);
        let mut out = Vec::new();
        let pending: Vec<u32> = self
            .breakpoints
            .values()
            .filter(|bp| bp.is_pending())
            .map(|bp| bp.number)
            .collect();
        for number in pending {
            let resolved = self
                .breakpoints
                .get(&number)
                .and_then(|bp| self.resolve(&bp.original_location).ok());
            if let (Some(loc), Some(bp)) = (resolved, self.breakpoints.get_mut(&number)) {
                bp.resolved = Some(loc);
                let tuple = bp.to_tuple();
                if self.notifications {
                    out.push(notify("breakpoint-modified", tuple));
                }
            }
        }
        finish(out, false)
    }

    fn handle_mi(&mut self, token: Option<u64>, cmd: &MiCommand, out: &mut Vec<String>) {
        let params = cmd.parameters();
        let result = match cmd.operation() {
            "-break-insert" => self.mi_break_insert(params),
            "-break-watch" => self.mi_break_watch(params),
            "-break-delete" => self
                .numbers(params)
                .and_then(|ns| self.delete(&ns, Origin::Mi, out))
                .map(|_| Vec::new()),
            "-break-enable" => self
                .numbers(params)
                .and_then(|ns| self.set_enabled(&ns, true, Origin::Mi, out))
                .map(|_| Vec::new()),
            "-break-disable" => self
                .numbers(params)
                .and_then(|ns| self.set_enabled(&ns, false, Origin::Mi, out))
                .map(|_| Vec::new()),
            "-break-condition" => self.mi_break_condition(params, out),
            "-break-after" => self.mi_break_after(params, out),
            "-break-list" => Ok(vec![self.breakpoint_table()]),
            "-exec-continue" => {
                out.push(
                    Record::Result(ResultRecord::new(token, ResultClass::Running, Vec::new()))
                        .to_string(),
                );
                self.resume(out);
                return;
            }
            "-exec-interrupt" => {
                out.push(done(token, Vec::new()));
                out.push(
                    Record::Async(AsyncRecord::new(
                        AsyncKind::Exec,
                        "stopped",
                        vec![
                            MiResult::constant("reason", "signal-received"),
                            MiResult::constant("signal-name", "SIGINT"),
                            MiResult::constant("thread-id", "1"),
                        ],
                    ))
                    .to_string(),
                );
                return;
            }
            "-list-features" => {
                let mut features = vec!["pending-breakpoints", "thread-info"];
                if self.notifications {
                    features.insert(0, "breakpoint-notifications");
                }
                Ok(vec![MiResult::new(
                    "features",
                    MiValue::List(
                        features
                            .into_iter()
                            .map(|f| MiValue::Const(f.to_string()))
                            .collect(),
                    ),
                )])
            }
            "-gdb-exit" => {
                out.push(Record::Result(ResultRecord::new(token, ResultClass::Exit, Vec::new())).to_string());
                return;
            }
            "-interpreter-exec" => match cmd.console_text() {
                Some(text) => self.console(text, out).map(|_| Vec::new()),
                None => Err("-interpreter-exec: Usage: -interpreter-exec interp command".into()),
            },
            other => Err(format!("Undefined MI command: {}", other.trim_start_matches('-'))),
        };
        match result {
            Ok(results) => out.push(done(token, results)),
            Err(msg) => out.push(error(token, &msg)),
        }
    }

    fn mi_break_insert(&mut self, params: &[String]) -> Result<Vec<MiResult>, String> {
        let mut req = InsertRequest {
            spec: String::new(),
            hardware: false,
            temporary: false,
            disabled: false,
            allow_pending: false,
            condition: None,
            ignore: 0,
        };
        let mut iter = params.iter();
        let mut location = None;
        while let Some(p) = iter.next() {
            match p.as_str() {
                "-t" => req.temporary = true,
                "-h" => req.hardware = true,
                "-f" => req.allow_pending = true,
                "-d" => req.disabled = true,
                "-c" => {
                    req.condition = Some(
                        iter.next()
                            .ok_or("-break-insert: Missing argument for -c")?
                            .clone(),
                    )
                }
                "-i" => {
                    req.ignore = iter
                        .next()
                        .and_then(|n| n.parse().ok())
                        .ok_or("-break-insert: Bad ignore count")?
                }
                "--" => {
                    location = iter.next().cloned();
                    break;
                }
                _ => {
                    location = Some(p.clone());
                    break;
                }
            }
        }
        req.spec = location.ok_or("-break-insert: Missing <location>")?;
        let number = self.insert(req)?;
        let tuple = self.tuple(number)?;
        Ok(vec![MiResult::new("bkpt", tuple)])
    }

    fn mi_break_watch(&mut self, params: &[String]) -> Result<Vec<MiResult>, String> {
        let mut mode = WatchMode::Write;
        let mut expression = None;
        for p in params {
            match p.as_str() {
                "-r" if expression.is_none() => mode = WatchMode::Read,
                "-a" if expression.is_none() => mode = WatchMode::Access,
                _ => {
                    expression = Some(match expression {
                        Some(prev) => format!("{prev} {p}"),
                        None => p.clone(),
                    })
                }
            }
        }
        let expression = expression.ok_or("-break-watch: Missing <expression>")?;
        let number = self.watch(mode, &expression)?;
        let name = match mode {
            WatchMode::Write => "wpt",
            WatchMode::Read => "hw-rwpt",
            WatchMode::Access => "hw-awpt",
        };
        Ok(vec![MiResult::new(
            name,
            MiValue::Tuple(vec![
                MiResult::constant("number", number.to_string()),
                MiResult::constant("exp", expression),
            ]),
        )])
    }

    fn mi_break_condition(
        &mut self,
        params: &[String],
        out: &mut Vec<String>,
    ) -> Result<Vec<MiResult>, String> {
        let (first, rest) = params
            .split_first()
            .ok_or("-break-condition: Missing the <number> argument")?;
        let number = parse_bp_number(first)?;
        let condition = (!rest.is_empty()).then(|| rest.join(" "));
        self.set_condition(number, condition, Origin::Mi, out)?;
        Ok(Vec::new())
    }

    fn mi_break_after(
        &mut self,
        params: &[String],
        out: &mut Vec<String>,
    ) -> Result<Vec<MiResult>, String> {
        let [number, count] = params else {
            return Err("-break-after: Usage: -break-after <number> <count>".into());
        };
        let number = parse_bp_number(number)?;
        let count = count
            .parse()
            .map_err(|_| format!("Invalid count \"{count}\"."))?;
        self.set_ignore(number, count, Origin::Mi, out)?;
        Ok(Vec::new())
    }

    fn console(&mut self, text: &str, out: &mut Vec<String>) -> Result<(), String> {
        self.console_at(text, 0, out)
    }

    fn console_at(&mut self, text: &str, depth: usize, out: &mut Vec<String>) -> Result<(), String> {
        match parse_console(text)? {
            ConsoleCommand::Break {
                flavor,
                location,
                condition,
            } => {
                let number = self.insert(InsertRequest {
                    spec: location,
                    hardware: flavor == BreakFlavor::Hardware,
                    temporary: flavor == BreakFlavor::Temporary,
                    disabled: false,
                    allow_pending: self.console_pending,
                    condition,
                    ignore: 0,
                })?;
                if let Some(bp) = self.breakpoints.get(&number) {
                    let label = match flavor {
                        BreakFlavor::Temporary => "Temporary breakpoint",
                        BreakFlavor::Hardware => "Hardware assisted breakpoint",
                        BreakFlavor::Normal => "Breakpoint",
                    };
                    let text = match &bp.resolved {
                        Some(loc) => format!(
                            "{label} {number} at {:#x}: file {}, line {}.\n",
                            loc.address, loc.file, loc.line
                        ),
                        None => format!("{label} {number} ({}) pending.\n", bp.original_location),
                    };
                    out.push(console_stream(text));
                }
                self.announce_created(number, out);
            }
            ConsoleCommand::Watch { mode, expression } => {
                let number = self.watch(mode, &expression)?;
                let label = match mode {
                    WatchMode::Write => "Hardware watchpoint",
                    WatchMode::Read => "Hardware read watchpoint",
                    WatchMode::Access => "Hardware access (read/write) watchpoint",
                };
                out.push(console_stream(format!("{label} {number}: {expression}\n")));
                self.announce_created(number, out);
            }
            ConsoleCommand::Delete(numbers) => {
                let numbers = self.all_if_empty(numbers);
                self.delete(&numbers, Origin::Console, out)?;
            }
            ConsoleCommand::Enable(numbers) => {
                let numbers = self.all_if_empty(numbers);
                self.set_enabled(&numbers, true, Origin::Console, out)?;
            }
            ConsoleCommand::Disable(numbers) => {
                let numbers = self.all_if_empty(numbers);
                self.set_enabled(&numbers, false, Origin::Console, out)?;
            }
            ConsoleCommand::Condition { number, condition } => {
                self.set_condition(number, condition, Origin::Console, out)?;
            }
            ConsoleCommand::Ignore { number, count } => {
                self.set_ignore(number, count, Origin::Console, out)?;
                out.push(console_stream(format!(
                    "Will ignore next {count} crossings of breakpoint {number}.\n"
                )));
            }
            ConsoleCommand::Clear(spec) => {
                let target = self.resolve(&spec)?;
                let numbers: Vec<u32> = self
                    .breakpoints
                    .values()
                    .filter(|bp| {
                        bp.resolved.as_ref().is_some_and(|loc| {
                            loc.file == target.file && loc.line == target.line
                        })
                    })
                    .map(|bp| bp.number)
                    .collect();
                if numbers.is_empty() {
                    return Err(format!("No breakpoint at {spec}."));
                }
                self.delete(&numbers, Origin::Console, out)?;
            }
            ConsoleCommand::SetPending(on) => self.console_pending = on,
            ConsoleCommand::Continue => self.resume(out),
            ConsoleCommand::Source(path) => self.source(&path, depth, out)?,
        }
        Ok(())
    }

    /// Run every command of a script file; the first failing line stops it.
    fn source(&mut self, path: &str, depth: usize, out: &mut Vec<String>) -> Result<(), String> {
        if depth >= MAX_SOURCE_DEPTH {
            return Err(format!("{path}: source nesting too deep."));
        }
        let script = std::fs::read_to_string(path)
            .map_err(|_| format!("{path}: No such file or directory."))?;
        for line in script.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.console_at(line, depth + 1, out)?;
        }
        Ok(())
    }

    fn all_if_empty(&self, numbers: Vec<u32>) -> Vec<u32> {
        if numbers.is_empty() {
            self.breakpoints.keys().copied().collect()
        } else {
            numbers
        }
    }

    fn numbers(&self, params: &[String]) -> Result<Vec<u32>, String> {
        params.iter().map(|p| parse_bp_number(p)).collect()
    }

    fn resolve(&self, spec: &str) -> Result<Location, String> {
        match parse_linespec(spec)? {
            Linespec::Line { file, line } => {
                let file = match file {
                    Some(file) => file,
                    None => self
                        .program
                        .default_file()
                        .ok_or("No symbol table is loaded.  Use the \"file\" command.")?
                        .to_string(),
                };
                self.program.resolve_line(&file, line)
            }
            Linespec::Function { file, name } => self.program.resolve_function(file.as_deref(), &name),
            Linespec::Address(address) => Ok(self.program.resolve_address(address).unwrap_or(Location {
                file: String::new(),
                fullname: String::new(),
                line: 0,
                function: None,
                address,
            })),
        }
    }

    fn insert(&mut self, req: InsertRequest) -> Result<u32, String> {
        let resolved = match self.resolve(&req.spec) {
            Ok(loc) => Some(loc),
            Err(_) if req.allow_pending => None,
            Err(msg) => return Err(msg),
        };
        let number = self.next_number;
        self.next_number += 1;
        self.breakpoints.insert(
            number,
            SimBreakpoint {
                number,
                kind: Kind::Code {
                    hardware: req.hardware,
                },
                temporary: req.temporary,
                enabled: !req.disabled,
                condition: req.condition,
                ignore: req.ignore,
                hits: 0,
                original_location: req.spec,
                resolved,
            },
        );
        Ok(number)
    }

    fn watch(&mut self, mode: WatchMode, expression: &str) -> Result<u32, String> {
        if !self.program.has_symbol(expression) {
            let ident: String = expression
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect();
            return Err(format!("No symbol \"{ident}\" in current context."));
        }
        let number = self.next_number;
        self.next_number += 1;
        self.breakpoints.insert(
            number,
            SimBreakpoint {
                number,
                kind: Kind::Watch {
                    mode,
                    expression: expression.to_string(),
                },
                temporary: false,
                enabled: true,
                condition: None,
                ignore: 0,
                hits: 0,
                original_location: expression.to_string(),
                resolved: None,
            },
        );
        Ok(number)
    }

    fn tuple(&self, number: u32) -> Result<MiValue, String> {
        self.breakpoints
            .get(&number)
            .map(SimBreakpoint::to_tuple)
            .ok_or_else(|| no_breakpoint(number))
    }

    fn announce_created(&self, number: u32, out: &mut Vec<String>) {
        if !self.notifications {
            return;
        }
        if let Some(bp) = self.breakpoints.get(&number) {
            out.push(notify("breakpoint-created", bp.to_tuple()));
        }
    }

    fn announce_modified(&self, number: u32, origin: Origin, out: &mut Vec<String>) {
        if origin == Origin::Mi || !self.notifications {
            return;
        }
        if let Some(bp) = self.breakpoints.get(&number) {
            out.push(notify("breakpoint-modified", bp.to_tuple()));
        }
    }

    fn check_exists(&self, numbers: &[u32]) -> Result<(), String> {
        match numbers.iter().find(|n| !self.breakpoints.contains_key(n)) {
            Some(n) => Err(no_breakpoint(*n)),
            None => Ok(()),
        }
    }

    fn delete(&mut self, numbers: &[u32], origin: Origin, out: &mut Vec<String>) -> Result<(), String> {
        self.check_exists(numbers)?;
        for n in numbers {
            if self.breakpoints.remove(n).is_some() && origin == Origin::Console && self.notifications {
                out.push(deleted_notification(*n));
            }
        }
        Ok(())
    }

    fn set_enabled(
        &mut self,
        numbers: &[u32],
        enabled: bool,
        origin: Origin,
        out: &mut Vec<String>,
    ) -> Result<(), String> {
        self.check_exists(numbers)?;
        for n in numbers {
            if let Some(bp) = self.breakpoints.get_mut(n) {
                bp.enabled = enabled;
            }
            self.announce_modified(*n, origin, out);
        }
        Ok(())
    }

    fn set_condition(
        &mut self,
        number: u32,
        condition: Option<String>,
        origin: Origin,
        out: &mut Vec<String>,
    ) -> Result<(), String> {
        if let Some(cond) = &condition {
            let ident: String = cond
                .trim_start_matches(['(', '!', '*'])
                .chars()
                .take_while(|c| c.is_ascii_alphabetic() || *c == '_')
                .collect();
            if !ident.is_empty() && !self.program.has_symbol(&ident) {
                return Err(format!("No symbol \"{ident}\" in current context."));
            }
        }
        let bp = self
            .breakpoints
            .get_mut(&number)
            .ok_or_else(|| no_breakpoint(number))?;
        bp.condition = condition;
        self.announce_modified(number, origin, out);
        Ok(())
    }

    fn set_ignore(
        &mut self,
        number: u32,
        count: u32,
        origin: Origin,
        out: &mut Vec<String>,
    ) -> Result<(), String> {
        let bp = self
            .breakpoints
            .get_mut(&number)
            .ok_or_else(|| no_breakpoint(number))?;
        bp.ignore = count;
        self.announce_modified(number, origin, out);
        Ok(())
    }

    /// Run until the first enabled, installed breakpoint whose ignore count is
    /// exhausted. Conditions are not evaluated.
    fn resume(&mut self, out: &mut Vec<String>) {
        out.push(
            Record::Async(AsyncRecord::new(
                AsyncKind::Exec,
                "running",
                vec![MiResult::constant("thread-id", "all")],
            ))
            .to_string(),
        );

        let candidates: Vec<u32> = self
            .breakpoints
            .values()
            .filter(|bp| bp.enabled && !bp.is_pending())
            .map(|bp| bp.number)
            .collect();
        for number in candidates {
            let Some(bp) = self.breakpoints.get_mut(&number) else {
                continue;
            };
            bp.hits += 1;
            let crossed = bp.ignore > 0;
            if crossed {
                bp.ignore -= 1;
            }
            let tuple = bp.to_tuple();
            let temporary = bp.temporary;
            let frame = bp.resolved.as_ref().map(frame_tuple);
            if self.notifications {
                out.push(notify("breakpoint-modified", tuple));
            }
            if crossed {
                continue;
            }

            let mut stopped = vec![
                MiResult::constant("reason", "breakpoint-hit"),
                MiResult::constant("disp", if temporary { "del" } else { "keep" }),
                MiResult::constant("bkptno", number.to_string()),
            ];
            if let Some(frame) = frame {
                stopped.push(MiResult::new("frame", frame));
            }
            stopped.push(MiResult::constant("thread-id", "1"));
            stopped.push(MiResult::constant("stopped-threads", "all"));
            out.push(Record::Async(AsyncRecord::new(AsyncKind::Exec, "stopped", stopped)).to_string());

            if temporary {
                self.breakpoints.remove(&number);
                if self.notifications {
                    out.push(deleted_notification(number));
                }
            }
            return;
        }

        out.push(
            Record::Async(AsyncRecord::new(
                AsyncKind::Exec,
                "stopped",
                vec![MiResult::constant("reason", "exited-normally")],
            ))
            .to_string(),
        );
    }

    fn breakpoint_table(&self) -> MiResult {
        let body = self
            .breakpoints
            .values()
            .map(|bp| MiResult::new("bkpt", bp.to_tuple()))
            .collect::<Vec<_>>();
        MiResult::new(
            "BreakpointTable",
            MiValue::Tuple(vec![
                MiResult::constant("nr_rows", body.len().to_string()),
                MiResult::constant("nr_cols", "6"),
                MiResult::new(
                    "body",
                    if body.is_empty() {
                        MiValue::List(Vec::new())
                    } else {
                        MiValue::ResultList(body)
                    },
                ),
            ]),
        )
    }
}

fn frame_tuple(loc: &Location) -> MiValue {
    let mut fields = vec![MiResult::constant("addr", format_address(loc.address))];
    if let Some(func) = &loc.function {
        fields.push(MiResult::constant("func", func.clone()));
    }
    fields.push(MiResult::constant("file", loc.file.clone()));
    fields.push(MiResult::constant("line", loc.line.to_string()));
    MiValue::Tuple(fields)
}

fn parse_bp_number(s: &str) -> Result<u32, String> {
    s.parse()
        .map_err(|_| format!("Bad breakpoint number '{s}'"))
}

fn no_breakpoint(number: u32) -> String {
    format!("No breakpoint number {number}.")
}

fn done(token: Option<u64>, results: Vec<MiResult>) -> String {
    Record::Result(ResultRecord::new(token, ResultClass::Done, results)).to_string()
}

fn error(token: Option<u64>, msg: &str) -> String {
    Record::Result(ResultRecord::new(
        token,
        ResultClass::Error,
        vec![MiResult::constant("msg", msg)],
    ))
    .to_string()
}

fn notify(class: &str, bkpt: MiValue) -> String {
    Record::Async(AsyncRecord::new(
        AsyncKind::Notify,
        class,
        vec![MiResult::new("bkpt", bkpt)],
    ))
    .to_string()
}

fn deleted_notification(number: u32) -> String {
    Record::Async(AsyncRecord::new(
        AsyncKind::Notify,
        "breakpoint-deleted",
        vec![MiResult::constant("id", number.to_string())],
    ))
    .to_string()
}

fn console_stream(text: String) -> String {
    Record::Stream(StreamRecord {
        kind: StreamKind::Console,
        text,
    })
    .to_string()
}

fn finish(mut lines: Vec<String>, exit: bool) -> Reply {
    lines.push(Record::Prompt.to_string());
    Reply { lines, exit }
}
