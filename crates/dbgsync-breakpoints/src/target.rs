//! Backend ("target") breakpoints and the table binding them to platform
//! breakpoints.
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use dbgsync_mi::{parse_linespec, MiValue, ResultRecord};
use dbgsync_session::{SessionError, SessionResult};

use crate::attributes::{normalize_condition, BreakpointAttributes, BreakpointLocation};
use crate::model::PlatformId;

/// Mirror of one backend breakpoint as last reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetBreakpoint {
    /// Backend-assigned number.
    pub number: u32,
    /// Backend type string, e.g. `breakpoint` or `read watchpoint`.
    pub type_name: String,
    /// Accepted but not bound to code yet.
    pub pending: bool,
    /// Enabled flag.
    pub enabled: bool,
    /// Condition.
    pub condition: Option<String>,
    /// Remaining ignore count.
    pub ignore_count: u32,
    /// Hit count.
    pub hits: u32,
    /// Location exactly as the breakpoint was requested.
    pub original_location: String,
    /// Resolved source file.
    pub file: Option<String>,
    /// Resolved line.
    pub line: Option<u32>,
    /// Resolved function.
    pub function: Option<String>,
    /// Resolved address.
    pub address: Option<u64>,
    /// Watched expression.
    pub expression: Option<String>,
}

impl TargetBreakpoint {
    /// Decode a `bkpt` tuple.
    ///
    /// Returns `None` for entries that are not breakpoints or watchpoints
    /// (catchpoints, tracepoints, sub-locations) and for malformed tuples.
    pub fn from_mi(bkpt: &MiValue) -> Option<Self> {
        let number: u32 = bkpt.get_str("number")?.parse().ok()?;
        let type_name = bkpt.get_str("type")?.to_string();
        if !is_supported_type(&type_name) {
            tracing::debug!(number, type_name = %type_name, "ignoring non-breakpoint entry");
            return None;
        }
        let addr = bkpt.get_str("addr");
        let pending = bkpt.get("pending").is_some() || addr == Some("<PENDING>");
        let original_location = bkpt
            .get_str("original-location")
            .or_else(|| bkpt.get_str("pending"))
            .or_else(|| bkpt.get_str("what"))
            .unwrap_or_default()
            .to_string();

        Some(Self {
            number,
            type_name,
            pending,
            enabled: bkpt.get_str("enabled") != Some("n"),
            condition: bkpt
                .get_str("cond")
                .and_then(|c| normalize_condition(c.to_string())),
            ignore_count: parse_u32(bkpt.get_str("ignore")),
            hits: parse_u32(bkpt.get_str("times")),
            original_location,
            file: bkpt.get_str("file").map(str::to_string),
            line: bkpt.get_str("line").and_then(|l| l.parse().ok()),
            function: bkpt.get_str("func").map(str::to_string),
            address: addr.and_then(parse_address),
            expression: bkpt.get_str("what").map(str::to_string),
        })
    }

    /// Whether the breakpoint is bound to code (or is a watchpoint).
    pub fn installed(&self) -> bool {
        !self.pending
    }

    /// Whether this is a data watchpoint.
    pub fn is_watchpoint(&self) -> bool {
        self.type_name.contains("watchpoint")
    }

    /// The platform location this target denotes.
    ///
    /// Derived from the requested location rather than the resolved one, so
    /// `main` and `main.c:main` stay apart.
    pub fn location(&self) -> Option<BreakpointLocation> {
        if self.is_watchpoint() {
            let expression = self
                .expression
                .clone()
                .unwrap_or_else(|| self.original_location.clone());
            let (read, write) = match self.type_name.as_str() {
                "read watchpoint" => (true, false),
                "acc watchpoint" => (true, true),
                _ => (false, true),
            };
            return Some(BreakpointLocation::Watch {
                expression,
                read,
                write,
            });
        }
        match parse_linespec(&self.original_location) {
            Ok(spec) => BreakpointLocation::from_linespec(spec, self.file.as_deref()),
            Err(_) => self
                .address
                .map(|address| BreakpointLocation::Address { address }),
        }
    }

    /// Platform attributes mirroring this target.
    pub fn attributes(&self) -> Option<BreakpointAttributes> {
        Some(BreakpointAttributes {
            location: self.location()?,
            enabled: self.enabled,
            condition: self.condition.clone(),
            ignore_count: self.ignore_count,
        })
    }
}

fn is_supported_type(type_name: &str) -> bool {
    matches!(
        type_name,
        "breakpoint"
            | "hw breakpoint"
            | "watchpoint"
            | "hw watchpoint"
            | "read watchpoint"
            | "acc watchpoint"
    )
}

fn parse_u32(value: Option<&str>) -> u32 {
    value.and_then(|v| v.parse().ok()).unwrap_or(0)
}

fn parse_address(addr: &str) -> Option<u64> {
    u64::from_str_radix(addr.strip_prefix("0x")?, 16).ok()
}

/// Decode the reply to `-break-list`.
pub fn parse_table(record: &ResultRecord) -> SessionResult<Vec<TargetBreakpoint>> {
    let body = record
        .get("BreakpointTable")
        .and_then(|table| table.get("body"))
        .ok_or_else(|| SessionError::Protocol("-break-list reply without BreakpointTable body".into()))?;
    Ok(body.items().into_iter().filter_map(TargetBreakpoint::from_mi).collect())
}

#[derive(Debug, Default)]
struct Inner {
    mirrors: BTreeMap<u32, TargetBreakpoint>,
    owners: BTreeMap<u32, PlatformId>,
    in_flight: HashMap<u32, usize>,
    deleting: BTreeSet<u32>,
}

/// Which target breakpoints belong to which platform breakpoint, plus the
/// last known state of each target.
///
/// Shared by the manager and the synchronizer on the executor thread.
#[derive(Debug, Default)]
pub struct TargetTable {
    inner: RefCell<Inner>,
}

impl TargetTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `target` to `owner`, replacing any previous mirror.
    pub fn bind(&self, target: TargetBreakpoint, owner: PlatformId) {
        let mut inner = self.inner.borrow_mut();
        inner.owners.insert(target.number, owner);
        inner.mirrors.insert(target.number, target);
    }

    /// Forget `number`. Returns its former owner.
    pub fn unbind(&self, number: u32) -> Option<PlatformId> {
        let mut inner = self.inner.borrow_mut();
        inner.mirrors.remove(&number);
        inner.owners.remove(&number)
    }

    /// The platform breakpoint `number` belongs to.
    pub fn owner(&self, number: u32) -> Option<PlatformId> {
        self.inner.borrow().owners.get(&number).copied()
    }

    /// Last known state of `number`; `None` after a cache flush.
    pub fn mirror(&self, number: u32) -> Option<TargetBreakpoint> {
        self.inner.borrow().mirrors.get(&number).cloned()
    }

    /// Replace the mirror of an already bound target.
    pub fn set_mirror(&self, target: TargetBreakpoint) {
        let mut inner = self.inner.borrow_mut();
        if inner.owners.contains_key(&target.number) {
            inner.mirrors.insert(target.number, target);
        }
    }

    /// Edit the mirror of `number` in place, if there is one.
    pub fn update_mirror(&self, number: u32, f: impl FnOnce(&mut TargetBreakpoint)) {
        if let Some(mirror) = self.inner.borrow_mut().mirrors.get_mut(&number) {
            f(mirror);
        }
    }

    /// Targets bound to `owner`, in number order.
    pub fn targets_of(&self, owner: PlatformId) -> Vec<u32> {
        self.inner
            .borrow()
            .owners
            .iter()
            .filter(|(_, o)| **o == owner)
            .map(|(n, _)| *n)
            .collect()
    }

    /// How many targets bound to `owner` are installed.
    ///
    /// A target without a mirror counts as not installed.
    pub fn installed_count(&self, owner: PlatformId) -> u32 {
        let inner = self.inner.borrow();
        let count = inner
            .owners
            .iter()
            .filter(|(n, o)| {
                **o == owner && inner.mirrors.get(*n).is_some_and(TargetBreakpoint::installed)
            })
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Every bound target number.
    pub fn numbers(&self) -> Vec<u32> {
        self.inner.borrow().owners.keys().copied().collect()
    }

    /// Drop every mirror, keeping the bindings.
    pub fn clear_mirrors(&self) {
        self.inner.borrow_mut().mirrors.clear();
    }

    /// A structured operation on `number` was sent.
    pub fn begin_op(&self, number: u32) {
        *self.inner.borrow_mut().in_flight.entry(number).or_insert(0) += 1;
    }

    /// A structured operation on `number` completed.
    pub fn end_op(&self, number: u32) {
        let mut inner = self.inner.borrow_mut();
        if let Some(count) = inner.in_flight.get_mut(&number) {
            *count -= 1;
            if *count == 0 {
                inner.in_flight.remove(&number);
            }
        }
    }

    /// Whether a structured operation on `number` is still awaiting its reply.
    pub fn is_busy(&self, number: u32) -> bool {
        self.inner.borrow().in_flight.contains_key(&number)
    }

    /// Mark `number` as being deleted; list entries for it are ignored.
    pub fn mark_deleting(&self, number: u32) {
        self.inner.borrow_mut().deleting.insert(number);
    }

    /// The delete of `number` completed.
    pub fn finish_deleting(&self, number: u32) {
        self.inner.borrow_mut().deleting.remove(&number);
    }

    /// Whether `number` is being deleted.
    pub fn is_deleting(&self, number: u32) -> bool {
        self.inner.borrow().deleting.contains(&number)
    }
}
