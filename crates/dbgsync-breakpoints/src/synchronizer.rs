//! Breakpoint synchronizer.
//!
//! Keeps the platform model in step with the backend's breakpoint list.
//! Backend notifications and breakpoint-affecting console commands are only
//! hints: each schedules a `-break-list`, and the list is reconciled against
//! the model. Manual mode skips the hints and reconciles only on request.
//! Both modes share [`reconcile`].
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::rc::{Rc, Weak};

use dbgsync_mi::command;
use dbgsync_mi::{CommandControl, ResultRecord};
use dbgsync_session::{Completion, RequestMonitor, SessionError, SessionId, SessionResult};

use crate::attributes::BreakpointAttributes;
use crate::console::affects_breakpoints;
use crate::manager::align_targets;
use crate::model::{BreakpointModel, ChangeOrigin, Origin, PlatformId};
use crate::target::{parse_table, TargetBreakpoint, TargetTable};

/// What drives reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Notifications and console commands schedule a refresh.
    #[default]
    Events,
    /// Only explicit refreshes and cache flushes.
    Manual,
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciled {
    /// New discovered platform breakpoints.
    pub discovered: usize,
    /// Unknown targets merged into an existing platform breakpoint.
    pub merged: usize,
    /// Targets no longer listed.
    pub unbound: usize,
    /// Discovered platform breakpoints removed with their last target.
    pub removed: usize,
    /// Platform breakpoints whose attributes were taken from their targets.
    pub copied: usize,
    /// Targets that disagree with their platform breakpoint, in number order.
    pub misaligned: Vec<u32>,
}

/// Reconcile `listed` against the model.
///
/// Targets being deleted by the manager are ignored. For each of enabled,
/// condition and ignore count, a platform breakpoint takes the value of its
/// lowest-numbered bound target that differs from the model. Targets with a
/// structured operation awaiting a reply take no part, and targets merged in
/// this pass adopt the model's values instead of changing them. Whatever
/// still disagrees afterwards is reported in [`Reconciled::misaligned`]. The
/// rule only looks at the listed values, so a flushed cache reaches the
/// same model as an incremental refresh. All model changes are tagged
/// [`ChangeOrigin::Synchronizer`].
pub fn reconcile(
    model: &BreakpointModel,
    targets: &TargetTable,
    listed: Vec<TargetBreakpoint>,
) -> Reconciled {
    let mut summary = Reconciled::default();
    let mut listed: Vec<TargetBreakpoint> = listed
        .into_iter()
        .filter(|t| !targets.is_deleting(t.number))
        .collect();
    listed.sort_by_key(|t| t.number);
    let present: HashSet<u32> = listed.iter().map(|t| t.number).collect();
    let mut touched = BTreeSet::new();

    for number in targets.numbers() {
        if present.contains(&number) {
            continue;
        }
        if let Some(owner) = targets.unbind(number) {
            tracing::debug!(number, %owner, "target gone");
            touched.insert(owner);
            summary.unbound += 1;
        }
    }

    // Listed targets per owner; `true` marks a target merged in this pass.
    let mut bound: BTreeMap<PlatformId, Vec<(TargetBreakpoint, bool)>> = BTreeMap::new();
    for target in listed {
        let number = target.number;
        if let Some(owner) = targets.owner(number) {
            if targets.mirror(number).as_ref() != Some(&target) {
                touched.insert(owner);
            }
            targets.set_mirror(target.clone());
            bound.entry(owner).or_default().push((target, false));
            continue;
        }

        let Some(attributes) = target.attributes() else {
            tracing::debug!(number, location = %target.original_location, "no usable key, skipping");
            continue;
        };
        match model.find(&attributes.key()) {
            Some(owner) => {
                tracing::debug!(number, %owner, "merging target");
                targets.bind(target.clone(), owner);
                bound.entry(owner).or_default().push((target, true));
                touched.insert(owner);
                summary.merged += 1;
            }
            None => {
                let installed = u32::from(target.installed());
                match model.add(attributes, Origin::Discovered, installed, ChangeOrigin::Synchronizer) {
                    Ok(id) => {
                        targets.bind(target.clone(), id);
                        bound.entry(id).or_default().push((target, false));
                        summary.discovered += 1;
                    }
                    Err(err) => tracing::warn!(number, "discovery failed: {err}"),
                }
            }
        }
    }

    for (owner, listed) in &bound {
        let Some(bp) = model.get(*owner) else {
            continue;
        };
        let settled: Vec<&TargetBreakpoint> = listed
            .iter()
            .filter(|(t, merged)| !merged && !targets.is_busy(t.number))
            .map(|(t, _)| t)
            .collect();
        let derived = derive(&bp.attributes, &settled);
        match model.sync_attributes(*owner, &derived, ChangeOrigin::Synchronizer) {
            Ok(true) => summary.copied += 1,
            Ok(false) => {}
            Err(err) => tracing::warn!(%owner, "attribute copy failed: {err}"),
        }

        let Some(bp) = model.get(*owner) else {
            continue;
        };
        summary.misaligned.extend(
            listed
                .iter()
                .filter(|(t, _)| !targets.is_busy(t.number) && !agrees(&bp.attributes, t))
                .map(|(t, _)| t.number),
        );
    }
    summary.misaligned.sort_unstable();

    for id in touched {
        let Some(bp) = model.get(id) else {
            continue;
        };
        let result = if bp.origin == Origin::Discovered && targets.targets_of(id).is_empty() {
            summary.removed += 1;
            model.remove(id, ChangeOrigin::Synchronizer).map(|_| true)
        } else {
            model.set_install_count(id, targets.installed_count(id), ChangeOrigin::Synchronizer)
        };
        if let Err(err) = result {
            tracing::warn!(%id, "reconcile update failed: {err}");
        }
    }
    summary
}

/// `current` with each attribute replaced by the first differing value in
/// `listed`.
fn derive(current: &BreakpointAttributes, listed: &[&TargetBreakpoint]) -> BreakpointAttributes {
    let mut derived = current.clone();
    if let Some(t) = listed.iter().find(|t| t.enabled != current.enabled) {
        derived.enabled = t.enabled;
    }
    if let Some(t) = listed.iter().find(|t| t.condition != current.condition) {
        derived.condition = t.condition.clone();
    }
    if let Some(t) = listed.iter().find(|t| t.ignore_count != current.ignore_count) {
        derived.ignore_count = t.ignore_count;
    }
    derived
}

fn agrees(attributes: &BreakpointAttributes, target: &TargetBreakpoint) -> bool {
    target.enabled == attributes.enabled
        && target.condition == attributes.condition
        && target.ignore_count == attributes.ignore_count
}

/// Schedules `-break-list` refreshes and feeds them to [`reconcile`].
pub struct BreakpointSynchronizer {
    session: SessionId,
    control: Rc<CommandControl>,
    model: Rc<BreakpointModel>,
    targets: Rc<TargetTable>,
    weak_self: Weak<Self>,
    mode: Cell<SyncMode>,
    coalesce: bool,
    in_flight: Cell<usize>,
    dirty: Cell<bool>,
    waiting: RefCell<Vec<RequestMonitor<()>>>,
    refreshes: Cell<u64>,
}

impl BreakpointSynchronizer {
    /// Create a synchronizer. Call [`attach`](Self::attach) to start
    /// receiving hints.
    ///
    /// With `coalesce` set at most one refresh is in flight; hints arriving
    /// meanwhile collapse into a single follow-up.
    pub fn new(
        session: SessionId,
        control: Rc<CommandControl>,
        model: Rc<BreakpointModel>,
        targets: Rc<TargetTable>,
        mode: SyncMode,
        coalesce: bool,
    ) -> Rc<Self> {
        Rc::new_cyclic(|weak_self| Self {
            session,
            control,
            model,
            targets,
            weak_self: weak_self.clone(),
            mode: Cell::new(mode),
            coalesce,
            in_flight: Cell::new(0),
            dirty: Cell::new(false),
            waiting: RefCell::new(Vec::new()),
            refreshes: Cell::new(0),
        })
    }

    /// Listen for breakpoint notifications and completed console commands.
    pub fn attach(&self) {
        let weak = self.weak_self.clone();
        self.control.events().add_listener(move |event| {
            if event.is_breakpoint_change() {
                if let Some(sync) = weak.upgrade() {
                    sync.on_hint("notification");
                }
            }
            Ok(())
        });

        let weak = self.weak_self.clone();
        // Failed commands count too: `delete 1 99` deletes 1 before failing.
        self.control.add_command_listener(move |command, _result| {
            if command.console_text().is_some_and(affects_breakpoints) {
                if let Some(sync) = weak.upgrade() {
                    sync.on_hint("console");
                }
            }
        });
    }

    /// Current driving mode.
    pub fn mode(&self) -> SyncMode {
        self.mode.get()
    }

    /// Switch modes. Entering event mode refreshes once to catch up.
    pub fn set_mode(&self, mode: SyncMode) {
        let previous = self.mode.replace(mode);
        if previous != mode {
            tracing::debug!(session = %self.session, ?mode, "sync mode changed");
            if mode == SyncMode::Events {
                self.schedule_refresh();
            }
        }
    }

    /// Reconcile against a list requested after this call.
    pub fn refresh(&self) -> Completion<()> {
        let (rm, completion) = RequestMonitor::channel();
        self.waiting.borrow_mut().push(rm);
        self.schedule_refresh();
        completion
    }

    /// Forget every mirrored target state, then refresh.
    ///
    /// Every listed target is compared afresh against the model, which ends
    /// where incremental refreshes would have taken it.
    pub fn flush_cache(&self) -> Completion<()> {
        tracing::debug!(session = %self.session, "flushing target cache");
        self.targets.clear_mirrors();
        self.refresh()
    }

    /// No refresh is in flight, pending or waited for.
    pub fn is_idle(&self) -> bool {
        self.in_flight.get() == 0 && !self.dirty.get() && self.waiting.borrow().is_empty()
    }

    /// How many `-break-list` requests this synchronizer has sent.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.get()
    }

    fn on_hint(&self, source: &'static str) {
        match self.mode.get() {
            SyncMode::Events => self.schedule_refresh(),
            SyncMode::Manual => {
                tracing::trace!(session = %self.session, source, "hint ignored in manual mode");
            }
        }
    }

    fn schedule_refresh(&self) {
        if self.coalesce && self.in_flight.get() > 0 {
            self.dirty.set(true);
            return;
        }
        self.send_refresh();
    }

    fn send_refresh(&self) {
        self.dirty.set(false);
        let riders = std::mem::take(&mut *self.waiting.borrow_mut());
        self.in_flight.set(self.in_flight.get() + 1);
        self.refreshes.set(self.refreshes.get() + 1);
        let weak = self.weak_self.clone();
        self.control.queue_command(
            command::break_list(),
            RequestMonitor::immediate(move |result: SessionResult<ResultRecord>| {
                match weak.upgrade() {
                    Some(sync) => sync.on_list(result, riders),
                    None => drop(riders),
                }
            }),
        );
    }

    fn on_list(&self, result: SessionResult<ResultRecord>, riders: Vec<RequestMonitor<()>>) {
        self.in_flight.set(self.in_flight.get().saturating_sub(1));
        let outcome = result
            .and_then(|record| parse_table(&record))
            .map(|listed| reconcile(&self.model, &self.targets, listed));

        match outcome {
            Ok(summary) => {
                if summary != Reconciled::default() {
                    tracing::debug!(session = %self.session, ?summary, "reconciled");
                }
                let session = self.session;
                self.align(
                    &summary.misaligned,
                    RequestMonitor::immediate(move |result: SessionResult<()>| {
                        if let Err(err) = result {
                            tracing::warn!(%session, "could not align merged targets: {err}");
                        }
                        for rm in riders {
                            rm.done(());
                        }
                    }),
                );
                let again = self.dirty.get() || !self.waiting.borrow().is_empty();
                if again && (!self.coalesce || self.in_flight.get() == 0) {
                    self.send_refresh();
                }
            }
            Err(err) => {
                tracing::warn!(session = %self.session, "breakpoint refresh failed: {err}");
                // Do not retry; waiters learn about the failure instead.
                self.dirty.set(false);
                let waiting = std::mem::take(&mut *self.waiting.borrow_mut());
                for rm in riders.into_iter().chain(waiting) {
                    rm.fail(duplicate(&err));
                }
            }
        }
    }
}

impl BreakpointSynchronizer {
    /// Push each misaligned target's platform attributes to it. `done` runs
    /// once every command has been answered.
    fn align(&self, misaligned: &[u32], done: RequestMonitor<()>) {
        let mut groups: BTreeMap<PlatformId, Vec<u32>> = BTreeMap::new();
        for number in misaligned {
            if let Some(owner) = self.targets.owner(*number) {
                groups.entry(owner).or_default().push(*number);
            }
        }
        let groups: Vec<(BreakpointAttributes, Vec<u32>)> = groups
            .into_iter()
            .filter_map(|(owner, numbers)| {
                let bp = self.model.get(owner)?;
                tracing::debug!(session = %self.session, id = %owner, targets = ?numbers, "aligning targets");
                Some((bp.attributes, numbers))
            })
            .collect();
        align_targets(&self.control, &self.targets, &groups, done);
    }
}

impl std::fmt::Debug for BreakpointSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakpointSynchronizer")
            .field("session", &self.session)
            .field("mode", &self.mode.get())
            .field("in_flight", &self.in_flight.get())
            .field("dirty", &self.dirty.get())
            .finish()
    }
}

/// Copy of `err` for the second and later waiters of one refresh.
fn duplicate(err: &SessionError) -> SessionError {
    match err {
        SessionError::Protocol(msg) => SessionError::Protocol(msg.clone()),
        SessionError::BackendRejected { message } => SessionError::rejected(message.clone()),
        SessionError::Timeout { waited } => SessionError::Timeout { waited: *waited },
        SessionError::Cancelled => SessionError::Cancelled,
        SessionError::InvariantViolation(msg) => SessionError::InvariantViolation(msg.clone()),
        SessionError::Multiple(errors) => SessionError::Multiple(errors.iter().map(duplicate).collect()),
        SessionError::Io(e) => SessionError::Io(std::io::Error::new(e.kind(), e.to_string())),
    }
}
