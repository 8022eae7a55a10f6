//! Structured breakpoint API.
//!
//! Every operation is sent to the backend first; the model changes only once
//! the backend has confirmed, so the model never shows a breakpoint or an
//! attribute the backend does not have. Changes made here are tagged
//! [`ChangeOrigin::User`].
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::future::Future;
use std::rc::Rc;

use dbgsync_mi::command::{self, MiCommand};
use dbgsync_mi::{CommandControl, ResultRecord};
use dbgsync_session::{
    Completion, CountingRequestMonitor, RequestMonitor, SessionError, SessionId, SessionResult,
};

use crate::attributes::{normalize_condition, BreakpointAttributes, BreakpointKey, BreakpointLocation};
use crate::error::BreakpointError;
use crate::model::{BreakpointModel, ChangeOrigin, Origin, PlatformId};
use crate::target::{TargetBreakpoint, TargetTable};

/// One attribute pushed to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Push {
    Enabled(bool),
    Condition(Option<String>),
    IgnoreCount(u32),
}

impl Push {
    fn matches(&self, target: &TargetBreakpoint) -> bool {
        match self {
            Push::Enabled(enabled) => target.enabled == *enabled,
            Push::Condition(condition) => target.condition == *condition,
            Push::IgnoreCount(count) => target.ignore_count == *count,
        }
    }

    fn write(&self, target: &mut TargetBreakpoint) {
        match self {
            Push::Enabled(enabled) => target.enabled = *enabled,
            Push::Condition(condition) => target.condition = condition.clone(),
            Push::IgnoreCount(count) => target.ignore_count = *count,
        }
    }

    /// Commands applying this change to `stale`, each with the targets it covers.
    fn commands(&self, stale: &[u32]) -> Vec<(MiCommand, Vec<u32>)> {
        match self {
            Push::Enabled(true) => vec![(command::break_enable(stale), stale.to_vec())],
            Push::Enabled(false) => vec![(command::break_disable(stale), stale.to_vec())],
            Push::Condition(condition) => stale
                .iter()
                .map(|n| {
                    let text = condition.as_deref().unwrap_or_default();
                    (command::break_condition(*n, text), vec![*n])
                })
                .collect(),
            Push::IgnoreCount(count) => stale
                .iter()
                .map(|n| (command::break_after(*n, *count), vec![*n]))
                .collect(),
        }
    }
}

struct Shared {
    session: SessionId,
    control: Rc<CommandControl>,
    model: Rc<BreakpointModel>,
    targets: Rc<TargetTable>,
    allow_pending: Cell<bool>,
    creating: RefCell<HashSet<BreakpointKey>>,
}

/// Turns structured requests into backend commands.
pub struct BreakpointManager {
    shared: Rc<Shared>,
}

impl BreakpointManager {
    /// Create a manager sharing `model` and `targets` with the synchronizer.
    pub fn new(
        session: SessionId,
        control: Rc<CommandControl>,
        model: Rc<BreakpointModel>,
        targets: Rc<TargetTable>,
    ) -> Self {
        Self {
            shared: Rc::new(Shared {
                session,
                control,
                model,
                targets,
                allow_pending: Cell::new(true),
                creating: RefCell::new(HashSet::new()),
            }),
        }
    }

    /// Whether inserts ask the backend to keep unresolvable locations pending.
    pub fn set_allow_pending(&self, allow: bool) {
        self.shared.allow_pending.set(allow);
    }

    /// Create a user breakpoint.
    ///
    /// A key already owned by a user breakpoint (or by a create still waiting
    /// for its reply) fails with [`BreakpointError::Duplicate`]. A key owned by
    /// a discovered breakpoint is inserted again and the existing breakpoint
    /// is promoted. A backend rejection creates nothing and carries the
    /// backend's text.
    pub fn create(
        &self,
        attributes: BreakpointAttributes,
    ) -> impl Future<Output = Result<PlatformId, BreakpointError>> + 'static {
        let started = self.shared.start_create(attributes);
        async move { Ok::<_, BreakpointError>(started?.await?) }
    }

    /// Delete a breakpoint and every target bound to it.
    ///
    /// The breakpoint leaves the model immediately; the returned future
    /// resolves once the backend has acknowledged every delete.
    pub fn delete(&self, id: PlatformId) -> impl Future<Output = Result<(), BreakpointError>> + 'static {
        let started = self.shared.start_delete(id);
        async move { Ok::<_, BreakpointError>(started?.await?) }
    }

    /// Enable or disable a breakpoint.
    pub fn set_enabled(
        &self,
        id: PlatformId,
        enabled: bool,
    ) -> impl Future<Output = Result<(), BreakpointError>> + 'static {
        self.start_push(id, Push::Enabled(enabled))
    }

    /// Set the condition; an empty string clears it.
    pub fn set_condition(
        &self,
        id: PlatformId,
        condition: &str,
    ) -> impl Future<Output = Result<(), BreakpointError>> + 'static {
        self.start_push(id, Push::Condition(normalize_condition(condition.to_string())))
    }

    /// Set the ignore count.
    pub fn set_ignore_count(
        &self,
        id: PlatformId,
        count: u32,
    ) -> impl Future<Output = Result<(), BreakpointError>> + 'static {
        self.start_push(id, Push::IgnoreCount(count))
    }

    fn start_push(
        &self,
        id: PlatformId,
        change: Push,
    ) -> impl Future<Output = Result<(), BreakpointError>> + 'static {
        let started = match self.shared.model.get(id) {
            Some(_) => {
                let (rm, completion) = RequestMonitor::channel();
                Shared::push(&self.shared, id, change, rm);
                Ok(completion)
            }
            None => Err(BreakpointError::NotFound(id)),
        };
        async move { Ok::<_, BreakpointError>(started?.await?) }
    }
}

impl std::fmt::Debug for BreakpointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakpointManager")
            .field("session", &self.shared.session)
            .field("allow_pending", &self.shared.allow_pending.get())
            .field("creating", &self.shared.creating.borrow().len())
            .finish()
    }
}

impl Shared {
    fn start_create(
        self: &Rc<Self>,
        attributes: BreakpointAttributes,
    ) -> Result<Completion<PlatformId>, BreakpointError> {
        attributes.validate().map_err(BreakpointError::Invalid)?;
        let key = attributes.key();
        if let Some(existing) = self.model.find(&key) {
            if self
                .model
                .get(existing)
                .is_some_and(|bp| bp.origin == Origin::User)
            {
                return Err(BreakpointError::Duplicate {
                    key,
                    existing: Some(existing),
                });
            }
        }

        let command = match &attributes.location {
            BreakpointLocation::Watch { expression, .. } => {
                let mode = attributes
                    .location
                    .watch_mode()
                    .ok_or_else(|| BreakpointError::Invalid("watch without mode".into()))?;
                command::break_watch(expression, mode)
            }
            _ => {
                let args = attributes
                    .insert_args(self.allow_pending.get())
                    .ok_or_else(|| BreakpointError::Invalid(format!("cannot insert {key}")))?;
                command::break_insert(&args)
            }
        };
        if !self.creating.borrow_mut().insert(key.clone()) {
            return Err(BreakpointError::Duplicate {
                key,
                existing: None,
            });
        }

        tracing::debug!(session = %self.session, %key, "creating breakpoint");
        let (rm, completion) = RequestMonitor::channel();
        let shared = Rc::clone(self);
        self.control.queue_command(
            command,
            RequestMonitor::immediate(move |result: SessionResult<ResultRecord>| {
                shared.creating.borrow_mut().remove(&key);
                let registered = result
                    .and_then(|record| inserted_target(&record, &attributes))
                    .and_then(|target| shared.register(&attributes, target));
                match registered {
                    Ok(id) => Shared::finish_create(&shared, id, &attributes, rm),
                    Err(err) => {
                        tracing::debug!(session = %shared.session, %key, "create failed: {err}");
                        rm.fail(err);
                    }
                }
            }),
        );
        Ok(completion)
    }

    /// Record a confirmed insert in the model and bind its target.
    fn register(&self, requested: &BreakpointAttributes, target: TargetBreakpoint) -> SessionResult<PlatformId> {
        let confirmed = BreakpointAttributes {
            location: requested.location.clone(),
            enabled: target.enabled,
            condition: target.condition.clone(),
            ignore_count: target.ignore_count,
        };
        let number = target.number;
        let id = match self.model.find(&confirmed.key()) {
            Some(id) => {
                self.targets.bind(target, id);
                self.model.promote(id).map_err(to_session)?;
                self.model
                    .sync_attributes(id, &confirmed, ChangeOrigin::User)
                    .map_err(to_session)?;
                self.model
                    .set_install_count(id, self.targets.installed_count(id), ChangeOrigin::User)
                    .map_err(to_session)?;
                id
            }
            None => {
                let installed = u32::from(target.installed());
                let id = self
                    .model
                    .add(confirmed, Origin::User, installed, ChangeOrigin::User)
                    .map_err(to_session)?;
                self.targets.bind(target, id);
                id
            }
        };
        tracing::debug!(session = %self.session, %id, number, "breakpoint created");
        Ok(id)
    }

    /// Bring every target of a new breakpoint in line with the request.
    ///
    /// `-break-watch` takes no options, and a promoted breakpoint keeps the
    /// console targets it already had, so follow-ups go to whichever targets
    /// differ. The breakpoint exists either way: follow-up failures are
    /// logged and the create still succeeds.
    fn finish_create(
        self: &Rc<Self>,
        id: PlatformId,
        requested: &BreakpointAttributes,
        rm: RequestMonitor<PlatformId>,
    ) {
        let follow_ups = [
            Push::Enabled(requested.enabled),
            Push::Condition(requested.condition.clone()),
            Push::IgnoreCount(requested.ignore_count),
        ];
        let session = self.session;
        let counting = CountingRequestMonitor::new(
            follow_ups.len(),
            RequestMonitor::immediate(move |result: SessionResult<()>| {
                if let Err(err) = result {
                    tracing::warn!(%session, %id, "breakpoint created but not fully configured: {err}");
                }
                rm.done(id);
            }),
        );
        for change in follow_ups {
            Shared::push(self, id, change, counting.child());
        }
    }

    /// Send `change` to every target of `id` whose mirror differs, then
    /// apply it to the model.
    fn push(self: &Rc<Self>, id: PlatformId, change: Push, rm: RequestMonitor<()>) {
        let batch = stale_batch(&self.targets, &change, &self.targets.targets_of(id));
        let shared = Rc::clone(self);
        let parent = RequestMonitor::immediate(move |result: SessionResult<()>| {
            rm.complete(result.and_then(|()| shared.apply(id, &change)));
        });
        send_batch(&self.control, &self.targets, batch, parent);
    }

    fn apply(&self, id: PlatformId, change: &Push) -> SessionResult<()> {
        let result = match change {
            Push::Enabled(enabled) => self.model.set_enabled(id, *enabled, ChangeOrigin::User),
            Push::Condition(condition) => {
                self.model
                    .set_condition(id, condition.clone(), ChangeOrigin::User)
            }
            Push::IgnoreCount(count) => self.model.set_ignore_count(id, *count, ChangeOrigin::User),
        };
        match result {
            Ok(_) => Ok(()),
            // Deleted while the change was in flight.
            Err(BreakpointError::NotFound(_)) => Ok(()),
            Err(err) => Err(to_session(err)),
        }
    }

    fn start_delete(self: &Rc<Self>, id: PlatformId) -> Result<Completion<()>, BreakpointError> {
        if self.model.get(id).is_none() {
            return Err(BreakpointError::NotFound(id));
        }
        let numbers = self.targets.targets_of(id);
        for n in &numbers {
            self.targets.unbind(*n);
            self.targets.mark_deleting(*n);
        }
        self.model.remove(id, ChangeOrigin::User)?;
        tracing::debug!(session = %self.session, %id, targets = ?numbers, "deleting breakpoint");

        let (rm, completion) = RequestMonitor::channel();
        let counting = CountingRequestMonitor::new(numbers.len(), rm);
        for n in numbers {
            let child = counting.child::<()>();
            let shared = Rc::clone(self);
            self.control.queue_command(
                command::break_delete(&[n]),
                RequestMonitor::immediate(move |result: SessionResult<ResultRecord>| {
                    shared.targets.finish_deleting(n);
                    child.complete(match result {
                        Ok(_) => Ok(()),
                        // Already gone, e.g. deleted from the console meanwhile.
                        Err(SessionError::BackendRejected { message })
                            if message.starts_with("No breakpoint number") =>
                        {
                            Ok(())
                        }
                        Err(err) => Err(err),
                    });
                }),
            );
        }
        Ok(completion)
    }
}

/// Commands for one attribute, each with the targets it covers.
type Batch = Vec<(Push, MiCommand, Vec<u32>)>;

/// Commands applying `change` to those of `numbers` whose mirror differs.
fn stale_batch(targets: &TargetTable, change: &Push, numbers: &[u32]) -> Batch {
    let stale: Vec<u32> = numbers
        .iter()
        .copied()
        .filter(|n| targets.mirror(*n).map_or(true, |mirror| !change.matches(&mirror)))
        .collect();
    if stale.is_empty() {
        return Vec::new();
    }
    change
        .commands(&stale)
        .into_iter()
        .map(|(command, covered)| (change.clone(), command, covered))
        .collect()
}

/// Queue `batch`. Covered targets stay busy until their reply, and their
/// mirrors take the new value on success. `done` gets the combined result.
fn send_batch(control: &CommandControl, targets: &Rc<TargetTable>, batch: Batch, done: RequestMonitor<()>) {
    let counting = CountingRequestMonitor::new(batch.len(), done);
    for (change, command, numbers) in batch {
        for n in &numbers {
            targets.begin_op(*n);
        }
        let child = counting.child::<()>();
        let targets = Rc::clone(targets);
        control.queue_command(
            command,
            RequestMonitor::immediate(move |result: SessionResult<ResultRecord>| {
                for n in &numbers {
                    if result.is_ok() {
                        targets.update_mirror(*n, |mirror| change.write(mirror));
                    }
                    targets.end_op(*n);
                }
                child.complete(result.map(|_| ()));
            }),
        );
    }
}

/// Push a breakpoint's attributes to targets that disagree with it.
///
/// Each group pairs a platform breakpoint's attributes with the targets to
/// bring in line. The model is not touched.
pub(crate) fn align_targets(
    control: &CommandControl,
    targets: &Rc<TargetTable>,
    groups: &[(BreakpointAttributes, Vec<u32>)],
    done: RequestMonitor<()>,
) {
    let batch = groups
        .iter()
        .flat_map(|(attributes, numbers)| {
            [
                Push::Enabled(attributes.enabled),
                Push::Condition(attributes.condition.clone()),
                Push::IgnoreCount(attributes.ignore_count),
            ]
            .into_iter()
            .flat_map(|change| stale_batch(targets, &change, numbers))
            .collect::<Batch>()
        })
        .collect();
    send_batch(control, targets, batch, done);
}

/// Decode the target created by a `-break-insert` or `-break-watch` reply.
fn inserted_target(
    record: &ResultRecord,
    requested: &BreakpointAttributes,
) -> SessionResult<TargetBreakpoint> {
    if let Some(bkpt) = record.get("bkpt") {
        return TargetBreakpoint::from_mi(bkpt)
            .ok_or_else(|| SessionError::Protocol(format!("unusable bkpt in insert reply: {bkpt}")));
    }
    let BreakpointLocation::Watch {
        expression, read, write,
    } = &requested.location
    else {
        return Err(SessionError::Protocol("-break-insert reply without bkpt".into()));
    };
    let (field, type_name) = match (read, write) {
        (true, true) => ("hw-awpt", "acc watchpoint"),
        (true, false) => ("hw-rwpt", "read watchpoint"),
        _ => ("wpt", "hw watchpoint"),
    };
    let wpt = record
        .get(field)
        .ok_or_else(|| SessionError::Protocol(format!("-break-watch reply without {field}")))?;
    let number = wpt
        .get_str("number")
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| SessionError::Protocol(format!("-break-watch reply without number: {wpt}")))?;
    let expression = wpt.get_str("exp").unwrap_or(expression).to_string();
    Ok(TargetBreakpoint {
        number,
        type_name: type_name.to_string(),
        pending: false,
        enabled: true,
        condition: None,
        ignore_count: 0,
        hits: 0,
        original_location: expression.clone(),
        file: None,
        line: None,
        function: None,
        address: None,
        expression: Some(expression),
    })
}

fn to_session(err: BreakpointError) -> SessionError {
    match err {
        BreakpointError::Session(err) => err,
        other => SessionError::InvariantViolation(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgsync_mi::{parse_record, Record};

    fn result(line: &str) -> ResultRecord {
        match parse_record(line).unwrap() {
            Record::Result(r) => r,
            other => panic!("unexpected {other:?}"),
        }
    }

    fn target(number: u32, enabled: bool) -> TargetBreakpoint {
        TargetBreakpoint {
            number,
            type_name: "breakpoint".into(),
            pending: false,
            enabled,
            condition: None,
            ignore_count: 0,
            hits: 0,
            original_location: "main".into(),
            file: None,
            line: None,
            function: None,
            address: None,
            expression: None,
        }
    }

    #[test]
    fn enable_batches_all_targets_in_one_command() {
        let commands = Push::Enabled(true).commands(&[2, 5]);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].0.to_string(), "-break-enable 2 5");
        assert_eq!(commands[0].1, vec![2, 5]);
    }

    #[test]
    fn condition_and_ignore_go_per_target() {
        let commands = Push::Condition(Some("x > 1".into())).commands(&[1, 3]);
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[1].0.operation(), "-break-condition");
        assert_eq!(commands[1].1, vec![3]);
        assert_eq!(Push::IgnoreCount(4).commands(&[7])[0].0.to_string(), "-break-after 7 4");
    }

    #[test]
    fn push_matches_only_differing_mirrors() {
        let mut t = target(1, false);
        assert!(!Push::Enabled(true).matches(&t));
        Push::Enabled(true).write(&mut t);
        assert!(Push::Enabled(true).matches(&t));
        assert!(Push::Condition(None).matches(&t));
    }

    #[test]
    fn watch_reply_builds_target() {
        let requested = BreakpointAttributes::watch("total", true, false);
        let t = inserted_target(&result(r#"4^done,hw-rwpt={number="3",exp="total"}"#), &requested).unwrap();
        assert_eq!(t.number, 3);
        assert_eq!(t.location(), Some(requested.location.clone()));
        assert!(t.installed());
    }

    #[test]
    fn insert_reply_without_bkpt_is_protocol_error() {
        let requested = BreakpointAttributes::line("main.c", 12);
        let err = inserted_target(&result("4^done"), &requested).unwrap_err();
        assert_eq!(err.kind(), dbgsync_session::ErrorKind::Protocol);
    }

    #[test]
    fn model_errors_become_invariant_violations() {
        assert_eq!(
            to_session(BreakpointError::NotFound(PlatformId(2))).kind(),
            dbgsync_session::ErrorKind::InvariantViolation
        );
        assert_eq!(
            to_session(BreakpointError::Session(SessionError::Cancelled)).kind(),
            dbgsync_session::ErrorKind::Cancelled
        );
    }
}
