//! Structured ("platform") breakpoint model.
//!
//! Holds one [`PlatformBreakpoint`] per natural key and notifies listeners
//! of every change, tagged with who made it. Setters are idempotent: writing
//! the current value emits nothing.
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::attributes::{BreakpointAttributes, BreakpointKey};
use crate::error::BreakpointError;

/// Identifier of a platform breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PlatformId(pub u64);

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a platform breakpoint came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Created through the structured API. Survives losing all targets.
    User,
    /// Found in the backend list. Removed with its last target.
    Discovered,
}

/// Who made a model change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// A structured API call, already confirmed by the backend.
    User,
    /// Reconciliation against the backend list. Never pushed back.
    Synchronizer,
}

/// A breakpoint in the structured model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformBreakpoint {
    /// Identifier.
    pub id: PlatformId,
    /// Location, enablement, condition and ignore count.
    #[serde(flatten)]
    pub attributes: BreakpointAttributes,
    /// Number of installed target breakpoints.
    pub install_count: u32,
    /// Creation path.
    pub origin: Origin,
}

/// Which attribute an update touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeChange {
    /// `enabled`
    Enabled,
    /// `condition`
    Condition,
    /// `ignore_count`
    IgnoreCount,
    /// `install_count`
    InstallCount,
    /// `origin` (promotion to user)
    Origin,
}

/// Change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEvent {
    /// A breakpoint was added.
    Added {
        /// The new breakpoint.
        id: PlatformId,
        /// Who added it.
        origin: ChangeOrigin,
    },
    /// Attributes changed.
    Updated {
        /// The breakpoint.
        id: PlatformId,
        /// What changed.
        changes: Vec<AttributeChange>,
        /// Who changed it.
        origin: ChangeOrigin,
    },
    /// A breakpoint was removed.
    Removed {
        /// Its final state.
        breakpoint: PlatformBreakpoint,
        /// Who removed it.
        origin: ChangeOrigin,
    },
}

impl ModelEvent {
    /// The affected breakpoint.
    pub fn id(&self) -> PlatformId {
        match self {
            ModelEvent::Added { id, .. } | ModelEvent::Updated { id, .. } => *id,
            ModelEvent::Removed { breakpoint, .. } => breakpoint.id,
        }
    }

    /// Who made the change.
    pub fn origin(&self) -> ChangeOrigin {
        match self {
            ModelEvent::Added { origin, .. }
            | ModelEvent::Updated { origin, .. }
            | ModelEvent::Removed { origin, .. } => *origin,
        }
    }
}

/// Identifier returned by [`BreakpointModel::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelListenerId(u64);

type ModelListener = Rc<dyn Fn(&ModelEvent)>;

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    breakpoints: BTreeMap<PlatformId, PlatformBreakpoint>,
    by_key: HashMap<BreakpointKey, PlatformId>,
}

/// The platform breakpoint store.
#[derive(Default)]
pub struct BreakpointModel {
    inner: RefCell<Inner>,
    listeners: RefCell<Vec<(ModelListenerId, ModelListener)>>,
    next_listener: Cell<u64>,
}

impl BreakpointModel {
    /// An empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a breakpoint. Fails with [`BreakpointError::Duplicate`] when its
    /// key is taken.
    pub fn add(
        &self,
        attributes: BreakpointAttributes,
        origin: Origin,
        install_count: u32,
        change: ChangeOrigin,
    ) -> Result<PlatformId, BreakpointError> {
        let id = {
            let mut inner = self.inner.borrow_mut();
            let key = attributes.key();
            if let Some(existing) = inner.by_key.get(&key) {
                return Err(BreakpointError::Duplicate {
                    key,
                    existing: Some(*existing),
                });
            }
            inner.next_id += 1;
            let id = PlatformId(inner.next_id);
            inner.by_key.insert(key, id);
            inner.breakpoints.insert(
                id,
                PlatformBreakpoint {
                    id,
                    attributes,
                    install_count,
                    origin,
                },
            );
            id
        };
        tracing::debug!(%id, ?origin, ?change, "breakpoint added");
        self.notify(&ModelEvent::Added { id, origin: change });
        Ok(id)
    }

    /// Remove a breakpoint, returning its final state.
    pub fn remove(
        &self,
        id: PlatformId,
        change: ChangeOrigin,
    ) -> Result<PlatformBreakpoint, BreakpointError> {
        let breakpoint = {
            let mut inner = self.inner.borrow_mut();
            let breakpoint = inner
                .breakpoints
                .remove(&id)
                .ok_or(BreakpointError::NotFound(id))?;
            inner.by_key.remove(&breakpoint.attributes.key());
            breakpoint
        };
        tracing::debug!(%id, ?change, "breakpoint removed");
        self.notify(&ModelEvent::Removed {
            breakpoint: breakpoint.clone(),
            origin: change,
        });
        Ok(breakpoint)
    }

    /// Snapshot of one breakpoint.
    pub fn get(&self, id: PlatformId) -> Option<PlatformBreakpoint> {
        self.inner.borrow().breakpoints.get(&id).cloned()
    }

    /// The breakpoint owning `key`.
    pub fn find(&self, key: &BreakpointKey) -> Option<PlatformId> {
        self.inner.borrow().by_key.get(key).copied()
    }

    /// Snapshot of every breakpoint, in id order.
    pub fn all(&self) -> Vec<PlatformBreakpoint> {
        self.inner.borrow().breakpoints.values().cloned().collect()
    }

    /// Number of breakpoints.
    pub fn len(&self) -> usize {
        self.inner.borrow().breakpoints.len()
    }

    /// Whether the model is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set `enabled`. Returns whether anything changed.
    pub fn set_enabled(
        &self,
        id: PlatformId,
        enabled: bool,
        change: ChangeOrigin,
    ) -> Result<bool, BreakpointError> {
        self.update(id, change, AttributeChange::Enabled, |bp| {
            std::mem::replace(&mut bp.attributes.enabled, enabled) != enabled
        })
    }

    /// Set or clear the condition.
    pub fn set_condition(
        &self,
        id: PlatformId,
        condition: Option<String>,
        change: ChangeOrigin,
    ) -> Result<bool, BreakpointError> {
        self.update(id, change, AttributeChange::Condition, |bp| {
            if bp.attributes.condition == condition {
                false
            } else {
                bp.attributes.condition = condition;
                true
            }
        })
    }

    /// Set the ignore count.
    pub fn set_ignore_count(
        &self,
        id: PlatformId,
        count: u32,
        change: ChangeOrigin,
    ) -> Result<bool, BreakpointError> {
        self.update(id, change, AttributeChange::IgnoreCount, |bp| {
            std::mem::replace(&mut bp.attributes.ignore_count, count) != count
        })
    }

    /// Set the install count.
    pub fn set_install_count(
        &self,
        id: PlatformId,
        count: u32,
        change: ChangeOrigin,
    ) -> Result<bool, BreakpointError> {
        self.update(id, change, AttributeChange::InstallCount, |bp| {
            std::mem::replace(&mut bp.install_count, count) != count
        })
    }

    /// Copy enablement, condition and ignore count from `source`, emitting a
    /// single update listing every attribute that changed.
    pub fn sync_attributes(
        &self,
        id: PlatformId,
        source: &BreakpointAttributes,
        change: ChangeOrigin,
    ) -> Result<bool, BreakpointError> {
        let changes = {
            let mut inner = self.inner.borrow_mut();
            let bp = inner
                .breakpoints
                .get_mut(&id)
                .ok_or(BreakpointError::NotFound(id))?;
            let attrs = &mut bp.attributes;
            let mut changes = Vec::new();
            if attrs.enabled != source.enabled {
                attrs.enabled = source.enabled;
                changes.push(AttributeChange::Enabled);
            }
            if attrs.condition != source.condition {
                attrs.condition = source.condition.clone();
                changes.push(AttributeChange::Condition);
            }
            if attrs.ignore_count != source.ignore_count {
                attrs.ignore_count = source.ignore_count;
                changes.push(AttributeChange::IgnoreCount);
            }
            changes
        };
        if changes.is_empty() {
            return Ok(false);
        }
        self.notify(&ModelEvent::Updated {
            id,
            changes,
            origin: change,
        });
        Ok(true)
    }

    /// Turn a discovered breakpoint into a user breakpoint.
    pub fn promote(&self, id: PlatformId) -> Result<bool, BreakpointError> {
        self.update(id, ChangeOrigin::User, AttributeChange::Origin, |bp| {
            std::mem::replace(&mut bp.origin, Origin::User) != Origin::User
        })
    }

    /// Register a listener; it runs synchronously after each change.
    pub fn add_listener(&self, listener: impl Fn(&ModelEvent) + 'static) -> ModelListenerId {
        let id = ModelListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);
        self.listeners.borrow_mut().push((id, Rc::new(listener)));
        id
    }

    /// Unregister a listener.
    pub fn remove_listener(&self, id: ModelListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    fn update(
        &self,
        id: PlatformId,
        change: ChangeOrigin,
        attribute: AttributeChange,
        f: impl FnOnce(&mut PlatformBreakpoint) -> bool,
    ) -> Result<bool, BreakpointError> {
        let changed = {
            let mut inner = self.inner.borrow_mut();
            let bp = inner
                .breakpoints
                .get_mut(&id)
                .ok_or(BreakpointError::NotFound(id))?;
            f(bp)
        };
        if changed {
            self.notify(&ModelEvent::Updated {
                id,
                changes: vec![attribute],
                origin: change,
            });
        }
        Ok(changed)
    }

    fn notify(&self, event: &ModelEvent) {
        let listeners: Vec<ModelListener> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, l)| Rc::clone(l))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

impl fmt::Debug for BreakpointModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakpointModel")
            .field("breakpoints", &self.len())
            .field("listeners", &self.listeners.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording(model: &BreakpointModel) -> Rc<RefCell<Vec<ModelEvent>>> {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        model.add_listener(move |e| sink.borrow_mut().push(e.clone()));
        events
    }

    #[test]
    fn add_rejects_duplicate_key() {
        let model = BreakpointModel::new();
        let id = model
            .add(BreakpointAttributes::line("main.c", 12), Origin::User, 1, ChangeOrigin::User)
            .unwrap();
        let err = model
            .add(
                BreakpointAttributes::line("main.c", 12).disabled(),
                Origin::User,
                0,
                ChangeOrigin::User,
            )
            .unwrap_err();
        assert!(matches!(err, BreakpointError::Duplicate { existing, .. } if existing == Some(id)));
        assert_eq!(model.len(), 1);
    }

    #[test]
    fn setters_are_idempotent() {
        let model = BreakpointModel::new();
        let events = recording(&model);
        let id = model
            .add(BreakpointAttributes::function(None, "main"), Origin::Discovered, 1, ChangeOrigin::Synchronizer)
            .unwrap();
        assert!(model.set_enabled(id, false, ChangeOrigin::Synchronizer).unwrap());
        assert!(!model.set_enabled(id, false, ChangeOrigin::Synchronizer).unwrap());
        assert!(model
            .set_condition(id, Some("flag".into()), ChangeOrigin::Synchronizer)
            .unwrap());
        assert!(!model
            .set_condition(id, Some("flag".into()), ChangeOrigin::Synchronizer)
            .unwrap());
        assert_eq!(events.borrow().len(), 3);
        assert!(events
            .borrow()
            .iter()
            .all(|e| e.origin() == ChangeOrigin::Synchronizer && e.id() == id));
    }

    #[test]
    fn remove_frees_key_and_reports_final_state() {
        let model = BreakpointModel::new();
        let events = recording(&model);
        let attrs = BreakpointAttributes::watch("total", false, true);
        let id = model
            .add(attrs.clone(), Origin::User, 1, ChangeOrigin::User)
            .unwrap();
        let removed = model.remove(id, ChangeOrigin::User).unwrap();
        assert_eq!(removed.install_count, 1);
        assert_eq!(model.find(&attrs.key()), None);
        assert!(matches!(
            events.borrow().last(),
            Some(ModelEvent::Removed { breakpoint, origin: ChangeOrigin::User }) if breakpoint.id == id
        ));
        assert!(matches!(
            model.remove(id, ChangeOrigin::User),
            Err(BreakpointError::NotFound(_))
        ));
    }

    #[test]
    fn sync_attributes_reports_all_changes_at_once() {
        let model = BreakpointModel::new();
        let id = model
            .add(BreakpointAttributes::line("main.c", 12), Origin::User, 1, ChangeOrigin::User)
            .unwrap();
        let events = recording(&model);
        let source = BreakpointAttributes::line("main.c", 12)
            .disabled()
            .with_condition("counter > 1");
        assert!(model.sync_attributes(id, &source, ChangeOrigin::Synchronizer).unwrap());
        assert!(!model.sync_attributes(id, &source, ChangeOrigin::Synchronizer).unwrap());
        assert_eq!(
            events.borrow().as_slice(),
            &[ModelEvent::Updated {
                id,
                changes: vec![AttributeChange::Enabled, AttributeChange::Condition],
                origin: ChangeOrigin::Synchronizer,
            }]
        );
    }

    #[test]
    fn promote_changes_origin_once() {
        let model = BreakpointModel::new();
        let id = model
            .add(BreakpointAttributes::address(0x400028), Origin::Discovered, 1, ChangeOrigin::Synchronizer)
            .unwrap();
        assert!(model.promote(id).unwrap());
        assert!(!model.promote(id).unwrap());
        assert_eq!(model.get(id).unwrap().origin, Origin::User);
    }

    #[test]
    fn removed_listener_stops_receiving() {
        let model = BreakpointModel::new();
        let count = Rc::new(Cell::new(0));
        let seen = Rc::clone(&count);
        let lid = model.add_listener(move |_| seen.set(seen.get() + 1));
        model
            .add(BreakpointAttributes::line("util.c", 5), Origin::User, 0, ChangeOrigin::User)
            .unwrap();
        assert!(model.remove_listener(lid));
        model
            .add(BreakpointAttributes::line("util.c", 6), Origin::User, 0, ChangeOrigin::User)
            .unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn serializes_flat_for_reports() {
        let model = BreakpointModel::new();
        let id = model
            .add(
                BreakpointAttributes::line("main.c", 12).with_condition("flag"),
                Origin::Discovered,
                2,
                ChangeOrigin::Synchronizer,
            )
            .unwrap();
        let json = serde_json::to_value(model.get(id).unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": 1,
                "location": { "kind": "line", "file": "main.c", "line": 12 },
                "enabled": true,
                "condition": "flag",
                "ignore_count": 0,
                "install_count": 2,
                "origin": "discovered",
            })
        );
    }

    #[test]
    fn ids_display_with_hash() {
        assert_eq!(PlatformId(12).to_string(), "#12");
    }
}
