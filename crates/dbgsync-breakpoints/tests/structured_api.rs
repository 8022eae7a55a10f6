use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dbgsync_breakpoints::{
    BreakpointAttributes, BreakpointError, ChangeOrigin, DebugSession, ModelEvent, Origin,
    Services, SessionOptions, SyncMode,
};
use dbgsync_mi::sim::{Program, SimHandle};
use dbgsync_session::{ErrorKind, Query, SessionId, SessionResult};

const MODES: [SyncMode; 2] = [SyncMode::Events, SyncMode::Manual];

fn start(mode: SyncMode) -> (DebugSession, SimHandle) {
    let options = SessionOptions {
        sync_mode: mode,
        query_timeout: Duration::from_secs(5),
        ..SessionOptions::default()
    };
    DebugSession::with_simulator(SessionId(7), Program::demo(), options).unwrap()
}

fn converge(session: &DebugSession, mode: SyncMode) {
    match mode {
        SyncMode::Events => session.settle().unwrap(),
        SyncMode::Manual => session.flush_cache().unwrap(),
    }
}

// ── Create ──────────────────────────────────────────────────────

#[test]
fn create_installs_one_target() {
    let (session, sim) = start(SyncMode::Events);
    let id = session
        .create(BreakpointAttributes::line("main.c", 12).with_condition("counter > 1"))
        .unwrap();

    let bp = session.breakpoint(id).unwrap().unwrap();
    assert_eq!(bp.origin, Origin::User);
    assert_eq!(bp.install_count, 1);
    assert_eq!(bp.attributes.condition.as_deref(), Some("counter > 1"));

    let backend = sim.snapshot();
    assert_eq!(backend.len(), 1);
    assert_eq!(backend[0].original_location, "main.c:12");
    assert_eq!(backend[0].condition.as_deref(), Some("counter > 1"));
    assert_eq!(session.targets_of(id).unwrap(), vec![backend[0].number]);
}

#[test]
fn create_survives_a_refresh_unchanged() {
    for mode in MODES {
        let (session, _sim) = start(mode);
        let id = session
            .create(BreakpointAttributes::function(Some("util.c"), "helper").disabled())
            .unwrap();
        let before = session.breakpoint(id).unwrap().unwrap();
        converge(&session, mode);
        session.refresh().unwrap();
        assert_eq!(session.breakpoints().unwrap(), vec![before], "{mode:?}");
    }
}

#[test]
fn duplicate_user_breakpoint_is_rejected() {
    let (session, sim) = start(SyncMode::Events);
    let id = session.create(BreakpointAttributes::function(None, "compute")).unwrap();
    let err = session
        .create(BreakpointAttributes::function(None, "compute").disabled())
        .unwrap_err();
    assert!(
        matches!(err, BreakpointError::Duplicate { existing: Some(existing), .. } if existing == id),
        "got {err:?}"
    );
    assert_eq!(sim.snapshot().len(), 1);
}

#[test]
fn create_promotes_discovered_breakpoint() {
    for mode in MODES {
        let (session, _sim) = start(mode);
        session.console("break main").unwrap();
        converge(&session, mode);
        let discovered = session.breakpoints().unwrap()[0].clone();
        assert_eq!(discovered.origin, Origin::Discovered);

        let id = session.create(BreakpointAttributes::function(None, "main")).unwrap();
        assert_eq!(id, discovered.id, "{mode:?}");
        converge(&session, mode);

        let bp = session.breakpoint(id).unwrap().unwrap();
        assert_eq!(bp.origin, Origin::User);
        assert_eq!(bp.install_count, 2);
        assert_eq!(session.targets_of(id).unwrap().len(), 2);
    }
}

#[test]
fn console_target_merged_into_user_breakpoint_takes_its_settings() {
    for mode in MODES {
        let (session, sim) = start(mode);
        let id = session
            .create(BreakpointAttributes::function(None, "main").with_condition("counter > 1"))
            .unwrap();
        session.console("break main").unwrap();
        converge(&session, mode);

        let bp = session.breakpoint(id).unwrap().unwrap();
        assert_eq!(bp.origin, Origin::User);
        assert_eq!(bp.attributes.condition.as_deref(), Some("counter > 1"), "{mode:?}");
        assert_eq!(bp.install_count, 2, "{mode:?}");
        let backend: Vec<(u32, Option<String>)> = sim
            .snapshot()
            .into_iter()
            .map(|t| (t.number, t.condition))
            .collect();
        assert_eq!(
            backend,
            vec![
                (1, Some("counter > 1".to_string())),
                (2, Some("counter > 1".to_string()))
            ],
            "{mode:?}"
        );
    }
}

#[test]
fn promoted_breakpoint_brings_console_targets_in_line() {
    for mode in MODES {
        let (session, sim) = start(mode);
        session.console("break compute").unwrap();
        converge(&session, mode);

        let id = session
            .create(BreakpointAttributes::function(None, "compute").disabled())
            .unwrap();
        converge(&session, mode);

        let bp = session.breakpoint(id).unwrap().unwrap();
        assert!(!bp.attributes.enabled, "{mode:?}");
        assert!(sim.snapshot().iter().all(|t| !t.enabled), "{mode:?}");
    }
}

#[test]
fn rejected_create_returns_backend_text() {
    let (session, sim) = start(SyncMode::Events);
    session.set_allow_pending(false).unwrap();
    let err = session
        .create(BreakpointAttributes::line("nosuch.c", 3))
        .unwrap_err();
    assert_eq!(err.to_string(), "No source file named nosuch.c.");
    assert_eq!(err.session_kind(), Some(ErrorKind::BackendRejected));
    assert!(session.breakpoints().unwrap().is_empty());
    assert!(sim.snapshot().is_empty());
}

#[test]
fn invalid_create_sends_nothing() {
    let (session, _sim) = start(SyncMode::Events);
    let err = session
        .create(BreakpointAttributes::line("main.c", 0))
        .unwrap_err();
    assert!(matches!(err, BreakpointError::Invalid(_)));
    assert_eq!(session.commands_sent("-break-insert").unwrap(), 0);
}

#[test]
fn pending_create_installs_on_symbol_load() {
    for mode in MODES {
        let (session, sim) = start(mode);
        let id = session.create(BreakpointAttributes::line("plugin.c", 4)).unwrap();
        assert_eq!(session.breakpoint(id).unwrap().unwrap().install_count, 0);

        sim.load_symbols(Program::new().file("plugin.c", 20));
        converge(&session, mode);
        assert_eq!(
            session.breakpoint(id).unwrap().unwrap().install_count,
            1,
            "{mode:?}"
        );
    }
}

#[test]
fn watchpoint_options_are_applied_after_insert() {
    let (session, sim) = start(SyncMode::Events);
    let id = session
        .create(
            BreakpointAttributes::watch("total", true, true)
                .with_condition("total > 3")
                .with_ignore_count(2)
                .disabled(),
        )
        .unwrap();

    let backend = sim.snapshot();
    assert_eq!(backend.len(), 1);
    assert_eq!(backend[0].kind, "acc watchpoint");
    assert!(!backend[0].enabled);
    assert_eq!(backend[0].condition.as_deref(), Some("total > 3"));
    assert_eq!(backend[0].ignore, 2);

    let attrs = session.breakpoint(id).unwrap().unwrap().attributes;
    assert!(!attrs.enabled);
    assert_eq!(attrs.condition.as_deref(), Some("total > 3"));
    assert_eq!(attrs.ignore_count, 2);
}

// ── Attribute pushes ────────────────────────────────────────────

#[test]
fn attribute_changes_reach_every_target() {
    let (session, sim) = start(SyncMode::Events);
    session.console("break helper").unwrap();
    session.console("break helper").unwrap();
    session.settle().unwrap();
    let id = session.breakpoints().unwrap()[0].id;

    session.set_enabled(id, false).unwrap();
    session.set_condition(id, "flag").unwrap();
    session.set_ignore_count(id, 4).unwrap();

    for bp in sim.snapshot() {
        assert!(!bp.enabled);
        assert_eq!(bp.condition.as_deref(), Some("flag"));
        assert_eq!(bp.ignore, 4);
    }
    assert_eq!(session.commands_sent("-break-disable").unwrap(), 1);
    assert_eq!(session.commands_sent("-break-condition").unwrap(), 2);

    let attrs = session.breakpoint(id).unwrap().unwrap().attributes;
    assert!(!attrs.enabled);
    assert_eq!(attrs.condition.as_deref(), Some("flag"));
    assert_eq!(attrs.ignore_count, 4);
}

#[test]
fn unchanged_attribute_sends_nothing() {
    let (session, _sim) = start(SyncMode::Events);
    let id = session.create(BreakpointAttributes::line("util.c", 9)).unwrap();
    session.set_enabled(id, true).unwrap();
    session.set_condition(id, "").unwrap();
    assert_eq!(session.commands_sent("-break-enable").unwrap(), 0);
    assert_eq!(session.commands_sent("-break-condition").unwrap(), 0);
}

#[test]
fn rejected_condition_leaves_model_unchanged() {
    let (session, _sim) = start(SyncMode::Events);
    let id = session.create(BreakpointAttributes::line("main.c", 15)).unwrap();
    let err = session.set_condition(id, "nosuch > 1").unwrap_err();
    assert_eq!(err.to_string(), "No symbol \"nosuch\" in current context.");
    assert_eq!(session.breakpoint(id).unwrap().unwrap().attributes.condition, None);
}

#[test]
fn console_change_to_user_breakpoint_is_mirrored() {
    for mode in MODES {
        let (session, sim) = start(mode);
        let id = session.create(BreakpointAttributes::line("main.c", 40)).unwrap();
        let number = sim.snapshot()[0].number;
        session.console(&format!("disable {number}")).unwrap();
        converge(&session, mode);
        assert!(
            !session.breakpoint(id).unwrap().unwrap().attributes.enabled,
            "{mode:?}"
        );
        assert_eq!(session.commands_sent("-break-disable").unwrap(), 0);
    }
}

// ── Delete ──────────────────────────────────────────────────────

#[test]
fn delete_removes_every_target() {
    let (session, sim) = start(SyncMode::Events);
    session.console("break accumulate").unwrap();
    session.console("break accumulate").unwrap();
    session.settle().unwrap();
    let id = session.breakpoints().unwrap()[0].id;

    session.delete(id).unwrap();
    assert!(sim.snapshot().is_empty());
    assert!(session.breakpoints().unwrap().is_empty());
    assert!(matches!(
        session.delete(id),
        Err(BreakpointError::NotFound(missing)) if missing == id
    ));
}

#[test]
fn user_breakpoint_outlives_console_delete() {
    for mode in MODES {
        let (session, sim) = start(mode);
        let id = session.create(BreakpointAttributes::line("main.c", 50)).unwrap();
        let number = sim.snapshot()[0].number;
        session.console(&format!("delete {number}")).unwrap();
        converge(&session, mode);

        let bp = session.breakpoint(id).unwrap().unwrap();
        assert_eq!(bp.install_count, 0, "{mode:?}");
        assert!(session.targets_of(id).unwrap().is_empty());
    }
}

#[test]
fn user_breakpoint_with_merged_console_targets() {
    for mode in MODES {
        let (session, sim) = start(mode);
        let id = session.create(BreakpointAttributes::function(None, "main")).unwrap();
        session.console("break main").unwrap();
        session.console("break main.c:main").unwrap();
        session.console("break main").unwrap();
        converge(&session, mode);

        assert_eq!(session.breakpoints().unwrap().len(), 2, "{mode:?}");
        assert_eq!(session.targets_of(id).unwrap(), vec![1, 2, 4], "{mode:?}");
        assert_eq!(session.breakpoint(id).unwrap().unwrap().install_count, 3);

        // Losing one merged target only lowers the install count.
        session.console("delete 2").unwrap();
        converge(&session, mode);
        let bp = session.breakpoint(id).unwrap().unwrap();
        assert_eq!(bp.origin, Origin::User);
        assert_eq!(bp.install_count, 2, "{mode:?}");

        // Deleting the breakpoint takes every remaining merged target along.
        session.delete(id).unwrap();
        converge(&session, mode);
        let left = session.breakpoints().unwrap();
        assert_eq!(left.len(), 1, "{mode:?}");
        assert_eq!(left[0].origin, Origin::Discovered);
        let backend: Vec<String> = sim
            .snapshot()
            .into_iter()
            .map(|t| t.original_location)
            .collect();
        assert_eq!(backend, vec!["main.c:main".to_string()], "{mode:?}");
        assert_eq!(session.commands_sent("-break-delete").unwrap(), 2, "{mode:?}");
    }
}

#[test]
fn delete_after_console_delete_succeeds() {
    let (session, sim) = start(SyncMode::Manual);
    let id = session.create(BreakpointAttributes::line("main.c", 51)).unwrap();
    sim.console("delete");
    session.delete(id).unwrap();
    assert!(session.breakpoints().unwrap().is_empty());
}

#[test]
fn rapid_create_delete_pairs_converge() {
    for mode in MODES {
        let (session, sim) = start(mode);
        for _ in 0..100 {
            let id = session.create(BreakpointAttributes::line("util.c", 12)).unwrap();
            session.delete(id).unwrap();
        }
        let kept = session.create(BreakpointAttributes::line("util.c", 13)).unwrap();
        converge(&session, mode);

        let all = session.breakpoints().unwrap();
        assert_eq!(all.len(), 1, "{mode:?}: {all:?}");
        assert_eq!(all[0].id, kept);
        assert_eq!(all[0].install_count, 1);
        assert_eq!(sim.snapshot().len(), 1);
        assert_eq!(session.commands_sent("-break-insert").unwrap(), 101);
    }
}

// ── Events and queries ──────────────────────────────────────────

#[test]
fn model_events_carry_their_origin() {
    let (session, _sim) = start(SyncMode::Events);
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    session
        .subscribe(move |event: &ModelEvent| {
            sink.lock().unwrap().push(event.origin());
        })
        .unwrap();

    let id = session.create(BreakpointAttributes::line("main.c", 22)).unwrap();
    session.console("disable 1").unwrap();
    session.settle().unwrap();
    session.delete(id).unwrap();

    let log = log.lock().unwrap();
    assert_eq!(
        *log,
        vec![ChangeOrigin::User, ChangeOrigin::Synchronizer, ChangeOrigin::User]
    );
}

#[test]
fn query_timeout_leaves_executor_serving() {
    let (session, _sim) = start(SyncMode::Events);
    let started = Instant::now();
    let err = Query::new(session.executor(), |_services: Rc<Services>| {
        std::future::pending::<SessionResult<()>>()
    })
    .get_timeout(Duration::from_millis(100))
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(session.breakpoints().unwrap().is_empty());
    session.create(BreakpointAttributes::line("main.c", 5)).unwrap();
}

#[test]
fn shutdown_is_idempotent_and_fails_later_calls() {
    let (session, _sim) = start(SyncMode::Events);
    session.shutdown().unwrap();
    session.shutdown().unwrap();
    let err = session.breakpoints().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
}
