//! Manager lifecycle: registration, local operations, merge, snapshot.

use std::collections::{HashMap, HashSet};

use meld_core::{MeldError, RegistryError};
use meld_crdt::{CrdtKind, CrdtState, Mutation, VectorClock, Workflow};
use meld_engine::Manager;
use serde_json::json;

fn increment(amount: u64) -> Mutation {
    Mutation::Increment { amount }
}

#[test]
fn register_and_apply_counter() {
    let manager = Manager::new("node-a");
    manager.register("visits", CrdtKind::GCounter).unwrap();

    manager.apply_operation("visits", &increment(5)).unwrap();
    manager.apply_operation("visits", &increment(3)).unwrap();

    assert_eq!(manager.get_value("visits").unwrap(), json!(8));
    assert_eq!(manager.log_len("visits").unwrap(), 2);
}

#[test]
fn reregistering_same_kind_is_a_noop() {
    let manager = Manager::new("node-a");
    manager.register("tags", CrdtKind::OrSet).unwrap();
    manager
        .apply_operation("tags", &Mutation::Add { element: "x".into() })
        .unwrap();

    manager.register("tags", CrdtKind::OrSet).unwrap();
    assert_eq!(manager.get_value("tags").unwrap(), json!(["x"]));
}

#[test]
fn reregistering_different_kind_is_rejected() {
    let manager = Manager::new("node-a");
    manager.register("tags", CrdtKind::OrSet).unwrap();

    let err = manager.register("tags", CrdtKind::GCounter).unwrap_err();
    assert!(matches!(
        err,
        MeldError::Registry(RegistryError::AlreadyRegistered { .. })
    ));
}

#[test]
fn unknown_instance_is_rejected() {
    let manager = Manager::new("node-a");
    let err = manager.get_value("nope").unwrap_err();
    assert!(matches!(
        err,
        MeldError::Registry(RegistryError::UnknownInstance(name)) if name == "nope"
    ));
}

#[test]
fn rejected_mutation_leaves_state_and_log_untouched() {
    let manager = Manager::new("node-a");
    manager.register("flag", CrdtKind::GCounter).unwrap();
    manager.apply_operation("flag", &increment(1)).unwrap();

    // Decrement is not valid for a grow-only counter.
    let err = manager
        .apply_operation("flag", &Mutation::Decrement { amount: 1 })
        .unwrap_err();
    assert!(matches!(err, MeldError::Crdt(_)));
    assert_eq!(manager.get_value("flag").unwrap(), json!(1));
    assert_eq!(manager.log_len("flag").unwrap(), 1);
}

#[test]
fn merge_remote_reports_change() {
    let a = Manager::new("node-a");
    let b = Manager::new("node-b");
    for m in [&a, &b] {
        m.register("votes", CrdtKind::PnCounter).unwrap();
    }
    a.apply_operation("votes", &increment(10)).unwrap();
    b.apply_operation("votes", &Mutation::Decrement { amount: 4 }).unwrap();

    let remote = snapshot_of(&b, "votes");
    let report = a
        .merge_remote("votes", &remote.state, &remote.version_vector)
        .unwrap();
    assert!(report.changed);
    assert_eq!(a.get_value("votes").unwrap(), json!(6));

    // Merging the same state again changes nothing.
    let report = a
        .merge_remote("votes", &remote.state, &remote.version_vector)
        .unwrap();
    assert!(!report.changed);
}

#[test]
fn merge_remote_rejects_kind_mismatch() {
    let manager = Manager::new("node-a");
    manager.register("votes", CrdtKind::PnCounter).unwrap();

    let err = manager
        .merge_remote("votes", &CrdtState::new(CrdtKind::GSet), &VectorClock::new())
        .unwrap_err();
    assert!(matches!(
        err,
        MeldError::Registry(RegistryError::KindMismatch { name, .. }) if name == "votes"
    ));
}

#[test]
fn snapshot_restore_round_trip() {
    let manager = Manager::new("node-a");
    manager.register("tags", CrdtKind::OrSet).unwrap();
    for element in ["x", "y", "z"] {
        manager
            .apply_operation("tags", &Mutation::Add { element: element.into() })
            .unwrap();
    }
    manager
        .apply_operation("tags", &Mutation::Remove { element: "y".into() })
        .unwrap();
    let clock = manager.version_vector("tags").unwrap();

    let bytes = manager.snapshot("tags").unwrap();

    let restored = Manager::new("node-a");
    restored.restore("tags", &bytes).unwrap();
    assert_eq!(restored.get_value("tags").unwrap(), json!(["x", "z"]));
    assert_eq!(restored.version_vector("tags").unwrap(), clock);
    // The log restarts empty; history lives in the snapshot state.
    assert_eq!(restored.log_len("tags").unwrap(), 0);
}

#[test]
fn restore_rejects_kind_mismatch() {
    let manager = Manager::new("node-a");
    manager.register("tags", CrdtKind::OrSet).unwrap();
    let bytes = manager.snapshot("tags").unwrap();

    let other = Manager::new("node-b");
    other.register("tags", CrdtKind::GCounter).unwrap();
    let err = other.restore("tags", &bytes).unwrap_err();
    assert!(matches!(
        err,
        MeldError::Registry(RegistryError::KindMismatch { .. })
    ));
}

#[test]
fn restore_rejects_garbage() {
    let manager = Manager::new("node-a");
    let err = manager.restore("tags", b"not a snapshot").unwrap_err();
    assert!(matches!(
        err,
        MeldError::Registry(RegistryError::SnapshotFormat { .. })
    ));
}

#[test]
fn workflow_registered_with_transition_table() {
    let mut table = HashMap::new();
    table.insert("draft".to_string(), HashSet::from(["review".to_string()]));
    table.insert("review".to_string(), HashSet::from(["done".to_string()]));

    let manager = Manager::new("node-a");
    manager
        .register_with_state(
            "doc",
            CrdtState::Workflow(Workflow::new("draft", table)),
        )
        .unwrap();

    manager
        .apply_operation(
            "doc",
            &Mutation::TransitionTo { state: "review".into(), data: json!({}) },
        )
        .unwrap();
    let err = manager
        .apply_operation(
            "doc",
            &Mutation::TransitionTo { state: "draft".into(), data: json!({}) },
        )
        .unwrap_err();
    assert!(matches!(err, MeldError::Crdt(_)));
    assert_eq!(
        manager.get_value("doc").unwrap()["current"],
        json!("review")
    );
}

fn snapshot_of(manager: &Manager, name: &str) -> meld_crdt::snapshot::SnapshotEnvelope {
    let bytes = manager.snapshot(name).unwrap();
    meld_crdt::snapshot::decode(&bytes).unwrap()
}
