//! Delta sync between peers over the in-process transport.

use std::future::Future;
use std::sync::Arc;

use meld_core::{GcConfig, MeldError, NodeId, OpId, SyncConfig, SyncError};
use meld_crdt::{AddTag, CrdtKind, CrdtOp, CrdtState, Mutation, OpLogEntry, VectorClock};
use meld_engine::{
    ChannelTransport, DeltaMessage, Manager, PeerTransport, SyncEngine, SyncPhase,
};
use serde_json::json;

fn engine_for(
    manager: &Arc<Manager>,
    transport: &Arc<ChannelTransport>,
) -> SyncEngine<ChannelTransport> {
    SyncEngine::new(
        Arc::clone(manager),
        Arc::clone(transport),
        SyncConfig::default(),
        GcConfig::default(),
    )
}

fn increment(amount: u64) -> Mutation {
    Mutation::Increment { amount }
}

#[tokio::test]
async fn delta_carries_only_what_the_peer_is_missing() {
    let a = Arc::new(Manager::new("node-a"));
    let b = Arc::new(Manager::new("node-b"));
    a.register("visits", CrdtKind::GCounter).unwrap();

    let transport = Arc::new(ChannelTransport::new());
    transport.connect("node-b", Arc::clone(&b));
    let engine = engine_for(&a, &transport);
    engine.add_peer("visits", "node-b");

    for _ in 0..3 {
        a.apply_operation("visits", &increment(1)).unwrap();
    }
    assert_eq!(engine.sync_instance("visits", "node-b").await.unwrap(), 3);
    assert_eq!(b.get_value("visits").unwrap(), json!(3));

    // Nothing new: the next cycle ships zero entries.
    assert_eq!(engine.sync_instance("visits", "node-b").await.unwrap(), 0);

    a.apply_operation("visits", &increment(2)).unwrap();
    assert_eq!(engine.sync_instance("visits", "node-b").await.unwrap(), 1);
    assert_eq!(b.get_value("visits").unwrap(), json!(5));
}

#[tokio::test]
async fn two_nodes_converge_syncing_both_directions() {
    let a = Arc::new(Manager::new("node-a"));
    let b = Arc::new(Manager::new("node-b"));
    a.register("tags", CrdtKind::OrSet).unwrap();
    b.register("tags", CrdtKind::OrSet).unwrap();

    let transport = Arc::new(ChannelTransport::new());
    transport.connect("node-a", Arc::clone(&a));
    transport.connect("node-b", Arc::clone(&b));
    let engine_a = engine_for(&a, &transport);
    let engine_b = engine_for(&b, &transport);
    engine_a.add_peer("tags", "node-b");
    engine_b.add_peer("tags", "node-a");

    a.apply_operation("tags", &Mutation::Add { element: "x".into() })
        .unwrap();
    b.apply_operation("tags", &Mutation::Add { element: "y".into() })
        .unwrap();
    b.apply_operation("tags", &Mutation::Remove { element: "y".into() })
        .unwrap();
    b.apply_operation("tags", &Mutation::Add { element: "z".into() })
        .unwrap();

    engine_a.sync_instance("tags", "node-b").await.unwrap();
    engine_b.sync_instance("tags", "node-a").await.unwrap();

    assert_eq!(a.get_value("tags").unwrap(), json!(["x", "z"]));
    assert_eq!(a.get_value("tags").unwrap(), b.get_value("tags").unwrap());
}

#[tokio::test]
async fn unknown_instance_is_registered_on_first_delta() {
    let a = Arc::new(Manager::new("node-a"));
    let b = Arc::new(Manager::new("node-b"));
    a.register("visits", CrdtKind::GCounter).unwrap();
    a.apply_operation("visits", &increment(7)).unwrap();

    let transport = Arc::new(ChannelTransport::new());
    transport.connect("node-b", Arc::clone(&b));
    let engine = engine_for(&a, &transport);
    engine.add_peer("visits", "node-b");

    engine.sync_instance("visits", "node-b").await.unwrap();
    assert_eq!(b.kind_of("visits").unwrap(), CrdtKind::GCounter);
    assert_eq!(b.get_value("visits").unwrap(), json!(7));
}

#[tokio::test]
async fn redelivered_delta_is_idempotent() {
    let a = Arc::new(Manager::new("node-a"));
    let b = Arc::new(Manager::new("node-b"));
    a.register("visits", CrdtKind::GCounter).unwrap();
    a.apply_operation("visits", &increment(5)).unwrap();

    let delta = a
        .delta_for("visits", &VectorClock::new(), usize::MAX)
        .unwrap();
    b.apply_delta(&delta).unwrap();
    let ack = b.apply_delta(&delta).unwrap();

    assert_eq!(b.get_value("visits").unwrap(), json!(5));
    assert_eq!(ack.applied_up_to, a.version_vector("visits").unwrap());
}

#[tokio::test]
async fn full_state_merge_then_delta_does_not_double_apply() {
    let a = Arc::new(Manager::new("node-a"));
    let b = Arc::new(Manager::new("node-b"));
    a.register("visits", CrdtKind::GCounter).unwrap();
    a.apply_operation("visits", &increment(5)).unwrap();

    // The state arrives first through the full-state channel.
    let envelope = meld_crdt::snapshot::decode(&a.snapshot("visits").unwrap()).unwrap();
    b.register("visits", CrdtKind::GCounter).unwrap();
    b.merge_remote("visits", &envelope.state, &envelope.version_vector)
        .unwrap();
    assert_eq!(b.get_value("visits").unwrap(), json!(5));

    // The same operations arrive again through delta sync. The merged
    // version vector must gate the replay or the increment doubles.
    let delta = a
        .delta_for("visits", &VectorClock::new(), usize::MAX)
        .unwrap();
    b.apply_delta(&delta).unwrap();
    assert_eq!(b.get_value("visits").unwrap(), json!(5));

    // Fresh operations after the merge still come through.
    a.apply_operation("visits", &increment(2)).unwrap();
    let delta = a
        .delta_for("visits", &envelope.version_vector, usize::MAX)
        .unwrap();
    assert_eq!(delta.entries.len(), 1);
    b.apply_delta(&delta).unwrap();
    assert_eq!(b.get_value("visits").unwrap(), json!(7));
}

#[tokio::test]
async fn malformed_entries_are_skipped_entry_by_entry() {
    let a = Arc::new(Manager::new("node-a"));
    a.register("visits", CrdtKind::GCounter).unwrap();
    let origin = NodeId::new("node-x");

    let good = |lamport: u64, amount: u64| OpLogEntry {
        crdt_name: "visits".to_string(),
        op: CrdtOp::Increment { amount },
        origin: origin.clone(),
        lamport,
        op_id: OpId::new(),
    };
    // An add op is not valid for a counter.
    let bad = OpLogEntry {
        crdt_name: "visits".to_string(),
        op: CrdtOp::Add { element: "x".to_string(), tag: AddTag::new(&origin) },
        origin: origin.clone(),
        lamport: 2,
        op_id: OpId::new(),
    };
    let delta = DeltaMessage {
        instance: "visits".to_string(),
        kind: CrdtKind::GCounter,
        sender: origin.clone(),
        sender_clock: VectorClock::new(),
        entries: vec![good(1, 10), bad, good(3, 4)],
    };

    let ack = a.apply_delta(&delta).unwrap();
    assert_eq!(a.get_value("visits").unwrap(), json!(14));
    assert_eq!(ack.applied_up_to.get(&origin), 3);
}

#[tokio::test]
async fn failure_backs_off_and_success_resets() {
    let a = Arc::new(Manager::new("node-a"));
    let b = Arc::new(Manager::new("node-b"));
    a.register("visits", CrdtKind::GCounter).unwrap();
    a.apply_operation("visits", &increment(1)).unwrap();

    let transport = Arc::new(ChannelTransport::new());
    let engine = engine_for(&a, &transport);
    engine.add_peer("visits", "node-b");

    for expected_failures in 1..=3 {
        let err = engine.sync_instance("visits", "node-b").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(
            engine.peer_failures("visits", "node-b"),
            Some(expected_failures)
        );
        assert_eq!(
            engine.peer_phase("visits", "node-b"),
            Some(SyncPhase::Error)
        );
    }
    assert!(engine.peer_last_error("visits", "node-b").is_some());

    transport.connect("node-b", Arc::clone(&b));
    assert_eq!(engine.sync_instance("visits", "node-b").await.unwrap(), 1);
    assert_eq!(engine.peer_failures("visits", "node-b"), Some(0));
    assert_eq!(engine.peer_phase("visits", "node-b"), Some(SyncPhase::Idle));
    assert!(engine.peer_last_error("visits", "node-b").is_none());
    assert_eq!(b.get_value("visits").unwrap(), json!(1));
}

struct HangingTransport;

impl PeerTransport for HangingTransport {
    fn send_delta(
        &self,
        _peer: &str,
        _delta: DeltaMessage,
    ) -> impl Future<Output = Result<meld_engine::AckMessage, SyncError>> + Send {
        std::future::pending()
    }
}

#[tokio::test(start_paused = true)]
async fn ack_timeout_surfaces_as_retryable() {
    let a = Arc::new(Manager::new("node-a"));
    a.register("visits", CrdtKind::GCounter).unwrap();
    a.apply_operation("visits", &increment(1)).unwrap();

    let engine = SyncEngine::new(
        Arc::clone(&a),
        Arc::new(HangingTransport),
        SyncConfig::default(),
        GcConfig::default(),
    );
    engine.add_peer("visits", "node-b");

    let err = engine.sync_instance("visits", "node-b").await.unwrap_err();
    assert!(matches!(
        err,
        MeldError::Sync(SyncError::AckTimeout { .. })
    ));
    assert!(err.is_retryable());
    assert_eq!(engine.peer_phase("visits", "node-b"), Some(SyncPhase::Error));
}

#[tokio::test]
async fn compaction_honors_the_peer_floor() {
    let a = Arc::new(Manager::new("node-a"));
    let b = Arc::new(Manager::new("node-b"));
    a.register("tags", CrdtKind::OrSet).unwrap();

    let transport = Arc::new(ChannelTransport::new());
    transport.connect("node-b", Arc::clone(&b));
    let gc = GcConfig {
        compact_min_entries: 1,
        ..GcConfig::default()
    };
    let engine = SyncEngine::new(
        Arc::clone(&a),
        Arc::clone(&transport),
        SyncConfig::default(),
        gc,
    );
    engine.add_peer("tags", "node-b");

    a.apply_operation("tags", &Mutation::Add { element: "x".into() })
        .unwrap();
    a.apply_operation("tags", &Mutation::Remove { element: "x".into() })
        .unwrap();
    a.apply_operation("tags", &Mutation::Add { element: "y".into() })
        .unwrap();

    // Before any ack the floor is empty: nothing may be dropped.
    assert_eq!(engine.compact_instance("tags").unwrap(), 0);
    assert_eq!(a.log_len("tags").unwrap(), 3);

    engine.sync_instance("tags", "node-b").await.unwrap();
    // The peer has acknowledged everything: the whole log can go.
    assert_eq!(engine.compact_instance("tags").unwrap(), 3);
    assert_eq!(a.log_len("tags").unwrap(), 0);

    // State is untouched by compaction.
    assert_eq!(a.get_value("tags").unwrap(), json!(["y"]));
}

#[tokio::test]
async fn tombstones_survive_until_every_peer_acknowledges() {
    let a = Arc::new(Manager::new("node-a"));
    let b = Arc::new(Manager::new("node-b"));
    let c = Arc::new(Manager::new("node-c"));
    a.register("tags", CrdtKind::OrSet).unwrap();

    let transport = Arc::new(ChannelTransport::new());
    transport.connect("node-b", Arc::clone(&b));
    transport.connect("node-c", Arc::clone(&c));
    let gc = GcConfig {
        compact_min_entries: 1,
        ..GcConfig::default()
    };
    let engine = SyncEngine::new(
        Arc::clone(&a),
        Arc::clone(&transport),
        SyncConfig::default(),
        gc,
    );
    engine.add_peer("tags", "node-b");
    engine.add_peer("tags", "node-c");

    a.apply_operation("tags", &Mutation::Add { element: "x".into() })
        .unwrap();
    a.apply_operation("tags", &Mutation::Remove { element: "x".into() })
        .unwrap();

    engine.sync_instance("tags", "node-b").await.unwrap();
    // node-c has acknowledged nothing: the floor is empty, so neither
    // log entries nor the remove's tombstone may be dropped.
    assert_eq!(engine.compact_instance("tags").unwrap(), 0);
    assert_eq!(tombstones(&a, "tags"), 1);

    engine.sync_instance("tags", "node-c").await.unwrap();
    // Every peer covers the whole instance clock now.
    assert_eq!(engine.compact_instance("tags").unwrap(), 2);
    assert_eq!(tombstones(&a, "tags"), 0);
    assert_eq!(a.get_value("tags").unwrap(), json!([]));
}

fn tombstones(manager: &Manager, name: &str) -> usize {
    let envelope = meld_crdt::snapshot::decode(&manager.snapshot(name).unwrap()).unwrap();
    match envelope.state {
        CrdtState::OrSet(set) => set.tombstone_count(),
        state => panic!("expected an or_set, got {}", state.kind()),
    }
}

#[tokio::test(start_paused = true)]
async fn background_loop_syncs_until_shutdown() {
    let a = Arc::new(Manager::new("node-a"));
    let b = Arc::new(Manager::new("node-b"));
    a.register("visits", CrdtKind::GCounter).unwrap();
    a.apply_operation("visits", &increment(9)).unwrap();

    let transport = Arc::new(ChannelTransport::new());
    transport.connect("node-b", Arc::clone(&b));
    let engine = Arc::new(engine_for(&a, &transport));
    engine.add_peer("visits", "node-b");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.run(shutdown_rx).await }
    });

    for _ in 0..100 {
        if b.get_value("visits").ok() == Some(json!(9)) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }
    assert_eq!(b.get_value("visits").unwrap(), json!(9));

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn batched_delta_catches_up_over_multiple_cycles() {
    let a = Arc::new(Manager::new("node-a"));
    let b = Arc::new(Manager::new("node-b"));
    a.register("visits", CrdtKind::GCounter).unwrap();

    let transport = Arc::new(ChannelTransport::new());
    transport.connect("node-b", Arc::clone(&b));
    let config = SyncConfig {
        delta_batch_size: 4,
        ..SyncConfig::default()
    };
    let engine = SyncEngine::new(
        Arc::clone(&a),
        Arc::clone(&transport),
        config,
        GcConfig::default(),
    );
    engine.add_peer("visits", "node-b");

    for _ in 0..10 {
        a.apply_operation("visits", &increment(1)).unwrap();
    }
    assert_eq!(engine.sync_instance("visits", "node-b").await.unwrap(), 4);
    assert_eq!(engine.sync_instance("visits", "node-b").await.unwrap(), 4);
    assert_eq!(engine.sync_instance("visits", "node-b").await.unwrap(), 2);
    assert_eq!(b.get_value("visits").unwrap(), json!(10));
}
