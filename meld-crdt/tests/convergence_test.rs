//! Merge-algebra tests: convergence, commutativity, associativity,
//! idempotence, plus the canonical multi-node scenarios.

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;

use meld_core::NodeId;
use meld_crdt::{CrdtKind, CrdtState, GCounter, LWWRegister, Mutation, ORSet, Workflow};

fn node(s: &str) -> NodeId {
    NodeId::new(s)
}

/// Apply a mutation through the prepare/apply path.
fn mutate(state: &mut CrdtState, mutation: Mutation, origin: &NodeId) {
    let op = state.prepare(&mutation, origin).expect("prepare");
    state.apply(&op, origin).expect("apply");
}

/// Build one divergent replica per node, each holding a few private ops.
fn divergent_or_set_replicas(n: usize) -> Vec<CrdtState> {
    (0..n)
        .map(|i| {
            let origin = node(&format!("node-{i}"));
            let mut state = CrdtState::new(CrdtKind::OrSet);
            for j in 0..3 {
                mutate(
                    &mut state,
                    Mutation::Add {
                        element: format!("e{i}-{j}"),
                    },
                    &origin,
                );
            }
            if i % 2 == 0 {
                mutate(
                    &mut state,
                    Mutation::Remove {
                        element: format!("e{i}-0"),
                    },
                    &origin,
                );
            }
            state
        })
        .collect()
}

#[test]
fn all_replicas_converge_under_repeated_pairwise_merges() {
    let mut replicas = divergent_or_set_replicas(4);

    // Pairwise merges in an arbitrary, partially repeated order.
    let schedule = [(0, 1), (2, 3), (1, 2), (0, 3), (3, 0), (1, 0), (2, 1), (0, 2), (3, 1)];
    for &(a, b) in &schedule {
        let other = replicas[b].clone();
        replicas[a].merge(&other).unwrap();
    }
    // One final full exchange so everyone has everything.
    for i in 0..replicas.len() {
        for j in 0..replicas.len() {
            if i != j {
                let other = replicas[j].clone();
                replicas[i].merge(&other).unwrap();
            }
        }
    }

    let reference = replicas[0].value();
    for replica in &replicas {
        assert_eq!(replica.value(), reference);
    }
}

#[test]
fn merge_commutes_for_every_kind() {
    for (a, b) in kind_pairs() {
        let mut ab = a.clone();
        ab.merge(&b).unwrap();
        let mut ba = b.clone();
        ba.merge(&a).unwrap();
        assert_eq!(ab, ba, "commutativity failed for {:?}", a.kind());
    }
}

#[test]
fn merge_is_associative_for_every_kind() {
    for (a, b) in kind_pairs() {
        let c = {
            // A third replica derived from b with one extra op.
            let mut c = b.clone();
            extra_op(&mut c, &node("node-c"));
            c
        };

        let mut left = a.clone();
        left.merge(&b).unwrap();
        left.merge(&c).unwrap();

        let mut bc = b.clone();
        bc.merge(&c).unwrap();
        let mut right = a.clone();
        right.merge(&bc).unwrap();

        assert_eq!(left, right, "associativity failed for {:?}", a.kind());
    }
}

#[test]
fn merge_is_idempotent_for_every_kind() {
    for (a, b) in kind_pairs() {
        let mut merged = a.clone();
        merged.merge(&a).unwrap();
        assert_eq!(merged, a, "self-merge changed {:?}", a.kind());

        merged.merge(&b).unwrap();
        let after_first = merged.clone();
        let changed = merged.merge(&b).unwrap();
        assert!(!changed, "second merge of {:?} reported change", a.kind());
        assert_eq!(merged, after_first);
    }
}

/// One divergent (a, b) replica pair per CRDT kind.
fn kind_pairs() -> Vec<(CrdtState, CrdtState)> {
    let na = node("node-a");
    let nb = node("node-b");
    let mut pairs = Vec::new();

    let mut a = CrdtState::new(CrdtKind::GCounter);
    mutate(&mut a, Mutation::Increment { amount: 5 }, &na);
    let mut b = CrdtState::new(CrdtKind::GCounter);
    mutate(&mut b, Mutation::Increment { amount: 3 }, &nb);
    pairs.push((a, b));

    let mut a = CrdtState::new(CrdtKind::PnCounter);
    mutate(&mut a, Mutation::Increment { amount: 9 }, &na);
    let mut b = CrdtState::new(CrdtKind::PnCounter);
    mutate(&mut b, Mutation::Decrement { amount: 4 }, &nb);
    pairs.push((a, b));

    let mut a = CrdtState::new(CrdtKind::GSet);
    mutate(&mut a, Mutation::Add { element: "x".into() }, &na);
    let mut b = CrdtState::new(CrdtKind::GSet);
    mutate(&mut b, Mutation::Add { element: "y".into() }, &nb);
    pairs.push((a, b));

    let mut a = CrdtState::new(CrdtKind::OrSet);
    mutate(&mut a, Mutation::Add { element: "x".into() }, &na);
    mutate(&mut a, Mutation::Remove { element: "x".into() }, &na);
    let mut b = CrdtState::new(CrdtKind::OrSet);
    mutate(&mut b, Mutation::Add { element: "x".into() }, &nb);
    pairs.push((a, b));

    let mut a = CrdtState::new(CrdtKind::LwwRegister);
    mutate(&mut a, Mutation::Write { value: json!("a") }, &na);
    let mut b = CrdtState::new(CrdtKind::LwwRegister);
    mutate(&mut b, Mutation::Write { value: json!("b") }, &nb);
    pairs.push((a, b));

    let mut a = CrdtState::new(CrdtKind::TimeSeries);
    a.append(Utc.timestamp_opt(10, 0).unwrap(), 1.0, Value::Null, &na)
        .unwrap();
    let mut b = CrdtState::new(CrdtKind::TimeSeries);
    b.append(Utc.timestamp_opt(20, 0).unwrap(), 2.0, Value::Null, &nb)
        .unwrap();
    pairs.push((a, b));

    let mut a = CrdtState::new(CrdtKind::Graph);
    mutate(&mut a, Mutation::AddVertex { id: "v1".into(), data: None }, &na);
    mutate(&mut a, Mutation::AddVertex { id: "v2".into(), data: None }, &na);
    mutate(
        &mut a,
        Mutation::AddEdge { source: "v1".into(), target: "v2".into(), data: None },
        &na,
    );
    let mut b = CrdtState::new(CrdtKind::Graph);
    mutate(&mut b, Mutation::AddVertex { id: "v3".into(), data: None }, &nb);
    pairs.push((a, b));

    let a = CrdtState::Workflow(submitted_workflow(&na, 10));
    let b = CrdtState::Workflow(submitted_workflow(&nb, 20));
    pairs.push((a, b));

    pairs
}

/// Apply one more kind-appropriate op to diversify a replica.
fn extra_op(state: &mut CrdtState, origin: &NodeId) {
    match state.kind() {
        CrdtKind::GCounter | CrdtKind::PnCounter => {
            mutate(state, Mutation::Increment { amount: 1 }, origin)
        }
        CrdtKind::GSet | CrdtKind::OrSet => mutate(
            state,
            Mutation::Add { element: "extra".into() },
            origin,
        ),
        CrdtKind::LwwRegister => mutate(state, Mutation::Write { value: json!("extra") }, origin),
        CrdtKind::TimeSeries => {
            state
                .append(Utc.timestamp_opt(99, 0).unwrap(), 9.0, Value::Null, origin)
                .unwrap();
        }
        CrdtKind::Graph => mutate(
            state,
            Mutation::AddVertex { id: "extra".into(), data: None },
            origin,
        ),
        CrdtKind::Workflow => {
            if let CrdtState::Workflow(wf) = state {
                if wf.can_transition("approved") {
                    wf.transition_to(
                        "approved",
                        Value::Null,
                        origin,
                        Utc.timestamp_opt(30, 0).unwrap(),
                    )
                    .unwrap();
                }
            }
        }
    }
}

fn submitted_workflow(origin: &NodeId, at_secs: i64) -> Workflow {
    let mut table = HashMap::new();
    table.insert(
        "draft".to_string(),
        ["submitted".to_string()].into_iter().collect(),
    );
    table.insert(
        "submitted".to_string(),
        ["approved".to_string()].into_iter().collect(),
    );
    let mut wf = Workflow::new("draft", table);
    wf.transition_to(
        "submitted",
        Value::Null,
        origin,
        Utc.timestamp_opt(at_secs, 0).unwrap(),
    )
    .unwrap();
    wf
}

// ── Canonical scenarios ──────────────────────────────────────────────

#[test]
fn gcounter_scenario_five_plus_three() {
    let mut a = GCounter::new();
    a.increment(&node("A"), 5);
    let mut b = GCounter::new();
    b.increment(&node("B"), 3);

    a.merge(&b);
    b.merge(&a);
    assert_eq!(a.value(), 8);
    assert_eq!(b.value(), 8);
}

#[test]
fn lww_scenario_equal_ticks_higher_node_wins() {
    let tick = Utc.timestamp_opt(10, 0).unwrap();
    let mut a = LWWRegister::new("x".to_string(), tick, node("A"));
    let mut b = LWWRegister::new("y".to_string(), tick, node("B"));

    let a_copy = a.clone();
    a.merge(&b);
    b.merge(&a_copy);
    assert_eq!(a.get(), "y");
    assert_eq!(b.get(), "y");
}

#[test]
fn or_set_add_remove_race_keeps_unobserved_add() {
    // X adds "foo". Y concurrently adds "foo". Z removes "foo" having
    // observed only Y's add. After full merge "foo" is present: X's tag
    // was never in anyone's removed set.
    let mut x = ORSet::new();
    x.add("foo".to_string(), &node("X"));

    let mut y = ORSet::new();
    y.add("foo".to_string(), &node("Y"));

    let mut z = ORSet::new();
    z.merge(&y);
    z.remove(&"foo".to_string());

    for order in [[&x, &y, &z], [&z, &y, &x], [&y, &z, &x]] {
        let mut merged = ORSet::new();
        for replica in order {
            merged.merge(replica);
        }
        assert!(merged.contains(&"foo".to_string()));
    }
}

#[test]
fn workflow_scenario_draft_submitted_approved() {
    let origin = node("A");
    let mut state = CrdtState::Workflow({
        let mut table = HashMap::new();
        table.insert(
            "draft".to_string(),
            ["submitted".to_string()].into_iter().collect(),
        );
        table.insert(
            "submitted".to_string(),
            ["approved".to_string()].into_iter().collect(),
        );
        Workflow::new("draft", table)
    });

    // Skipping a step is rejected with no state change.
    let err = state.prepare(
        &Mutation::TransitionTo { state: "approved".into(), data: Value::Null },
        &origin,
    );
    assert!(err.is_err());
    if let CrdtState::Workflow(wf) = &state {
        assert_eq!(wf.current_state(), "draft");
        assert!(wf.history().is_empty());
    }

    mutate(
        &mut state,
        Mutation::TransitionTo { state: "submitted".into(), data: Value::Null },
        &origin,
    );
    mutate(
        &mut state,
        Mutation::TransitionTo { state: "approved".into(), data: Value::Null },
        &origin,
    );
    if let CrdtState::Workflow(wf) = &state {
        assert_eq!(wf.current_state(), "approved");
        let transitions: Vec<&str> = wf.history().iter().map(|r| r.to.as_str()).collect();
        assert_eq!(transitions, vec!["submitted", "approved"]);
    }
}

#[test]
fn workflow_merge_can_land_on_a_state_neither_node_chose() {
    let mut table = HashMap::new();
    table.insert(
        "draft".to_string(),
        ["review".to_string(), "rejected".to_string()]
            .into_iter()
            .collect(),
    );
    let base = Workflow::new("draft", table);

    let mut a = base.clone();
    a.transition_to(
        "review",
        Value::Null,
        &node("A"),
        Utc.timestamp_opt(10, 0).unwrap(),
    )
    .unwrap();
    let mut b = base.clone();
    b.transition_to(
        "rejected",
        Value::Null,
        &node("B"),
        Utc.timestamp_opt(10, 0).unwrap(),
    )
    .unwrap();

    a.merge(&b);
    b.merge(&a);
    // Node B's tie-break wins everywhere: replica A did not choose
    // "rejected", yet that is where both converge.
    assert_eq!(a.current_state(), "rejected");
    assert_eq!(a, b);
    assert_eq!(a.history().len(), 2);
}
