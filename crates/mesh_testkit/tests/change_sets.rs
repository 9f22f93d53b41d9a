//! Integration tests for change sets: freezing, encoding and replay.

use mesh_codec::{Decode, Encode};
use mesh_testkit::prelude::*;
use proptest::prelude::*;
use std::sync::Arc;

fn committed_history(mesh: &TestMesh) -> ChangeSet {
    let (_, first) = mesh.in_transaction(|tx| {
        let alice = mesh.create_person(tx, "alice");
        let bob = mesh.create_person(tx, "bob");
        let carol = mesh.create_person(tx, "carol");
        alice.relate(tx, &[mesh.knows.clone()], &bob).unwrap();
        bob.relate(tx, &[mesh.knows.clone()], &carol).unwrap();
        alice.add_equivalent(tx, &carol).unwrap();
        alice
            .set_property_value(tx, &mesh.name, Some(PropertyValue::from("Alice")))
            .unwrap();
        carol.set_state(tx, ObjectState::Stale).unwrap();
    });
    let (_, second) = mesh.in_transaction(|tx| {
        let bob = mesh.object("bob");
        bob.set_property_value(tx, &mesh.age, Some(PropertyValue::Integer(41)))
            .unwrap();
        mesh.base.delete_object(tx, &mesh.object("carol")).unwrap();
        mesh.object("alice").unbless(tx, &[mesh.person.clone()]).unwrap();
    });
    ChangeSet::concat(&first, &second)
}

#[test]
fn test_freeze_is_permanent() {
    let mut set = ChangeSet::new();
    set.add_change(Change::state("a".into(), ObjectState::Live, ObjectState::Stale, TimeStamp::from_millis(1)))
        .unwrap();
    set.freeze();
    set.freeze();
    assert!(set.is_frozen());

    let other = set.clone();
    assert!(matches!(
        set.add_change(Change::state("b".into(), ObjectState::Live, ObjectState::Purged, TimeStamp::from_millis(2))),
        Err(MeshError::ChangeSetFrozen)
    ));
    assert!(matches!(set.append(&other), Err(MeshError::ChangeSetFrozen)));
    assert!(matches!(set.compact(), Err(MeshError::ChangeSetFrozen)));
    assert!(set.is_frozen());
    assert_eq!(set.len(), 1);
}

#[test]
fn test_committed_change_set_is_frozen_and_copies_are_open() {
    let mesh = TestMesh::new();
    let (_, changes) = mesh.in_transaction(|tx| mesh.create_cell(tx, "c"));
    assert!(changes.is_frozen());

    let mut copy = ChangeSet::create_copy(&changes);
    assert!(!copy.is_frozen());
    copy.append(&changes).unwrap();
    assert_eq!(copy.len(), 4);
    assert_eq!(copy.changes_affecting(&"c".into()).count(), 4);
}

#[test]
fn test_change_set_survives_cbor() {
    let mesh = TestMesh::new();
    let mut history = committed_history(&mesh);
    history.freeze();

    let bytes = history.encode().unwrap();
    let decoded = ChangeSet::decode(&bytes).unwrap();
    assert_eq!(decoded, history);
    assert!(decoded.is_frozen());
    assert!(decoded.iter().all(|c| c.resolver().is_none()));
}

#[test]
fn test_replay_reproduces_the_mesh() {
    let mesh = TestMesh::new();
    let history = committed_history(&mesh);
    let replica = mesh.sibling("replica");
    let target: Arc<dyn MeshBase> = replica.clone();

    history.apply_to(&target).unwrap();

    assert_eq!(snapshot_all(&replica), snapshot_all(&mesh.base));
    assert!(replica.transactions().current_transaction().is_none());
}

#[test]
fn test_decoded_history_replays() {
    let mesh = TestMesh::new();
    let history = committed_history(&mesh);
    let decoded = ChangeSet::decode(&history.encode().unwrap()).unwrap();
    let replica = mesh.sibling("replica");
    let target: Arc<dyn MeshBase> = replica.clone();

    decoded.apply_to(&target).unwrap();
    assert_eq!(snapshot_all(&replica), snapshot_all(&mesh.base));
}

#[test]
fn test_failed_replay_rolls_back_the_replica() {
    let mesh = TestMesh::new();
    let (_, changes) = mesh.in_transaction(|tx| {
        mesh.create_cell(tx, "c");
        mesh.object("c")
            .set_property_value(tx, &mesh.value, Some(PropertyValue::Integer(5)))
            .unwrap();
    });
    let mut broken = ChangeSet::create_copy(&changes);
    broken
        .add_change(Change::property(
            "ghost".into(),
            mesh.value.identifier().clone(),
            None,
            Some(PropertyValue::Integer(1)),
            TimeStamp::now(),
        ))
        .unwrap();

    let replica = mesh.sibling("replica");
    let target: Arc<dyn MeshBase> = replica.clone();
    assert!(matches!(
        broken.apply_to(&target),
        Err(MeshError::CannotApplyChange { .. })
    ));
    assert_eq!(replica.size(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_generated_change_sets_survive_cbor(set in change_set_strategy()) {
        let decoded = ChangeSet::decode(&set.encode().unwrap()).unwrap();
        prop_assert_eq!(&decoded, &set);
        prop_assert_eq!(decoded.is_frozen(), set.is_frozen());
        let order: Vec<_> = decoded.iter().map(Change::time).collect();
        let expected: Vec<_> = set.iter().map(Change::time).collect();
        prop_assert_eq!(order, expected);
    }

    #[test]
    fn prop_freeze_is_monotonic(changes in prop::collection::vec(change_strategy(), 1..6), freeze_at in 0usize..6) {
        let mut set = ChangeSet::new();
        let mut frozen_seen = false;
        for (i, change) in changes.into_iter().enumerate() {
            if i == freeze_at {
                set.freeze();
            }
            frozen_seen |= set.is_frozen();
            prop_assert_eq!(set.is_frozen(), frozen_seen);
            let result = set.add_change(change);
            prop_assert_eq!(result.is_err(), frozen_seen);
        }
    }
}
