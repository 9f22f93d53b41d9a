//! Property-based test generators using proptest.
//!
//! Provides strategies for identifiers, values, standalone changes and
//! mutation scripts against [`TestMesh`](crate::TestMesh).

use crate::fixtures::Mutation;
use mesh_core::{
    Change, ChangeDirection, ChangeSet, ExternalizedMeshObject, MeshObjectIdentifier,
    MeshTypeIdentifier, ObjectState, PropertyValue, TimeStamp,
};
use proptest::prelude::*;

/// Number of distinct objects addressed by generated scripts.
pub const SCRIPT_OBJECTS: usize = 4;

/// Strategy for generating object identifiers.
pub fn object_identifier_strategy() -> impl Strategy<Value = MeshObjectIdentifier> {
    prop::string::string_regex("[a-z][a-z0-9]{0,11}")
        .expect("Invalid regex")
        .prop_map(MeshObjectIdentifier::new)
}

/// Strategy for generating type identifiers.
pub fn type_identifier_strategy() -> impl Strategy<Value = MeshTypeIdentifier> {
    prop::string::string_regex("[A-Z][a-zA-Z]{0,11}")
        .expect("Invalid regex")
        .prop_map(MeshTypeIdentifier::new)
}

/// Strategy for generating timestamps.
pub fn timestamp_strategy() -> impl Strategy<Value = TimeStamp> {
    (0u64..4_000_000_000_000).prop_map(TimeStamp::from_millis)
}

/// Strategy for generating object states.
pub fn state_strategy() -> impl Strategy<Value = ObjectState> {
    prop_oneof![
        Just(ObjectState::Live),
        Just(ObjectState::Stale),
        Just(ObjectState::Purged),
    ]
}

/// Strategy for generating property values.
pub fn property_value_strategy() -> impl Strategy<Value = PropertyValue> {
    prop_oneof![
        any::<bool>().prop_map(PropertyValue::Boolean),
        any::<i64>().prop_map(PropertyValue::Integer),
        ".{0,16}".prop_map(PropertyValue::Text),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(PropertyValue::Blob),
        timestamp_strategy().prop_map(PropertyValue::Timestamp),
    ]
}

/// Strategy for generating object snapshots.
pub fn snapshot_strategy() -> impl Strategy<Value = ExternalizedMeshObject> {
    (
        object_identifier_strategy(),
        timestamp_strategy(),
        prop::collection::btree_set(type_identifier_strategy(), 0..3),
        prop::collection::btree_map(type_identifier_strategy(), property_value_strategy(), 0..3),
        prop::collection::btree_set(object_identifier_strategy(), 0..3),
        state_strategy(),
    )
        .prop_map(|(id, created_at, types, properties, equivalents, state)| {
            let mut snapshot = ExternalizedMeshObject::new(id, created_at);
            snapshot.entity_types = types;
            snapshot.properties = properties;
            snapshot.equivalents = equivalents;
            snapshot.state = state;
            snapshot
        })
}

fn direction_strategy() -> impl Strategy<Value = ChangeDirection> {
    prop_oneof![Just(ChangeDirection::Added), Just(ChangeDirection::Removed)]
}

/// Strategy for generating changes of every kind.
///
/// Changes carry no resolver.
pub fn change_strategy() -> impl Strategy<Value = Change> {
    let ids = || prop::collection::btree_set(object_identifier_strategy(), 0..3);
    let delta = || prop::collection::btree_set(object_identifier_strategy(), 1..3);
    let types = || prop::collection::btree_set(type_identifier_strategy(), 0..3);

    prop_oneof![
        (snapshot_strategy(), timestamp_strategy()).prop_map(|(s, t)| Change::created(s, t)),
        (snapshot_strategy(), timestamp_strategy()).prop_map(|(s, t)| Change::deleted(s, t)),
        (
            object_identifier_strategy(),
            direction_strategy(),
            prop::collection::btree_set(type_identifier_strategy(), 1..3),
            ids(),
            delta(),
            ids(),
            timestamp_strategy(),
        )
            .prop_map(|(id, dir, roles, old, delta, new, t)| {
                Change::neighbors(id, dir, roles.into_iter().collect(), old, delta.into_iter().collect(), new, t)
                    .expect("Distinct members")
            }),
        (
            object_identifier_strategy(),
            direction_strategy(),
            types(),
            prop::collection::btree_set(type_identifier_strategy(), 1..3),
            types(),
            timestamp_strategy(),
        )
            .prop_map(|(id, dir, old, delta, new, t)| {
                Change::types(id, dir, old, delta.into_iter().collect(), new, None, t)
                    .expect("Distinct members")
            }),
        (
            object_identifier_strategy(),
            direction_strategy(),
            ids(),
            delta(),
            ids(),
            timestamp_strategy(),
        )
            .prop_map(|(id, dir, old, delta, new, t)| {
                Change::equivalents(id, dir, old, delta.into_iter().collect(), new, t)
                    .expect("Distinct members")
            }),
        (
            object_identifier_strategy(),
            state_strategy(),
            state_strategy(),
            timestamp_strategy(),
        )
            .prop_map(|(id, old, new, t)| Change::state(id, old, new, t)),
        (
            object_identifier_strategy(),
            type_identifier_strategy(),
            proptest::option::of(property_value_strategy()),
            proptest::option::of(property_value_strategy()),
            timestamp_strategy(),
        )
            .prop_map(|(id, property, old, new, t)| Change::property(id, property, old, new, t)),
    ]
}

/// Strategy for generating change sets, optionally frozen.
pub fn change_set_strategy() -> impl Strategy<Value = ChangeSet> {
    (prop::collection::vec(change_strategy(), 0..8), any::<bool>()).prop_map(|(changes, frozen)| {
        let mut set = ChangeSet::new();
        for change in changes {
            set.add_change(change).expect("Fresh set is open");
        }
        if frozen {
            set.freeze();
        }
        set
    })
}

fn index() -> impl Strategy<Value = usize> {
    0..SCRIPT_OBJECTS
}

fn pair() -> impl Strategy<Value = (usize, usize)> {
    (index(), index())
}

/// Strategy for one scripted mutation.
///
/// With `invertible` set, only mutations whose changes have an inverse
/// that restores the prior state are generated: no state transitions and
/// no clearing of the defaulted `Name`.
pub fn mutation_strategy(invertible: bool) -> BoxedStrategy<Mutation> {
    let common = prop_oneof![
        3 => index().prop_map(Mutation::Create),
        1 => index().prop_map(Mutation::Delete),
        2 => index().prop_map(Mutation::Bless),
        1 => index().prop_map(Mutation::Unbless),
        2 => (index(), "[a-z]{1,8}").prop_map(|(i, name)| Mutation::SetName(i, name)),
        2 => (index(), proptest::option::of(-100i64..100)).prop_map(|(i, age)| Mutation::SetAge(i, age)),
        2 => pair().prop_map(|(a, b)| Mutation::Relate(a, b)),
        1 => pair().prop_map(|(a, b)| Mutation::Unrelate(a, b)),
        2 => pair().prop_map(|(a, b)| Mutation::AddEquivalent(a, b)),
        1 => pair().prop_map(|(a, b)| Mutation::RemoveEquivalent(a, b)),
    ];
    if invertible {
        common.boxed()
    } else {
        prop_oneof![
            10 => common,
            1 => (index(), state_strategy()).prop_map(|(i, s)| Mutation::SetState(i, s)),
        ]
        .boxed()
    }
}

/// Strategy for a mutation script of up to `max_len` steps.
pub fn script_strategy(max_len: usize, invertible: bool) -> impl Strategy<Value = Vec<Mutation>> {
    prop::collection::vec(mutation_strategy(invertible), 0..max_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn test_change_strategy_generates() {
        let mut runner = TestRunner::default();
        for _ in 0..50 {
            let change = change_strategy().new_tree(&mut runner).unwrap().current();
            assert!(change.resolver().is_none());
        }
    }

    #[test]
    fn test_invertible_scripts_have_no_state_changes() {
        let mut runner = TestRunner::default();
        for _ in 0..50 {
            let script = script_strategy(12, true).new_tree(&mut runner).unwrap().current();
            assert!(!script.iter().any(|m| matches!(m, Mutation::SetState(..))));
        }
    }
}
