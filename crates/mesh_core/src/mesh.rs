//! Mesh boundary: objects, bases and their lifecycle.
//!
//! Storage, indexing and querying live behind these traits. The core only
//! relies on what is declared here; [`crate::memory`] provides the in-memory
//! implementation.

use crate::error::{MeshError, MeshResult};
use crate::model::{EntityType, ModelBase, PropertyType, RoleType};
use crate::transaction::{Transaction, TransactionManager};
use crate::types::{MeshBaseIdentifier, MeshObjectIdentifier, MeshTypeIdentifier, TimeStamp};
use crate::value::PropertyValue;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Shared handle to a mesh object.
pub type MeshObjectRef = Arc<dyn MeshObject>;

/// Abstract state of an object.
///
/// States are tags, not mesh entities, so they are never resolved through a
/// resolver.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ObjectState {
    /// Current and usable.
    #[default]
    Live,
    /// Possibly out of date with its origin.
    Stale,
    /// Content discarded, identity kept.
    Purged,
}

/// Complete snapshot of an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalizedMeshObject {
    /// The object's identifier.
    pub identifier: MeshObjectIdentifier,
    /// Entity types the object is blessed with.
    pub entity_types: BTreeSet<MeshTypeIdentifier>,
    /// Property values by property type.
    pub properties: BTreeMap<MeshTypeIdentifier, PropertyValue>,
    /// Neighbors and the role types this object plays towards them.
    pub neighbors: BTreeMap<MeshObjectIdentifier, BTreeSet<MeshTypeIdentifier>>,
    /// Equivalent objects.
    pub equivalents: BTreeSet<MeshObjectIdentifier>,
    /// Abstract state.
    pub state: ObjectState,
    /// When the object was created.
    pub created_at: TimeStamp,
}

impl ExternalizedMeshObject {
    /// Creates the snapshot of a fresh, untyped, unrelated object.
    #[must_use]
    pub fn new(identifier: MeshObjectIdentifier, created_at: TimeStamp) -> Self {
        Self {
            identifier,
            entity_types: BTreeSet::new(),
            properties: BTreeMap::new(),
            neighbors: BTreeMap::new(),
            equivalents: BTreeSet::new(),
            state: ObjectState::Live,
            created_at,
        }
    }
}

/// A node of the mesh.
///
/// Read accessors fail with [`MeshError::ObjectDead`] once the object has
/// been deleted. Every mutation takes the transaction it belongs to and
/// records one [`Change`](crate::Change) into it.
pub trait MeshObject: Send + Sync + fmt::Debug {
    /// Returns the identifier.
    fn identifier(&self) -> &MeshObjectIdentifier;

    /// Returns the identifier of the owning mesh base.
    fn mesh_base_identifier(&self) -> &MeshBaseIdentifier;

    /// Returns true once the object has been deleted.
    fn is_dead(&self) -> bool;

    /// Returns the entity types the object is blessed with.
    fn entity_types(&self) -> MeshResult<BTreeSet<MeshTypeIdentifier>>;

    /// Returns a property value.
    fn property_value(&self, property: &MeshTypeIdentifier) -> MeshResult<Option<PropertyValue>>;

    /// Returns the identifiers of all neighbors.
    fn neighbor_identifiers(&self) -> MeshResult<BTreeSet<MeshObjectIdentifier>>;

    /// Returns the role types this object plays towards a neighbor.
    fn role_types(&self, neighbor: &MeshObjectIdentifier) -> MeshResult<BTreeSet<MeshTypeIdentifier>>;

    /// Returns the identifiers of all equivalent objects.
    fn equivalent_identifiers(&self) -> MeshResult<BTreeSet<MeshObjectIdentifier>>;

    /// Returns the abstract state.
    fn state(&self) -> MeshResult<ObjectState>;

    /// Takes a complete snapshot.
    fn externalize(&self) -> MeshResult<ExternalizedMeshObject>;

    /// Blesses the object with entity types.
    fn bless(&self, tx: &Transaction, types: &[Arc<EntityType>]) -> MeshResult<()>;

    /// Removes entity types, dropping the properties only they declared.
    fn unbless(&self, tx: &Transaction, types: &[Arc<EntityType>]) -> MeshResult<()>;

    /// Sets a property value and returns the previous one.
    fn set_property_value(
        &self,
        tx: &Transaction,
        property: &Arc<PropertyType>,
        value: Option<PropertyValue>,
    ) -> MeshResult<Option<PropertyValue>>;

    /// Relates the object to a neighbor under role types.
    fn relate(&self, tx: &Transaction, role_types: &[Arc<RoleType>], neighbor: &MeshObjectRef) -> MeshResult<()>;

    /// Removes role types from the relationship to a neighbor.
    fn unrelate(&self, tx: &Transaction, role_types: &[Arc<RoleType>], neighbor: &MeshObjectRef) -> MeshResult<()>;

    /// Makes another object equivalent to this one.
    fn add_equivalent(&self, tx: &Transaction, other: &MeshObjectRef) -> MeshResult<()>;

    /// Removes an equivalence.
    fn remove_equivalent(&self, tx: &Transaction, other: &MeshObjectRef) -> MeshResult<()>;

    /// Sets the abstract state.
    fn set_state(&self, tx: &Transaction, state: ObjectState) -> MeshResult<()>;
}

/// Creation and deletion of objects.
pub trait LifecycleManager: Send + Sync {
    /// Creates an empty object, minting an identifier if none is given.
    fn create_object(
        &self,
        tx: &Transaction,
        identifier: Option<MeshObjectIdentifier>,
    ) -> MeshResult<MeshObjectRef>;

    /// Recreates an object from a snapshot.
    fn recreate_object(&self, tx: &Transaction, snapshot: &ExternalizedMeshObject) -> MeshResult<MeshObjectRef>;

    /// Deletes an object.
    fn delete_object(&self, tx: &Transaction, object: &MeshObjectRef) -> MeshResult<()>;
}

/// Callbacks a transaction makes into the mesh base that owns it.
pub trait Transactable: Send + Sync {
    /// The transaction became active.
    fn transaction_started(&self, _tx: &Transaction) {}

    /// The transaction committed.
    fn transaction_committed(&self, _tx: &Transaction) {}

    /// The transaction rolled back.
    fn transaction_rolled_back(&self, _tx: &Transaction, _cause: Option<&MeshError>) {}
}

/// A mesh database instance.
///
/// A mesh base is also the resolver of changes: it turns the identifiers a
/// change carries back into live objects and types.
pub trait MeshBase: Transactable + fmt::Debug {
    /// Returns the identifier.
    fn identifier(&self) -> &MeshBaseIdentifier;

    /// Finds an object, returning `None` if it does not exist.
    fn find_object(&self, identifier: &MeshObjectIdentifier) -> Option<MeshObjectRef>;

    /// Accesses an object that is expected to exist.
    fn access_locally(&self, identifier: &MeshObjectIdentifier) -> MeshResult<MeshObjectRef> {
        self.find_object(identifier)
            .ok_or_else(|| MeshError::MeshObjectNotFound {
                identifier: identifier.clone(),
            })
    }

    /// Returns the lifecycle manager.
    fn lifecycle_manager(&self) -> &dyn LifecycleManager;

    /// Returns the model base used to resolve types.
    fn model_base(&self) -> &dyn ModelBase;

    /// Returns the transaction manager.
    fn transactions(&self) -> &TransactionManager;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_snapshot_is_live_and_empty() {
        let snapshot = ExternalizedMeshObject::new("a".into(), TimeStamp::from_millis(1));
        assert_eq!(snapshot.state, ObjectState::Live);
        assert!(snapshot.entity_types.is_empty());
        assert!(snapshot.neighbors.is_empty());
    }

    #[test]
    fn snapshot_serializes() {
        let mut snapshot = ExternalizedMeshObject::new("a".into(), TimeStamp::from_millis(1));
        snapshot
            .properties
            .insert("Name".into(), PropertyValue::from("alice"));
        let bytes = mesh_codec::to_cbor(&snapshot).unwrap();
        let decoded: ExternalizedMeshObject = mesh_codec::from_cbor(&bytes).unwrap();
        assert_eq!(snapshot, decoded);
    }
}
