//! Handles to objects held by an [`MMeshBase`].

use super::MMeshBase;
use crate::error::{MeshError, MeshResult};
use crate::mesh::{ExternalizedMeshObject, MeshObject, MeshObjectRef, ObjectState};
use crate::model::{EntityType, PropertyType, RoleType};
use crate::transaction::Transaction;
use crate::types::{MeshBaseIdentifier, MeshObjectIdentifier, MeshTypeIdentifier};
use crate::value::PropertyValue;
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

/// A lightweight handle; the object's data lives in its mesh base.
///
/// Handles stay valid after deletion but every accessor then fails with
/// [`MeshError::ObjectDead`].
#[derive(Debug)]
pub struct MMeshObject {
    identifier: MeshObjectIdentifier,
    base_identifier: MeshBaseIdentifier,
    base: Weak<MMeshBase>,
}

impl MMeshObject {
    pub(crate) fn new(
        identifier: MeshObjectIdentifier,
        base_identifier: MeshBaseIdentifier,
        base: Weak<MMeshBase>,
    ) -> Self {
        Self {
            identifier,
            base_identifier,
            base,
        }
    }

    fn base(&self) -> MeshResult<Arc<MMeshBase>> {
        self.base.upgrade().ok_or_else(|| MeshError::ObjectDead {
            identifier: self.identifier.clone(),
        })
    }

    fn read<R>(&self, f: impl FnOnce(&ExternalizedMeshObject) -> R) -> MeshResult<R> {
        self.base()?.read(&self.identifier, f)
    }
}

impl MeshObject for MMeshObject {
    fn identifier(&self) -> &MeshObjectIdentifier {
        &self.identifier
    }

    fn mesh_base_identifier(&self) -> &MeshBaseIdentifier {
        &self.base_identifier
    }

    fn is_dead(&self) -> bool {
        self.base
            .upgrade()
            .map_or(true, |base| !base.contains(&self.identifier))
    }

    fn entity_types(&self) -> MeshResult<BTreeSet<MeshTypeIdentifier>> {
        self.read(|record| record.entity_types.clone())
    }

    fn property_value(&self, property: &MeshTypeIdentifier) -> MeshResult<Option<PropertyValue>> {
        self.read(|record| record.properties.get(property).cloned())
    }

    fn neighbor_identifiers(&self) -> MeshResult<BTreeSet<MeshObjectIdentifier>> {
        self.read(|record| record.neighbors.keys().cloned().collect())
    }

    fn role_types(&self, neighbor: &MeshObjectIdentifier) -> MeshResult<BTreeSet<MeshTypeIdentifier>> {
        self.read(|record| record.neighbors.get(neighbor).cloned().unwrap_or_default())
    }

    fn equivalent_identifiers(&self) -> MeshResult<BTreeSet<MeshObjectIdentifier>> {
        self.read(|record| record.equivalents.clone())
    }

    fn state(&self) -> MeshResult<ObjectState> {
        self.read(|record| record.state)
    }

    fn externalize(&self) -> MeshResult<ExternalizedMeshObject> {
        self.read(Clone::clone)
    }

    fn bless(&self, tx: &Transaction, types: &[Arc<EntityType>]) -> MeshResult<()> {
        self.base()?.bless(tx, &self.identifier, types)
    }

    fn unbless(&self, tx: &Transaction, types: &[Arc<EntityType>]) -> MeshResult<()> {
        self.base()?.unbless(tx, &self.identifier, types)
    }

    fn set_property_value(
        &self,
        tx: &Transaction,
        property: &Arc<PropertyType>,
        value: Option<PropertyValue>,
    ) -> MeshResult<Option<PropertyValue>> {
        self.base()?
            .set_property_value(tx, &self.identifier, property, value)
    }

    fn relate(&self, tx: &Transaction, role_types: &[Arc<RoleType>], neighbor: &MeshObjectRef) -> MeshResult<()> {
        self.base()?
            .relate(tx, &self.identifier, role_types, neighbor.identifier())
    }

    fn unrelate(&self, tx: &Transaction, role_types: &[Arc<RoleType>], neighbor: &MeshObjectRef) -> MeshResult<()> {
        self.base()?
            .unrelate(tx, &self.identifier, role_types, neighbor.identifier())
    }

    fn add_equivalent(&self, tx: &Transaction, other: &MeshObjectRef) -> MeshResult<()> {
        self.base()?
            .add_equivalent(tx, &self.identifier, other.identifier())
    }

    fn remove_equivalent(&self, tx: &Transaction, other: &MeshObjectRef) -> MeshResult<()> {
        self.base()?
            .remove_equivalent(tx, &self.identifier, other.identifier())
    }

    fn set_state(&self, tx: &Transaction, state: ObjectState) -> MeshResult<()> {
        self.base()?.set_state(tx, &self.identifier, state)
    }
}
