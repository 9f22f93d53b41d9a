//! In-memory mesh base.
//!
//! [`MMeshBase`] keeps every object as an [`ExternalizedMeshObject`] in a
//! map. It is the reference implementation of the mesh boundary traits:
//!
//! - every mutation checks the transaction and records one [`Change`]
//! - the object map is snapshotted when a transaction starts and restored
//!   when it rolls back
//! - projections mark dependent objects dirty when a source property changes
//! - lifecycle listeners hear about creations and deletions after commit
//!
//! # Example
//!
//! ```ignore
//! let base = MMeshBase::create(MeshBaseIdentifier::new("main"), model, Config::default());
//! let tx = base.transactions().create_transaction_now()?;
//! let object = base.create_object(&tx, None)?;
//! object.bless(&tx, &[person])?;
//! tx.commit()?;
//! ```

mod model;
mod object;

pub use model::MModelBase;
pub use object::MMeshObject;

use crate::change::{Change, ChangeDirection, ChangeKind};
use crate::config::Config;
use crate::error::{MeshError, MeshResult};
use crate::mesh::{
    ExternalizedMeshObject, LifecycleManager, MeshBase, MeshObject, MeshObjectRef, ObjectState,
    Transactable,
};
use crate::model::{EntityType, ModelBase, PropertyType, RoleType};
use crate::transaction::{
    LifecycleListener, ListenerSet, ProjectedPropertyUpdater, Transaction, TransactionManager,
};
use crate::types::{
    MeshBaseIdentifier, MeshObjectIdentifier, MeshTypeIdentifier, TimeStamp, TransactionId,
};
use crate::value::PropertyValue;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

type ObjectMap = HashMap<MeshObjectIdentifier, ExternalizedMeshObject>;

/// Keeps `dependent` up to date with a property of `source`.
struct Projection {
    source: MeshObjectIdentifier,
    property: MeshTypeIdentifier,
    dependent: MeshObjectIdentifier,
    updater: Arc<dyn ProjectedPropertyUpdater>,
}

/// A mesh base that keeps all objects in memory.
pub struct MMeshBase {
    identifier: MeshBaseIdentifier,
    model: Arc<dyn ModelBase>,
    objects: RwLock<ObjectMap>,
    /// Object map as of the start of the active transaction.
    rollback_image: Mutex<Option<(TransactionId, ObjectMap)>>,
    projections: RwLock<Vec<Projection>>,
    lifecycle_listeners: ListenerSet<dyn LifecycleListener>,
    transactions: TransactionManager,
    this: Weak<MMeshBase>,
}

impl MMeshBase {
    /// Creates an empty mesh base resolving types through `model`.
    pub fn create(identifier: MeshBaseIdentifier, model: Arc<dyn ModelBase>, config: Config) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<MMeshBase>| {
            let owner: Weak<dyn Transactable> = this.clone();
            Self {
                transactions: TransactionManager::new(identifier.clone(), config, owner),
                identifier,
                model,
                objects: RwLock::new(HashMap::new()),
                rollback_image: Mutex::new(None),
                projections: RwLock::new(Vec::new()),
                lifecycle_listeners: ListenerSet::new(),
                this: this.clone(),
            }
        })
    }

    /// Returns the number of objects.
    #[must_use]
    pub fn size(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns the identifiers of all objects in order.
    #[must_use]
    pub fn object_identifiers(&self) -> Vec<MeshObjectIdentifier> {
        let mut identifiers: Vec<_> = self.objects.read().keys().cloned().collect();
        identifiers.sort();
        identifiers
    }

    /// Registers a lifecycle listener.
    pub fn add_lifecycle_listener(&self, listener: Arc<dyn LifecycleListener>) {
        self.lifecycle_listeners.add(listener);
    }

    /// Removes a lifecycle listener.
    pub fn remove_lifecycle_listener(&self, listener: &Arc<dyn LifecycleListener>) -> bool {
        self.lifecycle_listeners.remove(listener)
    }

    /// Declares that `dependent` is derived from `property` of `source`.
    ///
    /// Whenever that property changes, `dependent` is marked dirty with
    /// `updater` and recalculated before the transaction commits.
    pub fn add_projection(
        &self,
        source: &MeshObjectIdentifier,
        property: &MeshTypeIdentifier,
        dependent: &MeshObjectIdentifier,
        updater: Arc<dyn ProjectedPropertyUpdater>,
    ) {
        self.projections.write().push(Projection {
            source: source.clone(),
            property: property.clone(),
            dependent: dependent.clone(),
            updater,
        });
    }

    pub(crate) fn contains(&self, identifier: &MeshObjectIdentifier) -> bool {
        self.objects.read().contains_key(identifier)
    }

    pub(crate) fn read<R>(
        &self,
        identifier: &MeshObjectIdentifier,
        f: impl FnOnce(&ExternalizedMeshObject) -> R,
    ) -> MeshResult<R> {
        self.objects
            .read()
            .get(identifier)
            .map(f)
            .ok_or_else(|| dead(identifier))
    }

    pub(crate) fn bless(
        &self,
        tx: &Transaction,
        identifier: &MeshObjectIdentifier,
        types: &[Arc<EntityType>],
    ) -> MeshResult<()> {
        self.transactions.check_transaction(tx)?;
        if types.is_empty() {
            return Err(MeshError::invalid_operation("no entity types to bless with"));
        }

        let change = {
            let mut objects = self.objects.write();
            let record = objects.get_mut(identifier).ok_or_else(|| dead(identifier))?;

            let mut seen = BTreeSet::new();
            for entity_type in types {
                let type_id = entity_type.identifier();
                if record.entity_types.contains(type_id) || !seen.insert(type_id.clone()) {
                    return Err(MeshError::BlessedAlready {
                        identifier: identifier.clone(),
                        entity_type: type_id.clone(),
                    });
                }
            }

            let old = record.entity_types.clone();
            let mut initialized = BTreeMap::new();
            for entity_type in types {
                record.entity_types.insert(entity_type.identifier().clone());
                for property in entity_type.properties() {
                    let Some(default) = property.default_value() else {
                        continue;
                    };
                    if !record.properties.contains_key(property.identifier()) {
                        record
                            .properties
                            .insert(property.identifier().clone(), default.clone());
                        initialized.insert(property.identifier().clone(), default.clone());
                    }
                }
            }

            Change::types(
                identifier.clone(),
                ChangeDirection::Added,
                old,
                types.iter().map(|t| t.identifier().clone()).collect(),
                record.entity_types.clone(),
                (!initialized.is_empty()).then_some(initialized),
                TimeStamp::now(),
            )?
        };
        self.record(tx, change)
    }

    pub(crate) fn unbless(
        &self,
        tx: &Transaction,
        identifier: &MeshObjectIdentifier,
        types: &[Arc<EntityType>],
    ) -> MeshResult<()> {
        self.transactions.check_transaction(tx)?;
        if types.is_empty() {
            return Err(MeshError::invalid_operation("no entity types to unbless"));
        }

        let change = {
            let mut objects = self.objects.write();
            let record = objects.get_mut(identifier).ok_or_else(|| dead(identifier))?;

            let mut delta = BTreeSet::new();
            for entity_type in types {
                let type_id = entity_type.identifier();
                if !record.entity_types.contains(type_id) || !delta.insert(type_id.clone()) {
                    return Err(MeshError::NotBlessed {
                        identifier: identifier.clone(),
                        entity_type: type_id.clone(),
                    });
                }
            }

            // Properties also declared by a remaining type survive.
            let mut still_declared = BTreeSet::new();
            for type_id in record.entity_types.difference(&delta) {
                let remaining = self.model.find_entity_type(type_id)?;
                still_declared.extend(remaining.properties().iter().map(|p| p.identifier().clone()));
            }

            let old = record.entity_types.clone();
            let mut removed = BTreeMap::new();
            for entity_type in types {
                record.entity_types.remove(entity_type.identifier());
                for property in entity_type.properties() {
                    if still_declared.contains(property.identifier()) {
                        continue;
                    }
                    if let Some(value) = record.properties.remove(property.identifier()) {
                        removed.insert(property.identifier().clone(), value);
                    }
                }
            }

            Change::types(
                identifier.clone(),
                ChangeDirection::Removed,
                old,
                types.iter().map(|t| t.identifier().clone()).collect(),
                record.entity_types.clone(),
                (!removed.is_empty()).then_some(removed),
                TimeStamp::now(),
            )?
        };
        self.record(tx, change)
    }

    pub(crate) fn set_property_value(
        &self,
        tx: &Transaction,
        identifier: &MeshObjectIdentifier,
        property: &Arc<PropertyType>,
        value: Option<PropertyValue>,
    ) -> MeshResult<Option<PropertyValue>> {
        self.transactions.check_transaction(tx)?;

        let (old, change) = {
            let mut objects = self.objects.write();
            let record = objects.get_mut(identifier).ok_or_else(|| dead(identifier))?;

            let mut declared = false;
            for type_id in &record.entity_types {
                if self.model.find_entity_type(type_id)?.declares(property.identifier()) {
                    declared = true;
                    break;
                }
            }
            if !declared {
                return Err(MeshError::IllegalPropertyType {
                    identifier: identifier.clone(),
                    property: property.identifier().clone(),
                });
            }

            let old = match &value {
                Some(v) => record
                    .properties
                    .insert(property.identifier().clone(), v.clone()),
                None => record.properties.remove(property.identifier()),
            };
            if old == value {
                return Ok(old);
            }
            let change = Change::property(
                identifier.clone(),
                property.identifier().clone(),
                old.clone(),
                value,
                TimeStamp::now(),
            );
            (old, change)
        };
        self.record(tx, change)?;
        Ok(old)
    }

    pub(crate) fn relate(
        &self,
        tx: &Transaction,
        identifier: &MeshObjectIdentifier,
        role_types: &[Arc<RoleType>],
        neighbor: &MeshObjectIdentifier,
    ) -> MeshResult<()> {
        self.transactions.check_transaction(tx)?;
        check_roles_and_neighbor(role_types, identifier, neighbor)?;

        let change = {
            let mut objects = self.objects.write();
            if !objects.contains_key(neighbor) {
                return Err(dead(neighbor));
            }
            let record = objects.get_mut(identifier).ok_or_else(|| dead(identifier))?;

            let existing = record.neighbors.get(neighbor);
            let mut seen = BTreeSet::new();
            for role in role_types {
                let already = existing.is_some_and(|roles| roles.contains(role.identifier()));
                if already || !seen.insert(role.identifier().clone()) {
                    return Err(MeshError::RelatedAlready {
                        identifier: identifier.clone(),
                        neighbor: neighbor.clone(),
                    });
                }
            }

            let old: BTreeSet<_> = record.neighbors.keys().cloned().collect();
            record
                .neighbors
                .entry(neighbor.clone())
                .or_default()
                .extend(seen);
            let new: BTreeSet<_> = record.neighbors.keys().cloned().collect();

            if let Some(other) = objects.get_mut(neighbor) {
                other
                    .neighbors
                    .entry(identifier.clone())
                    .or_default()
                    .extend(role_types.iter().map(|r| r.inverse().clone()));
            }

            Change::neighbors(
                identifier.clone(),
                ChangeDirection::Added,
                role_types.iter().map(|r| r.identifier().clone()).collect(),
                old,
                vec![neighbor.clone()],
                new,
                TimeStamp::now(),
            )?
        };
        self.record(tx, change)
    }

    pub(crate) fn unrelate(
        &self,
        tx: &Transaction,
        identifier: &MeshObjectIdentifier,
        role_types: &[Arc<RoleType>],
        neighbor: &MeshObjectIdentifier,
    ) -> MeshResult<()> {
        self.transactions.check_transaction(tx)?;
        check_roles_and_neighbor(role_types, identifier, neighbor)?;

        let change = {
            let mut objects = self.objects.write();
            let record = objects.get_mut(identifier).ok_or_else(|| dead(identifier))?;

            let not_related = || MeshError::NotRelated {
                identifier: identifier.clone(),
                neighbor: neighbor.clone(),
            };
            let existing = record.neighbors.get(neighbor).ok_or_else(not_related)?;
            let mut seen = BTreeSet::new();
            for role in role_types {
                if !existing.contains(role.identifier()) || !seen.insert(role.identifier().clone()) {
                    return Err(not_related());
                }
            }

            let old: BTreeSet<_> = record.neighbors.keys().cloned().collect();
            remove_roles(&mut record.neighbors, neighbor, role_types.iter().map(|r| r.identifier()));
            let new: BTreeSet<_> = record.neighbors.keys().cloned().collect();

            if let Some(other) = objects.get_mut(neighbor) {
                remove_roles(&mut other.neighbors, identifier, role_types.iter().map(|r| r.inverse()));
            }

            Change::neighbors(
                identifier.clone(),
                ChangeDirection::Removed,
                role_types.iter().map(|r| r.identifier().clone()).collect(),
                old,
                vec![neighbor.clone()],
                new,
                TimeStamp::now(),
            )?
        };
        self.record(tx, change)
    }

    pub(crate) fn add_equivalent(
        &self,
        tx: &Transaction,
        identifier: &MeshObjectIdentifier,
        other: &MeshObjectIdentifier,
    ) -> MeshResult<()> {
        self.transactions.check_transaction(tx)?;
        if identifier == other {
            return Err(MeshError::invalid_operation("an object cannot be equivalent to itself"));
        }

        let change = {
            let mut objects = self.objects.write();
            if !objects.contains_key(other) {
                return Err(dead(other));
            }
            let record = objects.get_mut(identifier).ok_or_else(|| dead(identifier))?;
            if record.equivalents.contains(other) {
                return Err(MeshError::EquivalentAlready {
                    identifier: identifier.clone(),
                    other: other.clone(),
                });
            }

            let old = record.equivalents.clone();
            record.equivalents.insert(other.clone());
            let new = record.equivalents.clone();
            if let Some(record) = objects.get_mut(other) {
                record.equivalents.insert(identifier.clone());
            }

            Change::equivalents(
                identifier.clone(),
                ChangeDirection::Added,
                old,
                vec![other.clone()],
                new,
                TimeStamp::now(),
            )?
        };
        self.record(tx, change)
    }

    pub(crate) fn remove_equivalent(
        &self,
        tx: &Transaction,
        identifier: &MeshObjectIdentifier,
        other: &MeshObjectIdentifier,
    ) -> MeshResult<()> {
        self.transactions.check_transaction(tx)?;

        let change = {
            let mut objects = self.objects.write();
            let record = objects.get_mut(identifier).ok_or_else(|| dead(identifier))?;
            if !record.equivalents.contains(other) {
                return Err(MeshError::NotEquivalent {
                    identifier: identifier.clone(),
                    other: other.clone(),
                });
            }

            let old = record.equivalents.clone();
            record.equivalents.remove(other);
            let new = record.equivalents.clone();
            if let Some(record) = objects.get_mut(other) {
                record.equivalents.remove(identifier);
            }

            Change::equivalents(
                identifier.clone(),
                ChangeDirection::Removed,
                old,
                vec![other.clone()],
                new,
                TimeStamp::now(),
            )?
        };
        self.record(tx, change)
    }

    pub(crate) fn set_state(
        &self,
        tx: &Transaction,
        identifier: &MeshObjectIdentifier,
        state: ObjectState,
    ) -> MeshResult<()> {
        self.transactions.check_transaction(tx)?;

        let change = {
            let mut objects = self.objects.write();
            let record = objects.get_mut(identifier).ok_or_else(|| dead(identifier))?;
            let old = record.state;
            if old == state {
                return Ok(());
            }
            record.state = state;
            Change::state(identifier.clone(), old, state, TimeStamp::now())
        };
        self.record(tx, change)
    }

    fn handle(&self, identifier: MeshObjectIdentifier) -> MeshObjectRef {
        Arc::new(MMeshObject::new(
            identifier,
            self.identifier.clone(),
            self.this.clone(),
        ))
    }

    // Called with no lock on the object map held.
    fn record(&self, tx: &Transaction, change: Change) -> MeshResult<()> {
        if let Some(this) = self.this.upgrade() {
            let resolver: Arc<dyn MeshBase> = this;
            change.set_resolver(resolver);
        }
        trace!(base = %self.identifier, change = %change, "recording change");

        if let ChangeKind::Property { property, .. } = change.kind() {
            let dirty: Vec<_> = self
                .projections
                .read()
                .iter()
                .filter(|p| &p.source == change.affected_identifier() && &p.property == property)
                .map(|p| (p.dependent.clone(), Arc::clone(&p.updater)))
                .collect();
            tx.add_change(change.clone())?;
            for (dependent, updater) in dirty {
                if let Some(object) = self.find_object(&dependent) {
                    tx.add_dirty_object(&object, &updater, &change);
                }
            }
            return Ok(());
        }
        tx.add_change(change)
    }

    // Only the transaction that captured the image may consume it.
    fn take_rollback_image(&self, tx: &Transaction) -> Option<ObjectMap> {
        let mut image = self.rollback_image.lock();
        match image.take() {
            Some((owner, objects)) if owner == tx.id() => Some(objects),
            other => {
                *image = other;
                None
            }
        }
    }

    // Keeps only the neighbors and equivalents that exist here and mirrors
    // them onto the other side.
    fn reconcile(&self, objects: &mut ObjectMap, snapshot: &ExternalizedMeshObject) -> MeshResult<ExternalizedMeshObject> {
        let identifier = &snapshot.identifier;
        let mut fixed = snapshot.clone();
        fixed.neighbors.retain(|neighbor, _| objects.contains_key(neighbor));
        fixed.equivalents.retain(|other| objects.contains_key(other));

        for (neighbor, roles) in &fixed.neighbors {
            let mut inverses = BTreeSet::new();
            for role in roles {
                inverses.insert(self.model.find_role_type(role)?.inverse().clone());
            }
            if let Some(record) = objects.get_mut(neighbor) {
                record
                    .neighbors
                    .entry(identifier.clone())
                    .or_default()
                    .extend(inverses);
            }
        }
        for other in &fixed.equivalents {
            if let Some(record) = objects.get_mut(other) {
                record.equivalents.insert(identifier.clone());
            }
        }
        Ok(fixed)
    }
}

fn dead(identifier: &MeshObjectIdentifier) -> MeshError {
    MeshError::ObjectDead {
        identifier: identifier.clone(),
    }
}

fn check_roles_and_neighbor(
    role_types: &[Arc<RoleType>],
    identifier: &MeshObjectIdentifier,
    neighbor: &MeshObjectIdentifier,
) -> MeshResult<()> {
    if role_types.is_empty() {
        return Err(MeshError::invalid_operation("no role types given"));
    }
    if identifier == neighbor {
        return Err(MeshError::invalid_operation("an object cannot be its own neighbor"));
    }
    Ok(())
}

fn remove_roles<'a>(
    neighbors: &mut BTreeMap<MeshObjectIdentifier, BTreeSet<MeshTypeIdentifier>>,
    neighbor: &MeshObjectIdentifier,
    roles: impl Iterator<Item = &'a MeshTypeIdentifier>,
) {
    if let Some(current) = neighbors.get_mut(neighbor) {
        for role in roles {
            current.remove(role);
        }
        if current.is_empty() {
            neighbors.remove(neighbor);
        }
    }
}

impl LifecycleManager for MMeshBase {
    fn create_object(
        &self,
        tx: &Transaction,
        identifier: Option<MeshObjectIdentifier>,
    ) -> MeshResult<MeshObjectRef> {
        self.transactions.check_transaction(tx)?;
        let identifier = identifier.unwrap_or_else(MeshObjectIdentifier::random);

        let snapshot = {
            let mut objects = self.objects.write();
            if objects.contains_key(&identifier) {
                return Err(MeshError::MeshObjectExists { identifier });
            }
            let snapshot = ExternalizedMeshObject::new(identifier.clone(), TimeStamp::now());
            objects.insert(identifier.clone(), snapshot.clone());
            snapshot
        };
        let time = snapshot.created_at;
        self.record(tx, Change::created(snapshot, time))?;
        Ok(self.handle(identifier))
    }

    fn recreate_object(&self, tx: &Transaction, snapshot: &ExternalizedMeshObject) -> MeshResult<MeshObjectRef> {
        self.transactions.check_transaction(tx)?;
        let identifier = snapshot.identifier.clone();

        let recreated = {
            let mut objects = self.objects.write();
            if objects.contains_key(&identifier) {
                return Err(MeshError::MeshObjectExists { identifier });
            }
            let recreated = self.reconcile(&mut objects, snapshot)?;
            objects.insert(identifier.clone(), recreated.clone());
            recreated
        };
        self.record(tx, Change::created(recreated, TimeStamp::now()))?;
        Ok(self.handle(identifier))
    }

    fn delete_object(&self, tx: &Transaction, object: &MeshObjectRef) -> MeshResult<()> {
        self.transactions.check_transaction(tx)?;
        let identifier = object.identifier();

        let snapshot = {
            let mut objects = self.objects.write();
            let snapshot = objects.remove(identifier).ok_or_else(|| dead(identifier))?;
            for neighbor in snapshot.neighbors.keys() {
                if let Some(record) = objects.get_mut(neighbor) {
                    record.neighbors.remove(identifier);
                }
            }
            for other in &snapshot.equivalents {
                if let Some(record) = objects.get_mut(other) {
                    record.equivalents.remove(identifier);
                }
            }
            snapshot
        };
        self.record(tx, Change::deleted(snapshot, TimeStamp::now()))
    }
}

impl Transactable for MMeshBase {
    fn transaction_started(&self, tx: &Transaction) {
        *self.rollback_image.lock() = Some((tx.id(), self.objects.read().clone()));
        trace!(txid = %tx.id(), base = %self.identifier, "captured rollback image");
    }

    fn transaction_committed(&self, tx: &Transaction) {
        self.take_rollback_image(tx);

        let listeners = self.lifecycle_listeners.snapshot();
        if listeners.is_empty() {
            return;
        }
        for change in &tx.change_set() {
            match change.kind() {
                ChangeKind::Created { .. } => listeners.iter().for_each(|l| l.created(change)),
                ChangeKind::Deleted { .. } => listeners.iter().for_each(|l| l.deleted(change)),
                _ => {}
            }
        }
    }

    fn transaction_rolled_back(&self, tx: &Transaction, _cause: Option<&MeshError>) {
        if let Some(image) = self.take_rollback_image(tx) {
            *self.objects.write() = image;
            debug!(txid = %tx.id(), base = %self.identifier, "restored objects after rollback");
        }
    }
}

impl MeshBase for MMeshBase {
    fn identifier(&self) -> &MeshBaseIdentifier {
        &self.identifier
    }

    fn find_object(&self, identifier: &MeshObjectIdentifier) -> Option<MeshObjectRef> {
        self.contains(identifier)
            .then(|| self.handle(identifier.clone()))
    }

    fn lifecycle_manager(&self) -> &dyn LifecycleManager {
        self
    }

    fn model_base(&self) -> &dyn ModelBase {
        self.model.as_ref()
    }

    fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }
}

impl fmt::Debug for MMeshBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MMeshBase")
            .field("identifier", &self.identifier)
            .field("objects", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        base: Arc<MMeshBase>,
        person: Arc<EntityType>,
        name: Arc<PropertyType>,
        knows: Arc<RoleType>,
    }

    fn fixture() -> Fixture {
        let model = Arc::new(MModelBase::new());
        let name = Arc::new(PropertyType::new("Name", Some(PropertyValue::from("anonymous"))));
        let person = model.add_entity_type(EntityType::new("Person", vec![Arc::clone(&name)]));
        let (knows, _) = model.add_relationship_type("Knows-S", "Knows-D");
        let base = MMeshBase::create(MeshBaseIdentifier::new("test"), model, Config::default());
        Fixture {
            base,
            person,
            name,
            knows,
        }
    }

    #[test]
    fn mutation_outside_transaction_fails() {
        let f = fixture();
        let tx = f.base.transactions().create_transaction_now().unwrap();
        let object = f.base.create_object(&tx, Some("a".into())).unwrap();
        tx.commit().unwrap();

        assert!(matches!(
            object.bless(&tx, &[f.person.clone()]),
            Err(MeshError::NotWithinTransactionBoundaries { .. })
        ));
    }

    #[test]
    fn bless_initializes_defaults_and_records_them() {
        let f = fixture();
        let tx = f.base.transactions().create_transaction_now().unwrap();
        let object = f.base.create_object(&tx, Some("a".into())).unwrap();
        object.bless(&tx, &[f.person.clone()]).unwrap();

        assert_eq!(
            object.property_value(f.name.identifier()).unwrap(),
            Some(PropertyValue::from("anonymous"))
        );
        let changes = tx.change_set();
        let ChangeKind::Types { properties, .. } = changes.get(1).unwrap().kind() else {
            panic!("expected a types change");
        };
        assert_eq!(properties.as_ref().map(BTreeMap::len), Some(1));
        tx.commit().unwrap();
    }

    #[test]
    fn undeclared_property_is_rejected() {
        let f = fixture();
        let tx = f.base.transactions().create_transaction_now().unwrap();
        let object = f.base.create_object(&tx, None).unwrap();
        assert!(matches!(
            object.set_property_value(&tx, &f.name, Some(PropertyValue::from("x"))),
            Err(MeshError::IllegalPropertyType { .. })
        ));
        tx.rollback(None).unwrap();
    }

    #[test]
    fn relate_is_mirrored_on_the_neighbor() {
        let f = fixture();
        let tx = f.base.transactions().create_transaction_now().unwrap();
        let a = f.base.create_object(&tx, Some("a".into())).unwrap();
        let b = f.base.create_object(&tx, Some("b".into())).unwrap();
        a.relate(&tx, &[f.knows.clone()], &b).unwrap();

        assert!(b.role_types(a.identifier()).unwrap().contains(&"Knows-D".into()));
        assert!(matches!(
            a.relate(&tx, &[f.knows.clone()], &b),
            Err(MeshError::RelatedAlready { .. })
        ));

        a.unrelate(&tx, &[f.knows.clone()], &b).unwrap();
        assert!(a.neighbor_identifiers().unwrap().is_empty());
        assert!(b.neighbor_identifiers().unwrap().is_empty());
        tx.commit().unwrap();
    }

    #[test]
    fn rollback_restores_objects() {
        let f = fixture();
        let tx = f.base.transactions().create_transaction_now().unwrap();
        let a = f.base.create_object(&tx, Some("a".into())).unwrap();
        tx.commit().unwrap();

        let tx = f.base.transactions().create_transaction_now().unwrap();
        a.bless(&tx, &[f.person.clone()]).unwrap();
        f.base.create_object(&tx, Some("b".into())).unwrap();
        tx.rollback(None).unwrap();

        assert_eq!(f.base.size(), 1);
        assert!(a.entity_types().unwrap().is_empty());
    }

    #[test]
    fn delete_detaches_neighbors_and_kills_handle() {
        let f = fixture();
        let tx = f.base.transactions().create_transaction_now().unwrap();
        let a = f.base.create_object(&tx, Some("a".into())).unwrap();
        let b = f.base.create_object(&tx, Some("b".into())).unwrap();
        a.relate(&tx, &[f.knows.clone()], &b).unwrap();
        a.add_equivalent(&tx, &b).unwrap();
        f.base.delete_object(&tx, &a).unwrap();
        tx.commit().unwrap();

        assert!(a.is_dead());
        assert!(matches!(a.state(), Err(MeshError::ObjectDead { .. })));
        assert!(b.neighbor_identifiers().unwrap().is_empty());
        assert!(b.equivalent_identifiers().unwrap().is_empty());
    }

    #[test]
    fn recreate_restores_both_sides() {
        let f = fixture();
        let tx = f.base.transactions().create_transaction_now().unwrap();
        let a = f.base.create_object(&tx, Some("a".into())).unwrap();
        let b = f.base.create_object(&tx, Some("b".into())).unwrap();
        a.relate(&tx, &[f.knows.clone()], &b).unwrap();
        let snapshot = a.externalize().unwrap();
        f.base.delete_object(&tx, &a).unwrap();

        f.base.recreate_object(&tx, &snapshot).unwrap();
        assert_eq!(a.externalize().unwrap(), snapshot);
        assert!(b.neighbor_identifiers().unwrap().contains(a.identifier()));
        tx.commit().unwrap();
    }

    #[test]
    fn unchanged_values_record_nothing() {
        let f = fixture();
        let tx = f.base.transactions().create_transaction_now().unwrap();
        let a = f.base.create_object(&tx, None).unwrap();
        a.bless(&tx, &[f.person.clone()]).unwrap();
        let before = tx.change_set().len();

        a.set_property_value(&tx, &f.name, Some(PropertyValue::from("anonymous")))
            .unwrap();
        a.set_state(&tx, ObjectState::Live).unwrap();
        assert_eq!(tx.change_set().len(), before);
        tx.commit().unwrap();
    }
}
