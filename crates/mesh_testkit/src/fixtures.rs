//! Test fixtures and mesh helpers.
//!
//! Provides a small model, an in-memory mesh base built on it, projected
//! property updaters and listeners that record what they see.

use mesh_core::memory::{MMeshBase, MModelBase};
use mesh_core::{
    Change, ChangeSet, Config, EntityType, ExternalizedMeshObject, LifecycleListener,
    LifecycleManager, MeshBase, MeshBaseIdentifier, MeshError, MeshObject, MeshObjectIdentifier,
    MeshObjectRef, MeshResult, ModelBase, ObjectState, ProjectedPropertyUpdater, PropertyType,
    PropertyValue, RoleType, Transactable, Transaction, TransactionListener, TransactionManager,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Installs a test-friendly tracing subscriber once.
///
/// Honors `RUST_LOG`; repeated calls are harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Identifier of the `index`-th object used by generated scripts.
pub fn object_id(index: usize) -> MeshObjectIdentifier {
    MeshObjectIdentifier::new(format!("o{index}"))
}

/// The test model plus an in-memory mesh base using it.
///
/// - `Person` declares `Name` (defaults to `"anonymous"`) and `Age`
/// - `Cell` declares `Value` (defaults to `0`), used for projections
/// - `Knows-S` / `Knows-D` form one relationship type
pub struct TestMesh {
    /// The mesh base.
    pub base: Arc<MMeshBase>,
    /// The model base shared by every base this fixture creates.
    pub model: Arc<MModelBase>,
    /// The `Person` entity type.
    pub person: Arc<EntityType>,
    /// `Person.Name`.
    pub name: Arc<PropertyType>,
    /// `Person.Age`.
    pub age: Arc<PropertyType>,
    /// The `Cell` entity type.
    pub cell: Arc<EntityType>,
    /// `Cell.Value`.
    pub value: Arc<PropertyType>,
    /// Source role of the `Knows` relationship.
    pub knows: Arc<RoleType>,
    /// Destination role of the `Knows` relationship.
    pub known_by: Arc<RoleType>,
}

impl TestMesh {
    /// Creates a mesh with the default configuration.
    pub fn new() -> Self {
        Self::with_config("test", Config::default())
    }

    /// Creates a mesh with a custom configuration.
    pub fn with_config(name: &str, config: Config) -> Self {
        let model = Arc::new(MModelBase::new());
        let name_property = Arc::new(PropertyType::new(
            "Name",
            Some(PropertyValue::from("anonymous")),
        ));
        let age = Arc::new(PropertyType::new("Age", None));
        let person = model.add_entity_type(EntityType::new(
            "Person",
            vec![Arc::clone(&name_property), Arc::clone(&age)],
        ));
        let value = Arc::new(PropertyType::new("Value", Some(PropertyValue::Integer(0))));
        let cell = model.add_entity_type(EntityType::new("Cell", vec![Arc::clone(&value)]));
        let (knows, known_by) = model.add_relationship_type("Knows-S", "Knows-D");

        let resolver: Arc<dyn ModelBase> = model.clone();
        let base = MMeshBase::create(MeshBaseIdentifier::new(name), resolver, config);
        Self {
            base,
            model,
            person,
            name: name_property,
            age,
            cell,
            value,
            knows,
            known_by,
        }
    }

    /// Creates another empty mesh base sharing this model.
    pub fn sibling(&self, name: &str) -> Arc<MMeshBase> {
        let resolver: Arc<dyn ModelBase> = self.model.clone();
        MMeshBase::create(MeshBaseIdentifier::new(name), resolver, Config::default())
    }

    /// Returns the base as a trait object.
    pub fn dyn_base(&self) -> Arc<dyn MeshBase> {
        self.base.clone()
    }

    /// Returns the transaction manager of the base.
    pub fn transactions(&self) -> &TransactionManager {
        self.base.transactions()
    }

    /// Runs `f` in a fresh transaction, commits it and returns the recorded
    /// changes.
    pub fn in_transaction<R>(&self, f: impl FnOnce(&Transaction) -> R) -> (R, ChangeSet) {
        let tx = self
            .transactions()
            .create_transaction_now()
            .expect("Failed to create transaction");
        let result = f(&tx);
        tx.commit().expect("Failed to commit transaction");
        (result, tx.change_set())
    }

    /// Creates a `Cell` object.
    pub fn create_cell(&self, tx: &Transaction, id: &str) -> MeshObjectRef {
        let object = self
            .base
            .create_object(tx, Some(MeshObjectIdentifier::new(id)))
            .expect("Failed to create cell");
        object
            .bless(tx, &[Arc::clone(&self.cell)])
            .expect("Failed to bless cell");
        object
    }

    /// Creates a blessed `Person` object.
    pub fn create_person(&self, tx: &Transaction, id: &str) -> MeshObjectRef {
        let object = self
            .base
            .create_object(tx, Some(MeshObjectIdentifier::new(id)))
            .expect("Failed to create person");
        object
            .bless(tx, &[Arc::clone(&self.person)])
            .expect("Failed to bless person");
        object
    }

    /// Finds an object that must exist.
    pub fn object(&self, id: &str) -> MeshObjectRef {
        self.base
            .find_object(&MeshObjectIdentifier::new(id))
            .expect("Object should exist")
    }

    /// Performs one scripted mutation.
    ///
    /// Objects are addressed by index through [`object_id`]. Mutations whose
    /// objects do not exist fail without recording anything.
    pub fn apply_mutation(&self, tx: &Transaction, mutation: &Mutation) -> MeshResult<()> {
        let find = |index: usize| {
            let identifier = object_id(index);
            self.base
                .find_object(&identifier)
                .ok_or(MeshError::MeshObjectNotFound { identifier })
        };
        let person = [Arc::clone(&self.person)];
        let knows = [Arc::clone(&self.knows)];

        match mutation {
            Mutation::Create(i) => self.base.create_object(tx, Some(object_id(*i))).map(drop),
            Mutation::Delete(i) => self.base.delete_object(tx, &find(*i)?),
            Mutation::Bless(i) => find(*i)?.bless(tx, &person),
            Mutation::Unbless(i) => find(*i)?.unbless(tx, &person),
            Mutation::SetName(i, name) => find(*i)?
                .set_property_value(tx, &self.name, Some(PropertyValue::from(name.as_str())))
                .map(drop),
            Mutation::SetAge(i, age) => find(*i)?
                .set_property_value(tx, &self.age, age.map(PropertyValue::Integer))
                .map(drop),
            Mutation::Relate(a, b) => find(*a)?.relate(tx, &knows, &find(*b)?),
            Mutation::Unrelate(a, b) => find(*a)?.unrelate(tx, &knows, &find(*b)?),
            Mutation::AddEquivalent(a, b) => find(*a)?.add_equivalent(tx, &find(*b)?),
            Mutation::RemoveEquivalent(a, b) => find(*a)?.remove_equivalent(tx, &find(*b)?),
            Mutation::SetState(i, state) => find(*i)?.set_state(tx, *state),
        }
    }
}

impl Default for TestMesh {
    fn default() -> Self {
        Self::new()
    }
}

/// One step of a generated mutation script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Create object `i`.
    Create(usize),
    /// Delete object `i`.
    Delete(usize),
    /// Bless object `i` with `Person`.
    Bless(usize),
    /// Unbless `Person` from object `i`.
    Unbless(usize),
    /// Set `Name` of object `i`.
    SetName(usize, String),
    /// Set or clear `Age` of object `i`.
    SetAge(usize, Option<i64>),
    /// Relate object `a` to `b` as `Knows-S`.
    Relate(usize, usize),
    /// Undo a `Relate`.
    Unrelate(usize, usize),
    /// Make two objects equivalent.
    AddEquivalent(usize, usize),
    /// Undo an `AddEquivalent`.
    RemoveEquivalent(usize, usize),
    /// Set the state of object `i`.
    SetState(usize, ObjectState),
}

/// Snapshots every object of `base`, ordered by identifier.
pub fn snapshot_all(base: &MMeshBase) -> Vec<ExternalizedMeshObject> {
    base.object_identifiers()
        .iter()
        .map(|id| {
            base.find_object(id)
                .expect("Listed object should exist")
                .externalize()
                .expect("Listed object should be alive")
        })
        .collect()
}

/// Sets the projected `property` of a dependent to the source's value plus
/// one, and counts how often each dependent was recalculated.
pub struct CopyPlusOne {
    property: Arc<PropertyType>,
    calls: Mutex<HashMap<MeshObjectIdentifier, usize>>,
}

impl CopyPlusOne {
    /// Creates an updater for an integer `property`.
    pub fn new(property: Arc<PropertyType>) -> Arc<Self> {
        Arc::new(Self {
            property,
            calls: Mutex::new(HashMap::new()),
        })
    }

    /// Returns how often `object` was recalculated.
    pub fn calls_for(&self, object: &str) -> usize {
        self.calls
            .lock()
            .get(&MeshObjectIdentifier::new(object))
            .copied()
            .unwrap_or(0)
    }

    /// Returns the total number of recalculations.
    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }
}

impl ProjectedPropertyUpdater for CopyPlusOne {
    fn update(&self, tx: &Transaction, object: &MeshObjectRef, event: &Change) -> MeshResult<()> {
        *self
            .calls
            .lock()
            .entry(object.identifier().clone())
            .or_default() += 1;

        let source = event
            .affected_object()?
            .property_value(self.property.identifier())?
            .and_then(|v| v.as_integer())
            .unwrap_or(0);
        object.set_property_value(tx, &self.property, Some(PropertyValue::Integer(source + 1)))?;
        Ok(())
    }
}

/// Records transaction notifications as `"<label>:<event>:<txid>"`.
pub struct RecordingListener {
    label: &'static str,
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingListener {
    /// Creates a listener appending to a shared log.
    pub fn new(label: &'static str, events: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self { label, events })
    }

    fn push(&self, event: &str, tx: &Transaction) {
        self.events
            .lock()
            .push(format!("{}:{}:{}", self.label, event, tx.id()));
    }
}

impl TransactionListener for RecordingListener {
    fn transaction_started(&self, tx: &Transaction) -> MeshResult<()> {
        self.push("started", tx);
        Ok(())
    }

    fn transaction_committed(&self, tx: &Transaction) -> MeshResult<()> {
        self.push("committed", tx);
        Ok(())
    }

    fn transaction_rolled_back(&self, tx: &Transaction, _cause: Option<&MeshError>) -> MeshResult<()> {
        self.push("rolled_back", tx);
        Ok(())
    }
}

/// Records the identifiers of created and deleted objects.
#[derive(Default)]
pub struct LifecycleRecorder {
    /// Objects reported as created.
    pub created: Mutex<Vec<MeshObjectIdentifier>>,
    /// Objects reported as deleted.
    pub deleted: Mutex<Vec<MeshObjectIdentifier>>,
}

impl LifecycleListener for LifecycleRecorder {
    fn created(&self, event: &Change) {
        self.created.lock().push(event.affected_identifier().clone());
    }

    fn deleted(&self, event: &Change) {
        self.deleted.lock().push(event.affected_identifier().clone());
    }
}

/// A resolver that forwards to another mesh base and counts object lookups.
#[derive(Debug)]
pub struct CountingBase {
    inner: Arc<MMeshBase>,
    lookups: AtomicUsize,
}

impl CountingBase {
    /// Wraps `inner`.
    pub fn new(inner: Arc<MMeshBase>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            lookups: AtomicUsize::new(0),
        })
    }

    /// Returns the number of object lookups so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl Transactable for CountingBase {}

impl MeshBase for CountingBase {
    fn identifier(&self) -> &MeshBaseIdentifier {
        self.inner.identifier()
    }

    fn find_object(&self, identifier: &MeshObjectIdentifier) -> Option<MeshObjectRef> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.find_object(identifier)
    }

    fn lifecycle_manager(&self) -> &dyn LifecycleManager {
        self.inner.lifecycle_manager()
    }

    fn model_base(&self) -> &dyn ModelBase {
        self.inner.model_base()
    }

    fn transactions(&self) -> &TransactionManager {
        self.inner.transactions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_transaction_returns_changes() {
        let mesh = TestMesh::new();
        let (object, changes) = mesh.in_transaction(|tx| mesh.create_person(tx, "alice"));
        assert_eq!(changes.len(), 2);
        assert!(changes.is_frozen());
        assert_eq!(
            object.property_value(mesh.name.identifier()).unwrap(),
            Some(PropertyValue::from("anonymous"))
        );
    }

    #[test]
    fn test_mutation_on_missing_object_records_nothing() {
        let mesh = TestMesh::new();
        let (result, changes) = mesh.in_transaction(|tx| mesh.apply_mutation(tx, &Mutation::Bless(3)));
        assert!(matches!(result, Err(MeshError::MeshObjectNotFound { .. })));
        assert!(changes.is_empty());
    }

    #[test]
    fn test_counting_base_counts_lookups() {
        let mesh = TestMesh::new();
        mesh.in_transaction(|tx| mesh.create_cell(tx, "c"));
        let counting = CountingBase::new(mesh.base.clone());
        assert!(counting.find_object(&"c".into()).is_some());
        assert_eq!(counting.lookups(), 1);
    }
}
