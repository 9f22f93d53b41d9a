//! Elemental mutation records.
//!
//! Every mutation of a mesh object is recorded as one [`Change`] in the
//! active transaction. A change carries only identifiers, values and a
//! timestamp, so it can be persisted, shipped to another mesh base and
//! replayed there with [`Change::apply_to`]. Its live counterparts (the
//! affected object, the role or property type, the old/delta/new members)
//! are resolved lazily through a resolver and cached until the resolver is
//! swapped.
//!
//! # Example
//!
//! ```ignore
//! let change = tx.change_set().get(0)?.clone();
//! change.set_resolver(other_base.clone());
//! let object = change.affected_object()?;
//! change.inverse().map(|undo| undo.apply_to(&other_base));
//! ```

mod apply;
mod kind;
mod resolution;

pub use kind::{ChangeDirection, ChangeKind};
pub use resolution::{Aspect, Resolution, ResolvedValue};

use crate::error::{MeshError, MeshResult};
use crate::mesh::{ExternalizedMeshObject, MeshBase, MeshObjectRef, ObjectState};
use crate::types::{MeshObjectIdentifier, MeshTypeIdentifier, TimeStamp};
use crate::value::PropertyValue;
use mesh_codec::{CodecResult, Decode, Encode};
use parking_lot::Mutex;
use resolution::ResolutionCache;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A single recorded mutation.
#[derive(Serialize, Deserialize)]
pub struct Change {
    affected: MeshObjectIdentifier,
    time: TimeStamp,
    kind: ChangeKind,
    #[serde(skip)]
    cache: Mutex<ResolutionCache>,
}

impl Change {
    fn from_parts(affected: MeshObjectIdentifier, time: TimeStamp, kind: ChangeKind) -> Self {
        Self {
            affected,
            time,
            kind,
            cache: Mutex::new(ResolutionCache::default()),
        }
    }

    /// Records the creation of an object.
    #[must_use]
    pub fn created(snapshot: ExternalizedMeshObject, time: TimeStamp) -> Self {
        Self::from_parts(
            snapshot.identifier.clone(),
            time,
            ChangeKind::Created { snapshot },
        )
    }

    /// Records the deletion of an object.
    #[must_use]
    pub fn deleted(snapshot: ExternalizedMeshObject, time: TimeStamp) -> Self {
        Self::from_parts(
            snapshot.identifier.clone(),
            time,
            ChangeKind::Deleted { snapshot },
        )
    }

    /// Records neighbors related or unrelated under role types.
    ///
    /// # Errors
    ///
    /// Fails with [`MeshError::InvalidChange`] if the delta is empty or has
    /// duplicates, or if no role type is given.
    pub fn neighbors(
        affected: MeshObjectIdentifier,
        direction: ChangeDirection,
        role_types: Vec<MeshTypeIdentifier>,
        old: BTreeSet<MeshObjectIdentifier>,
        delta: Vec<MeshObjectIdentifier>,
        new: BTreeSet<MeshObjectIdentifier>,
        time: TimeStamp,
    ) -> MeshResult<Self> {
        if role_types.is_empty() {
            return Err(MeshError::invalid_change(
                "neighbor change without role types",
            ));
        }
        let role_types = distinct(role_types, "role types")?;
        let delta = distinct(delta, "neighbors")?;
        Ok(Self::from_parts(
            affected,
            time,
            ChangeKind::Neighbors {
                direction,
                role_types,
                old,
                delta,
                new,
            },
        ))
    }

    /// Records entity types blessed or unblessed.
    ///
    /// `properties` holds the values blessing created, or the values
    /// unblessing removed.
    ///
    /// # Errors
    ///
    /// Fails with [`MeshError::InvalidChange`] if the delta is empty or has
    /// duplicates.
    pub fn types(
        affected: MeshObjectIdentifier,
        direction: ChangeDirection,
        old: BTreeSet<MeshTypeIdentifier>,
        delta: Vec<MeshTypeIdentifier>,
        new: BTreeSet<MeshTypeIdentifier>,
        properties: Option<BTreeMap<MeshTypeIdentifier, PropertyValue>>,
        time: TimeStamp,
    ) -> MeshResult<Self> {
        let delta = distinct(delta, "entity types")?;
        Ok(Self::from_parts(
            affected,
            time,
            ChangeKind::Types {
                direction,
                old,
                delta,
                new,
                properties,
            },
        ))
    }

    /// Records equivalents added or removed.
    ///
    /// # Errors
    ///
    /// Fails with [`MeshError::InvalidChange`] if the delta is empty or has
    /// duplicates.
    pub fn equivalents(
        affected: MeshObjectIdentifier,
        direction: ChangeDirection,
        old: BTreeSet<MeshObjectIdentifier>,
        delta: Vec<MeshObjectIdentifier>,
        new: BTreeSet<MeshObjectIdentifier>,
        time: TimeStamp,
    ) -> MeshResult<Self> {
        let delta = distinct(delta, "equivalents")?;
        Ok(Self::from_parts(
            affected,
            time,
            ChangeKind::Equivalents {
                direction,
                old,
                delta,
                new,
            },
        ))
    }

    /// Records a state transition.
    #[must_use]
    pub fn state(
        affected: MeshObjectIdentifier,
        old: ObjectState,
        new: ObjectState,
        time: TimeStamp,
    ) -> Self {
        Self::from_parts(affected, time, ChangeKind::State { old, new })
    }

    /// Records a property value change.
    #[must_use]
    pub fn property(
        affected: MeshObjectIdentifier,
        property: MeshTypeIdentifier,
        old: Option<PropertyValue>,
        new: Option<PropertyValue>,
        time: TimeStamp,
    ) -> Self {
        Self::from_parts(affected, time, ChangeKind::Property { property, old, new })
    }

    /// Returns the identifier of the affected object.
    #[must_use]
    pub fn affected_identifier(&self) -> &MeshObjectIdentifier {
        &self.affected
    }

    /// Returns when the change occurred.
    #[must_use]
    pub fn time(&self) -> TimeStamp {
        self.time
    }

    /// Returns the payload.
    #[must_use]
    pub fn kind(&self) -> &ChangeKind {
        &self.kind
    }

    /// Binds the resolver. A different resolver resets every cached value.
    pub fn set_resolver(&self, resolver: Arc<dyn MeshBase>) {
        self.cache.lock().bind(Some(resolver));
    }

    /// Unbinds the resolver and resets every cached value.
    pub fn clear_resolver(&self) {
        self.cache.lock().bind(None);
    }

    /// Returns the bound resolver.
    #[must_use]
    pub fn resolver(&self) -> Option<Arc<dyn MeshBase>> {
        self.cache.lock().resolver.clone()
    }

    /// Resolves the affected object.
    ///
    /// # Errors
    ///
    /// [`MeshError::SourceUnresolved`] if no resolver is bound or it does not
    /// know the object.
    pub fn affected_object(&self) -> MeshResult<MeshObjectRef> {
        let unresolved = || MeshError::SourceUnresolved {
            identifier: self.affected.clone(),
        };
        self.resolve_cached(ResolutionCache::affected_mut, unresolved, |base| {
            base.find_object(&self.affected).ok_or_else(unresolved)
        })
    }

    /// Resolves the aspect that changed.
    ///
    /// # Errors
    ///
    /// [`MeshError::PropertyUnresolved`] if a role or property type cannot be
    /// found.
    pub fn aspect(&self) -> MeshResult<Aspect> {
        match &self.kind {
            ChangeKind::Created { .. } | ChangeKind::Deleted { .. } => Ok(Aspect::Lifecycle),
            ChangeKind::Types { .. } => Ok(Aspect::EntityTypes),
            ChangeKind::Equivalents { .. } => Ok(Aspect::Equivalents),
            ChangeKind::State { .. } => Ok(Aspect::State),
            ChangeKind::Neighbors { role_types, .. } => {
                let unresolved = || MeshError::PropertyUnresolved {
                    identifier: role_types.iter().next().cloned().unwrap_or_else(|| {
                        MeshTypeIdentifier::new("")
                    }),
                };
                self.resolve_cached(ResolutionCache::aspect_mut, unresolved, |base| {
                    role_types
                        .iter()
                        .map(|id| {
                            base.model_base().find_role_type(id).map_err(|_| {
                                MeshError::PropertyUnresolved {
                                    identifier: id.clone(),
                                }
                            })
                        })
                        .collect::<MeshResult<Vec<_>>>()
                        .map(Aspect::RoleTypes)
                })
            }
            ChangeKind::Property { property, .. } => {
                let unresolved = || MeshError::PropertyUnresolved {
                    identifier: property.clone(),
                };
                self.resolve_cached(ResolutionCache::aspect_mut, unresolved, |base| {
                    base.model_base()
                        .find_property_type(property)
                        .map(Aspect::Property)
                        .map_err(|_| unresolved())
                })
            }
        }
    }

    /// Resolves the value before the change.
    ///
    /// # Errors
    ///
    /// [`MeshError::ValueUnresolved`] if a member cannot be found.
    pub fn old_value(&self) -> MeshResult<ResolvedValue> {
        match &self.kind {
            ChangeKind::Created { .. } => Ok(ResolvedValue::Nothing),
            ChangeKind::Deleted { snapshot } => Ok(ResolvedValue::Snapshot(snapshot.clone())),
            ChangeKind::State { old, .. } => Ok(ResolvedValue::State(*old)),
            ChangeKind::Property { old, .. } => Ok(ResolvedValue::Property(old.clone())),
            ChangeKind::Neighbors { old, .. } | ChangeKind::Equivalents { old, .. } => {
                self.resolve_objects(ResolutionCache::old_mut, old, "old")
            }
            ChangeKind::Types { old, .. } => self.resolve_types(ResolutionCache::old_mut, old, "old"),
        }
    }

    /// Resolves the members added or removed.
    ///
    /// # Errors
    ///
    /// [`MeshError::ValueUnresolved`] if a member cannot be found.
    pub fn delta_value(&self) -> MeshResult<ResolvedValue> {
        match &self.kind {
            ChangeKind::Created { snapshot } | ChangeKind::Deleted { snapshot } => {
                Ok(ResolvedValue::Snapshot(snapshot.clone()))
            }
            ChangeKind::State { new, .. } => Ok(ResolvedValue::State(*new)),
            ChangeKind::Property { new, .. } => Ok(ResolvedValue::Property(new.clone())),
            ChangeKind::Neighbors { delta, .. } | ChangeKind::Equivalents { delta, .. } => {
                self.resolve_objects(ResolutionCache::delta_mut, delta, "delta")
            }
            ChangeKind::Types { delta, .. } => {
                self.resolve_types(ResolutionCache::delta_mut, delta, "delta")
            }
        }
    }

    /// Resolves the value after the change.
    ///
    /// # Errors
    ///
    /// [`MeshError::ValueUnresolved`] if a member cannot be found.
    pub fn new_value(&self) -> MeshResult<ResolvedValue> {
        match &self.kind {
            ChangeKind::Created { snapshot } => Ok(ResolvedValue::Snapshot(snapshot.clone())),
            ChangeKind::Deleted { .. } => Ok(ResolvedValue::Nothing),
            ChangeKind::State { new, .. } => Ok(ResolvedValue::State(*new)),
            ChangeKind::Property { new, .. } => Ok(ResolvedValue::Property(new.clone())),
            ChangeKind::Neighbors { new, .. } | ChangeKind::Equivalents { new, .. } => {
                self.resolve_objects(ResolutionCache::new_mut, new, "new")
            }
            ChangeKind::Types { new, .. } => self.resolve_types(ResolutionCache::new_mut, new, "new"),
        }
    }

    /// Returns the single neighbor a neighbor change carries.
    ///
    /// # Errors
    ///
    /// [`MeshError::UnexpectedNeighborCount`] unless the delta holds exactly
    /// one neighbor.
    pub fn neighbor_identifier(&self) -> MeshResult<&MeshObjectIdentifier> {
        let ChangeKind::Neighbors { delta, .. } = &self.kind else {
            return Err(MeshError::invalid_operation(format!(
                "{} carries no neighbor",
                self.kind.name()
            )));
        };
        let mut iter = delta.iter();
        match (iter.next(), iter.next()) {
            (Some(single), None) => Ok(single),
            _ => {
                tracing::error!(
                    affected = %self.affected,
                    ?delta,
                    "neighbor change does not carry exactly one neighbor"
                );
                Err(MeshError::UnexpectedNeighborCount { count: delta.len() })
            }
        }
    }

    /// Resolves the single neighbor a neighbor change carries.
    ///
    /// # Errors
    ///
    /// - [`MeshError::UnexpectedNeighborCount`] as for
    ///   [`neighbor_identifier`](Self::neighbor_identifier)
    /// - [`MeshError::ValueUnresolved`] if no resolver is set or the
    ///   neighbor does not exist there
    pub fn neighbor_object(&self) -> MeshResult<MeshObjectRef> {
        self.neighbor_identifier()?;
        match self.delta_value()? {
            ResolvedValue::Objects(mut objects) if objects.len() == 1 => Ok(objects.remove(0)),
            _ => Err(MeshError::value_unresolved("neighbor")),
        }
    }

    /// Returns the change that undoes this one, if there is one.
    ///
    /// The inverse keeps the timestamp and the resolver binding.
    #[must_use]
    pub fn inverse(&self) -> Option<Change> {
        let kind = self.kind.inverse()?;
        let inverse = Self::from_parts(self.affected.clone(), self.time, kind);
        if let Some(resolver) = self.resolver() {
            inverse.set_resolver(resolver);
        }
        Some(inverse)
    }

    /// Returns true if `candidate` undoes this change.
    #[must_use]
    pub fn is_inverse(&self, candidate: &Change) -> bool {
        self.affected == candidate.affected && self.kind.is_inverse(&candidate.kind)
    }

    fn resolve_cached<T: Clone>(
        &self,
        slot: fn(&mut ResolutionCache) -> &mut Resolution<T>,
        unresolved: impl FnOnce() -> MeshError,
        resolve: impl FnOnce(&Arc<dyn MeshBase>) -> MeshResult<T>,
    ) -> MeshResult<T> {
        let resolver = {
            let mut cache = self.cache.lock();
            if let Resolution::Resolved(value) = slot(&mut *cache) {
                return Ok(value.clone());
            }
            cache.resolver.clone()
        };
        let resolver = resolver.ok_or_else(unresolved)?;
        let value = resolve(&resolver)?;

        let mut cache = self.cache.lock();
        if cache.is_bound_to(&resolver) {
            *slot(&mut *cache) = Resolution::Resolved(value.clone());
        }
        Ok(value)
    }

    fn resolve_objects(
        &self,
        slot: fn(&mut ResolutionCache) -> &mut Resolution<ResolvedValue>,
        ids: &BTreeSet<MeshObjectIdentifier>,
        which: &str,
    ) -> MeshResult<ResolvedValue> {
        let unresolved = || MeshError::value_unresolved(format!("{which} value of {}", self));
        self.resolve_cached(slot, unresolved, |base| {
            ids.iter()
                .map(|id| {
                    base.find_object(id)
                        .ok_or_else(|| MeshError::value_unresolved(format!("{which} member {id}")))
                })
                .collect::<MeshResult<Vec<_>>>()
                .map(ResolvedValue::Objects)
        })
    }

    fn resolve_types(
        &self,
        slot: fn(&mut ResolutionCache) -> &mut Resolution<ResolvedValue>,
        ids: &BTreeSet<MeshTypeIdentifier>,
        which: &str,
    ) -> MeshResult<ResolvedValue> {
        let unresolved = || MeshError::value_unresolved(format!("{which} value of {}", self));
        self.resolve_cached(slot, unresolved, |base| {
            ids.iter()
                .map(|id| {
                    base.model_base()
                        .find_entity_type(id)
                        .map_err(|_| MeshError::value_unresolved(format!("{which} member {id}")))
                })
                .collect::<MeshResult<Vec<_>>>()
                .map(ResolvedValue::Types)
        })
    }
}

fn distinct<T: Ord>(items: Vec<T>, what: &str) -> MeshResult<BTreeSet<T>> {
    if items.is_empty() {
        return Err(MeshError::invalid_change(format!("empty {what}")));
    }
    let len = items.len();
    let set: BTreeSet<T> = items.into_iter().collect();
    if set.len() != len {
        return Err(MeshError::invalid_change(format!("duplicate {what}")));
    }
    Ok(set)
}

impl Clone for Change {
    fn clone(&self) -> Self {
        Self {
            affected: self.affected.clone(),
            time: self.time,
            kind: self.kind.clone(),
            cache: Mutex::new(self.cache.lock().clone()),
        }
    }
}

impl PartialEq for Change {
    fn eq(&self, other: &Self) -> bool {
        self.affected == other.affected && self.time == other.time && self.kind == other.kind
    }
}

impl Eq for Change {}

impl Hash for Change {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.affected.hash(state);
        self.time.hash(state);
        self.kind.hash(state);
    }
}

impl fmt::Debug for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Change")
            .field("affected", &self.affected)
            .field("time", &self.time)
            .field("kind", &self.kind)
            .finish()
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}) at {}", self.kind.name(), self.affected, self.time)
    }
}

impl Encode for Change {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        mesh_codec::to_envelope(self)
    }
}

impl Decode for Change {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        mesh_codec::from_envelope(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(id: &str) -> MeshObjectIdentifier {
        MeshObjectIdentifier::new(id)
    }

    fn t(millis: u64) -> TimeStamp {
        TimeStamp::from_millis(millis)
    }

    fn int(v: i64) -> PropertyValue {
        PropertyValue::Integer(v)
    }

    #[test]
    fn constructors_reject_bad_payloads() {
        let empty = Change::equivalents(
            obj("a"),
            ChangeDirection::Added,
            BTreeSet::new(),
            vec![],
            BTreeSet::new(),
            t(1),
        );
        assert!(matches!(empty, Err(MeshError::InvalidChange { .. })));

        let duplicate = Change::equivalents(
            obj("a"),
            ChangeDirection::Added,
            BTreeSet::new(),
            vec![obj("b"), obj("b")],
            BTreeSet::new(),
            t(1),
        );
        assert!(matches!(duplicate, Err(MeshError::InvalidChange { .. })));

        let no_roles = Change::neighbors(
            obj("a"),
            ChangeDirection::Added,
            vec![],
            BTreeSet::new(),
            vec![obj("b")],
            BTreeSet::new(),
            t(1),
        );
        assert!(matches!(no_roles, Err(MeshError::InvalidChange { .. })));
    }

    #[test]
    fn equality_ignores_delta_order() {
        let make = |delta: Vec<MeshObjectIdentifier>| {
            Change::equivalents(
                obj("a"),
                ChangeDirection::Added,
                BTreeSet::new(),
                delta,
                BTreeSet::new(),
                t(5),
            )
            .unwrap()
        };
        assert_eq!(make(vec![obj("b"), obj("c")]), make(vec![obj("c"), obj("b")]));
    }

    #[test]
    fn accessors_without_resolver_fail() {
        let change = Change::property(obj("a"), "P".into(), None, Some(int(1)), t(1));
        assert!(matches!(
            change.affected_object(),
            Err(MeshError::SourceUnresolved { .. })
        ));
        assert!(matches!(
            change.aspect(),
            Err(MeshError::PropertyUnresolved { .. })
        ));
        // Values of a property change need no lookup.
        assert_eq!(
            change.new_value().unwrap().property(),
            Some(&PropertyValue::Integer(1))
        );
    }

    #[test]
    fn property_inverse_round_trip() {
        let change = Change::property(obj("a"), "P".into(), Some(int(1)), Some(int(2)), t(1));
        let inverse = change.inverse().unwrap();
        assert!(change.is_inverse(&inverse));
        assert!(inverse.is_inverse(&change));
        assert_eq!(inverse.inverse().unwrap(), change);
        assert!(!change.is_inverse(&change));
    }

    #[test]
    fn added_equivalents_never_report_an_inverse() {
        let added = Change::equivalents(
            obj("a"),
            ChangeDirection::Added,
            BTreeSet::new(),
            vec![obj("b")],
            [obj("b")].into_iter().collect(),
            t(1),
        )
        .unwrap();
        let removed = added.inverse().unwrap();
        assert!(!added.is_inverse(&removed));
        assert!(removed.is_inverse(&added));
    }

    #[test]
    fn neighbor_identifier_requires_exactly_one() {
        let two = Change::neighbors(
            obj("a"),
            ChangeDirection::Added,
            vec!["R".into()],
            BTreeSet::new(),
            vec![obj("b"), obj("c")],
            BTreeSet::new(),
            t(1),
        )
        .unwrap();
        assert_eq!(
            two.neighbor_identifier().unwrap_err(),
            MeshError::UnexpectedNeighborCount { count: 2 }
        );

        let one = Change::neighbors(
            obj("a"),
            ChangeDirection::Added,
            vec!["R".into()],
            BTreeSet::new(),
            vec![obj("b")],
            BTreeSet::new(),
            t(1),
        )
        .unwrap();
        assert_eq!(one.neighbor_identifier().unwrap(), &obj("b"));
    }

    #[test]
    fn encode_decode() {
        let change = Change::state(obj("a"), ObjectState::Live, ObjectState::Stale, t(9));
        let bytes = change.encode().unwrap();
        let decoded = Change::decode(&bytes).unwrap();
        assert_eq!(change, decoded);
        assert!(decoded.resolver().is_none());
    }
}
