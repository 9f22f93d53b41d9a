//! Per-kind change payloads.

use crate::mesh::{ExternalizedMeshObject, ObjectState};
use crate::types::{MeshObjectIdentifier, MeshTypeIdentifier};
use crate::value::PropertyValue;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Whether members were added to or removed from a set-valued aspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeDirection {
    /// Members were added.
    Added,
    /// Members were removed.
    Removed,
}

impl ChangeDirection {
    /// Returns the opposite direction.
    #[must_use]
    pub const fn flip(self) -> Self {
        match self {
            Self::Added => Self::Removed,
            Self::Removed => Self::Added,
        }
    }
}

/// Payload of a change, discriminated by the aspect that changed.
///
/// Set-valued payloads are kept as ordered sets, so two changes with the same
/// members in a different order are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// The object was created.
    Created {
        /// Snapshot at creation time.
        snapshot: ExternalizedMeshObject,
    },
    /// The object was deleted.
    Deleted {
        /// Snapshot just before deletion.
        snapshot: ExternalizedMeshObject,
    },
    /// Neighbors were related or unrelated.
    Neighbors {
        /// Added or removed.
        direction: ChangeDirection,
        /// Role types the affected object plays towards the delta neighbors.
        role_types: BTreeSet<MeshTypeIdentifier>,
        /// Neighbors before.
        old: BTreeSet<MeshObjectIdentifier>,
        /// Neighbors related or unrelated.
        delta: BTreeSet<MeshObjectIdentifier>,
        /// Neighbors after.
        new: BTreeSet<MeshObjectIdentifier>,
    },
    /// Entity types were blessed or unblessed.
    Types {
        /// Added or removed.
        direction: ChangeDirection,
        /// Types before.
        old: BTreeSet<MeshTypeIdentifier>,
        /// Types blessed or unblessed.
        delta: BTreeSet<MeshTypeIdentifier>,
        /// Types after.
        new: BTreeSet<MeshTypeIdentifier>,
        /// Property values created by blessing, or removed by unblessing.
        properties: Option<BTreeMap<MeshTypeIdentifier, PropertyValue>>,
    },
    /// Equivalents were added or removed.
    Equivalents {
        /// Added or removed.
        direction: ChangeDirection,
        /// Equivalents before.
        old: BTreeSet<MeshObjectIdentifier>,
        /// Equivalents added or removed.
        delta: BTreeSet<MeshObjectIdentifier>,
        /// Equivalents after.
        new: BTreeSet<MeshObjectIdentifier>,
    },
    /// The abstract state changed.
    State {
        /// State before.
        old: ObjectState,
        /// State after.
        new: ObjectState,
    },
    /// A property value changed.
    Property {
        /// The property type.
        property: MeshTypeIdentifier,
        /// Value before.
        old: Option<PropertyValue>,
        /// Value after.
        new: Option<PropertyValue>,
    },
}

impl ChangeKind {
    /// Short name of the kind.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created { .. } => "Created",
            Self::Deleted { .. } => "Deleted",
            Self::Neighbors {
                direction: ChangeDirection::Added,
                ..
            } => "NeighborsAdded",
            Self::Neighbors { .. } => "NeighborsRemoved",
            Self::Types {
                direction: ChangeDirection::Added,
                ..
            } => "TypesAdded",
            Self::Types { .. } => "TypesRemoved",
            Self::Equivalents {
                direction: ChangeDirection::Added,
                ..
            } => "EquivalentsAdded",
            Self::Equivalents { .. } => "EquivalentsRemoved",
            Self::State { .. } => "StateChanged",
            Self::Property { .. } => "PropertyChanged",
        }
    }

    /// The payload that undoes this one, if there is one.
    pub(crate) fn inverse(&self) -> Option<Self> {
        let inverse = match self {
            Self::Created { snapshot } => Self::Deleted {
                snapshot: snapshot.clone(),
            },
            Self::Deleted { snapshot } => Self::Created {
                snapshot: snapshot.clone(),
            },
            Self::Neighbors {
                direction,
                role_types,
                old,
                delta,
                new,
            } => Self::Neighbors {
                direction: direction.flip(),
                role_types: role_types.clone(),
                old: new.clone(),
                delta: delta.clone(),
                new: old.clone(),
            },
            Self::Types {
                direction,
                old,
                delta,
                new,
                properties,
            } => Self::Types {
                direction: direction.flip(),
                old: new.clone(),
                delta: delta.clone(),
                new: old.clone(),
                properties: properties.clone(),
            },
            Self::Equivalents {
                direction,
                old,
                delta,
                new,
            } => Self::Equivalents {
                direction: direction.flip(),
                old: new.clone(),
                delta: delta.clone(),
                new: old.clone(),
            },
            Self::State { .. } => return None,
            Self::Property { property, old, new } => Self::Property {
                property: property.clone(),
                old: new.clone(),
                new: old.clone(),
            },
        };
        Some(inverse)
    }

    /// Structural inverse test; the affected identifier is checked by the
    /// caller.
    pub(crate) fn is_inverse(&self, candidate: &Self) -> bool {
        match (self, candidate) {
            (Self::Created { .. }, Self::Deleted { .. }) => true,
            (Self::Deleted { .. }, Self::Created { .. }) => true,
            (
                Self::Neighbors {
                    direction: d1,
                    delta: a,
                    ..
                },
                Self::Neighbors {
                    direction: d2,
                    delta: b,
                    ..
                },
            ) => *d2 == d1.flip() && a == b,
            (
                Self::Types {
                    direction: d1,
                    delta: a,
                    ..
                },
                Self::Types {
                    direction: d2,
                    delta: b,
                    ..
                },
            ) => *d2 == d1.flip() && a == b,
            // An added equivalence never reports an inverse.
            (
                Self::Equivalents {
                    direction: ChangeDirection::Added,
                    ..
                },
                _,
            ) => false,
            (
                Self::Equivalents {
                    direction: ChangeDirection::Removed,
                    delta: a,
                    ..
                },
                Self::Equivalents {
                    direction: ChangeDirection::Added,
                    delta: b,
                    ..
                },
            ) => a == b,
            (
                Self::Property {
                    property: p1,
                    old: o1,
                    new: n1,
                },
                Self::Property {
                    property: p2,
                    old: o2,
                    new: n2,
                },
            ) => p1 == p2 && o1 == n2 && n1 == o2,
            _ => false,
        }
    }
}
