//! Lazily resolved live values of a change.

use crate::mesh::{ExternalizedMeshObject, MeshBase, MeshObjectRef, ObjectState};
use crate::model::{EntityType, PropertyType, RoleType};
use crate::value::PropertyValue;
use std::sync::Arc;

/// A cached resolution.
#[derive(Debug, Clone)]
pub enum Resolution<T> {
    /// Not looked up yet, or reset by a resolver swap.
    Unresolved,
    /// Looked up through the current resolver.
    Resolved(T),
}

impl<T> Default for Resolution<T> {
    fn default() -> Self {
        Self::Unresolved
    }
}

/// The aspect of an object a change is about.
#[derive(Debug, Clone)]
pub enum Aspect {
    /// Creation or deletion of the object itself.
    Lifecycle,
    /// Relationships under these role types.
    RoleTypes(Vec<Arc<RoleType>>),
    /// The set of entity types.
    EntityTypes,
    /// The set of equivalent objects.
    Equivalents,
    /// The abstract state.
    State,
    /// A single property.
    Property(Arc<PropertyType>),
}

/// A resolved old, delta or new value.
#[derive(Debug, Clone)]
pub enum ResolvedValue {
    /// No value on this side of the change.
    Nothing,
    /// An object snapshot (lifecycle changes).
    Snapshot(ExternalizedMeshObject),
    /// Live objects (neighbors, equivalents).
    Objects(Vec<MeshObjectRef>),
    /// Entity types.
    Types(Vec<Arc<EntityType>>),
    /// A property value.
    Property(Option<PropertyValue>),
    /// A state tag.
    State(ObjectState),
}

impl ResolvedValue {
    /// Returns the objects, if this value holds objects.
    #[must_use]
    pub fn objects(&self) -> Option<&[MeshObjectRef]> {
        match self {
            Self::Objects(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the property value, if this value holds one.
    #[must_use]
    pub fn property(&self) -> Option<&PropertyValue> {
        match self {
            Self::Property(v) => v.as_ref(),
            _ => None,
        }
    }
}

/// Resolver binding plus one cache slot per aspect.
#[derive(Clone, Default)]
pub(crate) struct ResolutionCache {
    pub(crate) resolver: Option<Arc<dyn MeshBase>>,
    affected: Resolution<MeshObjectRef>,
    aspect: Resolution<Aspect>,
    old: Resolution<ResolvedValue>,
    delta: Resolution<ResolvedValue>,
    new: Resolution<ResolvedValue>,
}

impl ResolutionCache {
    /// Binds a resolver. Returns true if the cache was reset.
    pub(crate) fn bind(&mut self, resolver: Option<Arc<dyn MeshBase>>) -> bool {
        if same_resolver(self.resolver.as_ref(), resolver.as_ref()) {
            return false;
        }
        *self = Self {
            resolver,
            ..Self::default()
        };
        true
    }

    pub(crate) fn is_bound_to(&self, resolver: &Arc<dyn MeshBase>) -> bool {
        same_resolver(self.resolver.as_ref(), Some(resolver))
    }

    pub(crate) fn affected_mut(&mut self) -> &mut Resolution<MeshObjectRef> {
        &mut self.affected
    }

    pub(crate) fn aspect_mut(&mut self) -> &mut Resolution<Aspect> {
        &mut self.aspect
    }

    pub(crate) fn old_mut(&mut self) -> &mut Resolution<ResolvedValue> {
        &mut self.old
    }

    pub(crate) fn delta_mut(&mut self) -> &mut Resolution<ResolvedValue> {
        &mut self.delta
    }

    pub(crate) fn new_mut(&mut self) -> &mut Resolution<ResolvedValue> {
        &mut self.new
    }
}

// Identity of the base, ignoring vtable pointers.
fn same_resolver(a: Option<&Arc<dyn MeshBase>>, b: Option<&Arc<dyn MeshBase>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => std::ptr::eq(
            Arc::as_ptr(a).cast::<()>(),
            Arc::as_ptr(b).cast::<()>(),
        ),
        _ => false,
    }
}
