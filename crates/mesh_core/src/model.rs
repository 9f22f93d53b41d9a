//! Type-system boundary.
//!
//! The mesh core never validates values or interprets a model. It only needs
//! to turn the type identifiers embedded in changes back into live types, so
//! that replaying a change can bless objects, relate them and set their
//! properties. [`ModelBase`] is that lookup.

use crate::error::MeshResult;
use crate::types::MeshTypeIdentifier;
use crate::value::PropertyValue;
use std::sync::Arc;

/// A property declared by an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyType {
    identifier: MeshTypeIdentifier,
    default_value: Option<PropertyValue>,
}

impl PropertyType {
    /// Creates a property type.
    pub fn new(identifier: impl Into<MeshTypeIdentifier>, default_value: Option<PropertyValue>) -> Self {
        Self {
            identifier: identifier.into(),
            default_value,
        }
    }

    /// Returns the identifier.
    #[must_use]
    pub fn identifier(&self) -> &MeshTypeIdentifier {
        &self.identifier
    }

    /// Returns the value a freshly blessed object starts with.
    #[must_use]
    pub fn default_value(&self) -> Option<&PropertyValue> {
        self.default_value.as_ref()
    }
}

/// An entity type objects can be blessed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityType {
    identifier: MeshTypeIdentifier,
    properties: Vec<Arc<PropertyType>>,
}

impl EntityType {
    /// Creates an entity type declaring the given properties.
    pub fn new(identifier: impl Into<MeshTypeIdentifier>, properties: Vec<Arc<PropertyType>>) -> Self {
        Self {
            identifier: identifier.into(),
            properties,
        }
    }

    /// Returns the identifier.
    #[must_use]
    pub fn identifier(&self) -> &MeshTypeIdentifier {
        &self.identifier
    }

    /// Returns the declared properties.
    #[must_use]
    pub fn properties(&self) -> &[Arc<PropertyType>] {
        &self.properties
    }

    /// Returns true if this type declares the property.
    #[must_use]
    pub fn declares(&self, property: &MeshTypeIdentifier) -> bool {
        self.properties.iter().any(|p| p.identifier() == property)
    }
}

/// One end of a relationship type.
///
/// Relating A to B with role `r` records `r` on A's side and `r.inverse()`
/// on B's side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleType {
    identifier: MeshTypeIdentifier,
    inverse: MeshTypeIdentifier,
}

impl RoleType {
    /// Creates a role type paired with its inverse.
    pub fn new(identifier: impl Into<MeshTypeIdentifier>, inverse: impl Into<MeshTypeIdentifier>) -> Self {
        Self {
            identifier: identifier.into(),
            inverse: inverse.into(),
        }
    }

    /// Returns the identifier.
    #[must_use]
    pub fn identifier(&self) -> &MeshTypeIdentifier {
        &self.identifier
    }

    /// Returns the identifier of the role on the other end.
    #[must_use]
    pub fn inverse(&self) -> &MeshTypeIdentifier {
        &self.inverse
    }
}

/// Lookup of type-system entities by identifier.
pub trait ModelBase: Send + Sync {
    /// Finds an entity type.
    fn find_entity_type(&self, identifier: &MeshTypeIdentifier) -> MeshResult<Arc<EntityType>>;

    /// Finds a role type.
    fn find_role_type(&self, identifier: &MeshTypeIdentifier) -> MeshResult<Arc<RoleType>>;

    /// Finds a property type.
    fn find_property_type(&self, identifier: &MeshTypeIdentifier) -> MeshResult<Arc<PropertyType>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_type_declares_its_properties() {
        let name = Arc::new(PropertyType::new("Name", None));
        let person = EntityType::new("Person", vec![name]);
        assert!(person.declares(&"Name".into()));
        assert!(!person.declares(&"Age".into()));
    }

    #[test]
    fn role_type_inverse() {
        let role = RoleType::new("Parent-S", "Parent-D");
        assert_eq!(role.inverse().as_str(), "Parent-D");
    }
}
