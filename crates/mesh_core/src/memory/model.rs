//! In-memory model base.

use crate::error::{MeshError, MeshResult};
use crate::model::{EntityType, ModelBase, PropertyType, RoleType};
use crate::types::MeshTypeIdentifier;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A model base populated at runtime.
#[derive(Debug, Default)]
pub struct MModelBase {
    entity_types: RwLock<HashMap<MeshTypeIdentifier, Arc<EntityType>>>,
    role_types: RwLock<HashMap<MeshTypeIdentifier, Arc<RoleType>>>,
    property_types: RwLock<HashMap<MeshTypeIdentifier, Arc<PropertyType>>>,
}

impl MModelBase {
    /// Creates an empty model base.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity type together with its properties.
    pub fn add_entity_type(&self, entity_type: EntityType) -> Arc<EntityType> {
        {
            let mut properties = self.property_types.write();
            for property in entity_type.properties() {
                properties.insert(property.identifier().clone(), Arc::clone(property));
            }
        }
        let entity_type = Arc::new(entity_type);
        self.entity_types
            .write()
            .insert(entity_type.identifier().clone(), Arc::clone(&entity_type));
        entity_type
    }

    /// Registers a relationship type and returns its source and destination
    /// roles, each the inverse of the other.
    pub fn add_relationship_type(
        &self,
        source: impl Into<MeshTypeIdentifier>,
        destination: impl Into<MeshTypeIdentifier>,
    ) -> (Arc<RoleType>, Arc<RoleType>) {
        let source = source.into();
        let destination = destination.into();
        let source_role = Arc::new(RoleType::new(source.clone(), destination.clone()));
        let destination_role = Arc::new(RoleType::new(destination.clone(), source.clone()));

        let mut roles = self.role_types.write();
        roles.insert(source, Arc::clone(&source_role));
        roles.insert(destination, Arc::clone(&destination_role));
        (source_role, destination_role)
    }
}

fn not_found(identifier: &MeshTypeIdentifier) -> MeshError {
    MeshError::MeshTypeNotFound {
        identifier: identifier.clone(),
    }
}

impl ModelBase for MModelBase {
    fn find_entity_type(&self, identifier: &MeshTypeIdentifier) -> MeshResult<Arc<EntityType>> {
        self.entity_types
            .read()
            .get(identifier)
            .cloned()
            .ok_or_else(|| not_found(identifier))
    }

    fn find_role_type(&self, identifier: &MeshTypeIdentifier) -> MeshResult<Arc<RoleType>> {
        self.role_types
            .read()
            .get(identifier)
            .cloned()
            .ok_or_else(|| not_found(identifier))
    }

    fn find_property_type(&self, identifier: &MeshTypeIdentifier) -> MeshResult<Arc<PropertyType>> {
        self.property_types
            .read()
            .get(identifier)
            .cloned()
            .ok_or_else(|| not_found(identifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_type_registers_properties() {
        let model = MModelBase::new();
        let name = Arc::new(PropertyType::new("Name", None));
        model.add_entity_type(EntityType::new("Person", vec![name]));

        assert!(model.find_entity_type(&"Person".into()).is_ok());
        assert!(model.find_property_type(&"Name".into()).is_ok());
        assert!(matches!(
            model.find_entity_type(&"Robot".into()),
            Err(MeshError::MeshTypeNotFound { .. })
        ));
    }

    #[test]
    fn relationship_roles_are_inverse() {
        let model = MModelBase::new();
        let (source, destination) = model.add_relationship_type("Owns-S", "Owns-D");
        assert_eq!(source.inverse(), destination.identifier());
        assert_eq!(
            model.find_role_type(&"Owns-D".into()).unwrap().inverse(),
            source.identifier()
        );
    }
}
