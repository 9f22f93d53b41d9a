//! Replaying changes onto a mesh base.

use super::{Aspect, Change, ChangeDirection, ChangeKind, ResolvedValue};
use crate::error::{MeshError, MeshResult};
use crate::mesh::{MeshBase, MeshObjectRef};
use crate::model::EntityType;
use crate::transaction::Transaction;
use std::sync::Arc;
use tracing::{debug, warn};

impl Change {
    /// Replays this change onto `base` and returns the mutated object.
    ///
    /// The change is rebound to `base` first. If the calling thread has a
    /// transaction open on `base` the change joins it; otherwise a
    /// transaction is opened for this call alone and committed afterwards.
    ///
    /// # Errors
    ///
    /// Transaction errors are returned unchanged. Every other failure is
    /// wrapped in [`MeshError::CannotApplyChange`]; a transaction opened by
    /// this call is rolled back in that case.
    pub fn apply_to(&self, base: &Arc<dyn MeshBase>) -> MeshResult<MeshObjectRef> {
        self.set_resolver(Arc::clone(base));
        let handle = base.transactions().create_transaction_now_if_needed()?;

        match self.apply_within(base.as_ref(), handle.transaction()) {
            Ok(object) => {
                handle
                    .finish()
                    .map_err(|e| MeshError::cannot_apply(base.identifier().clone(), e))?;
                Ok(object)
            }
            Err(cause) => {
                handle.abandon(Some(&cause));
                Err(MeshError::cannot_apply(base.identifier().clone(), cause))
            }
        }
    }

    fn apply_within(&self, base: &dyn MeshBase, tx: &Transaction) -> MeshResult<MeshObjectRef> {
        match &self.kind {
            ChangeKind::Created { snapshot } => base.lifecycle_manager().recreate_object(tx, snapshot),
            ChangeKind::Deleted { .. } => {
                let object = self.affected_object()?;
                base.lifecycle_manager().delete_object(tx, &object)?;
                Ok(object)
            }
            ChangeKind::Neighbors { direction, .. } => {
                let object = self.affected_object()?;
                let Aspect::RoleTypes(role_types) = self.aspect()? else {
                    return Err(MeshError::invalid_operation("neighbor change without role types"));
                };
                for neighbor in objects(self.delta_value()?)? {
                    match direction {
                        ChangeDirection::Added => object.relate(tx, &role_types, &neighbor)?,
                        ChangeDirection::Removed => object.unrelate(tx, &role_types, &neighbor)?,
                    }
                }
                Ok(object)
            }
            ChangeKind::Types {
                direction,
                properties,
                ..
            } => {
                let object = self.affected_object()?;
                let types = entity_types(self.delta_value()?)?;
                match direction {
                    ChangeDirection::Added => {
                        object.bless(tx, &types)?;
                        for (id, value) in properties.iter().flatten() {
                            let result = base
                                .model_base()
                                .find_property_type(id)
                                .and_then(|p| object.set_property_value(tx, &p, Some(value.clone())));
                            if let Err(e) = result {
                                warn!(
                                    object = %object.identifier(),
                                    property = %id,
                                    error = %e,
                                    "could not restore property after blessing"
                                );
                            }
                        }
                    }
                    ChangeDirection::Removed => object.unbless(tx, &types)?,
                }
                Ok(object)
            }
            ChangeKind::Equivalents { direction, .. } => {
                let object = self.affected_object()?;
                for peer in objects(self.delta_value()?)? {
                    let result = match direction {
                        ChangeDirection::Added => object.add_equivalent(tx, &peer),
                        ChangeDirection::Removed => object.remove_equivalent(tx, &peer),
                    };
                    match result {
                        Ok(()) => {}
                        Err(e @ (MeshError::EquivalentAlready { .. } | MeshError::NotEquivalent { .. })) => {
                            debug!(object = %object.identifier(), error = %e, "equivalence unchanged");
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(object)
            }
            ChangeKind::State { new, .. } => {
                let object = self.affected_object()?;
                object.set_state(tx, *new)?;
                Ok(object)
            }
            ChangeKind::Property { new, .. } => {
                let object = self.affected_object()?;
                let Aspect::Property(property) = self.aspect()? else {
                    return Err(MeshError::invalid_operation("property change without property type"));
                };
                object.set_property_value(tx, &property, new.clone())?;
                Ok(object)
            }
        }
    }
}

fn objects(value: ResolvedValue) -> MeshResult<Vec<MeshObjectRef>> {
    match value {
        ResolvedValue::Objects(objects) => Ok(objects),
        other => Err(MeshError::value_unresolved(format!("expected objects, got {other:?}"))),
    }
}

fn entity_types(value: ResolvedValue) -> MeshResult<Vec<Arc<EntityType>>> {
    match value {
        ResolvedValue::Types(types) => Ok(types),
        other => Err(MeshError::value_unresolved(format!("expected types, got {other:?}"))),
    }
}
