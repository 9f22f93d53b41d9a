//! Error types for the mesh core.

use crate::types::{MeshBaseIdentifier, MeshObjectIdentifier, MeshTypeIdentifier, TransactionId};
use std::time::Duration;
use thiserror::Error;

/// Result type for core operations.
pub type MeshResult<T> = Result<T, MeshError>;

/// Errors that can occur in mesh core operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MeshError {
    /// CBOR codec error.
    #[error("codec error: {0}")]
    Codec(#[from] mesh_codec::CodecError),

    /// A mutation was attempted without a usable transaction.
    #[error("not within transaction boundaries of {base}")]
    NotWithinTransactionBoundaries {
        /// The mesh base that was mutated.
        base: MeshBaseIdentifier,
    },

    /// A transaction was requested while another one is active.
    #[error("transaction {active} is already active on {base}")]
    TransactionActiveAlready {
        /// The mesh base.
        base: MeshBaseIdentifier,
        /// The transaction holding the slot.
        active: TransactionId,
    },

    /// Waiting for the transaction slot exceeded the timeout.
    #[error("timed out after {timeout:?} waiting for a transaction on {base}")]
    TransactionAsapTimeout {
        /// The mesh base.
        base: MeshBaseIdentifier,
        /// How long the caller waited.
        timeout: Duration,
    },

    /// The object a change refers to cannot be resolved.
    #[error("cannot resolve source object {identifier}")]
    SourceUnresolved {
        /// The unresolved object.
        identifier: MeshObjectIdentifier,
    },

    /// The type or property a change refers to cannot be resolved.
    #[error("cannot resolve aspect {identifier}")]
    PropertyUnresolved {
        /// The unresolved type identifier.
        identifier: MeshTypeIdentifier,
    },

    /// An old, delta or new value of a change cannot be resolved.
    #[error("cannot resolve value: {message}")]
    ValueUnresolved {
        /// What could not be resolved.
        message: String,
    },

    /// Replaying a change onto a mesh base failed.
    #[error("cannot apply change to {base}: {source}")]
    CannotApplyChange {
        /// The target mesh base.
        base: MeshBaseIdentifier,
        /// The underlying failure.
        source: Box<MeshError>,
    },

    /// The change set is frozen.
    #[error("change set is frozen")]
    ChangeSetFrozen,

    /// Index past the end of a change set.
    #[error("index {index} out of range for change set of length {len}")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Length of the set.
        len: usize,
    },

    /// A change payload violates its construction rules.
    #[error("invalid change: {message}")]
    InvalidChange {
        /// Description of the violation.
        message: String,
    },

    /// A neighbor accessor was used on a change that does not carry exactly
    /// one neighbor.
    #[error("expected exactly one neighbor, found {count}")]
    UnexpectedNeighborCount {
        /// Number of neighbors in the change.
        count: usize,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// No object with this identifier exists.
    #[error("mesh object not found: {identifier}")]
    MeshObjectNotFound {
        /// The identifier searched.
        identifier: MeshObjectIdentifier,
    },

    /// An object with this identifier exists already.
    #[error("mesh object exists already: {identifier}")]
    MeshObjectExists {
        /// The conflicting identifier.
        identifier: MeshObjectIdentifier,
    },

    /// The model base does not know this type.
    #[error("mesh type not found: {identifier}")]
    MeshTypeNotFound {
        /// The identifier searched.
        identifier: MeshTypeIdentifier,
    },

    /// The object has been deleted.
    #[error("mesh object is dead: {identifier}")]
    ObjectDead {
        /// The dead object.
        identifier: MeshObjectIdentifier,
    },

    /// The object carries the entity type already.
    #[error("{identifier} is blessed with {entity_type} already")]
    BlessedAlready {
        /// The object.
        identifier: MeshObjectIdentifier,
        /// The entity type.
        entity_type: MeshTypeIdentifier,
    },

    /// The object does not carry the entity type.
    #[error("{identifier} is not blessed with {entity_type}")]
    NotBlessed {
        /// The object.
        identifier: MeshObjectIdentifier,
        /// The entity type.
        entity_type: MeshTypeIdentifier,
    },

    /// The objects are related with all requested role types already.
    #[error("{identifier} is related to {neighbor} already")]
    RelatedAlready {
        /// The object.
        identifier: MeshObjectIdentifier,
        /// The neighbor.
        neighbor: MeshObjectIdentifier,
    },

    /// The objects are not related with a requested role type.
    #[error("{identifier} is not related to {neighbor}")]
    NotRelated {
        /// The object.
        identifier: MeshObjectIdentifier,
        /// The neighbor.
        neighbor: MeshObjectIdentifier,
    },

    /// The objects are equivalent already.
    #[error("{identifier} is equivalent to {other} already")]
    EquivalentAlready {
        /// The object.
        identifier: MeshObjectIdentifier,
        /// The peer.
        other: MeshObjectIdentifier,
    },

    /// The objects are not equivalent.
    #[error("{identifier} is not equivalent to {other}")]
    NotEquivalent {
        /// The object.
        identifier: MeshObjectIdentifier,
        /// The peer.
        other: MeshObjectIdentifier,
    },

    /// The object's entity types do not declare this property.
    #[error("{identifier} does not carry property {property}")]
    IllegalPropertyType {
        /// The object.
        identifier: MeshObjectIdentifier,
        /// The property type.
        property: MeshTypeIdentifier,
    },

    /// Projected-property recalculation did not converge.
    #[error("projected property recalculation did not converge after {rounds} rounds")]
    RecalculationCycle {
        /// Rounds executed before giving up.
        rounds: u32,
    },

    /// A listener rejected a transaction notification.
    #[error("listener failed: {message}")]
    ListenerFailed {
        /// Description of the failure.
        message: String,
    },
}

impl MeshError {
    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid change error.
    pub fn invalid_change(message: impl Into<String>) -> Self {
        Self::InvalidChange {
            message: message.into(),
        }
    }

    /// Creates a value unresolved error.
    pub fn value_unresolved(message: impl Into<String>) -> Self {
        Self::ValueUnresolved {
            message: message.into(),
        }
    }

    /// Creates a listener failure.
    pub fn listener_failed(message: impl Into<String>) -> Self {
        Self::ListenerFailed {
            message: message.into(),
        }
    }

    /// Wraps a replay failure, passing transaction errors through unchanged.
    pub fn cannot_apply(base: MeshBaseIdentifier, cause: MeshError) -> Self {
        if cause.is_transaction_error() {
            return cause;
        }
        Self::CannotApplyChange {
            base,
            source: Box::new(cause),
        }
    }

    /// Returns true for errors raised by the transaction infrastructure.
    ///
    /// Such errors are never wrapped when a change is replayed; the caller
    /// has to react to them directly.
    #[must_use]
    pub fn is_transaction_error(&self) -> bool {
        matches!(
            self,
            Self::NotWithinTransactionBoundaries { .. }
                | Self::TransactionActiveAlready { .. }
                | Self::TransactionAsapTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = MeshError::IndexOutOfRange { index: 3, len: 2 };
        assert_eq!(
            err.to_string(),
            "index 3 out of range for change set of length 2"
        );
    }

    #[test]
    fn cannot_apply_passes_transaction_errors_through() {
        let base = MeshBaseIdentifier::new("b");
        let tx_err = MeshError::NotWithinTransactionBoundaries { base: base.clone() };
        assert_eq!(MeshError::cannot_apply(base.clone(), tx_err.clone()), tx_err);

        let wrapped = MeshError::cannot_apply(base, MeshError::invalid_operation("x"));
        assert!(matches!(wrapped, MeshError::CannotApplyChange { .. }));
        assert!(!wrapped.is_transaction_error());
    }

    #[test]
    fn codec_errors_convert() {
        let err: MeshError = mesh_codec::CodecError::UnexpectedEof.into();
        assert!(matches!(err, MeshError::Codec(_)));
    }
}
