//! Ordered collections of changes.
//!
//! A [`ChangeSet`] records the changes of one transaction in the order they
//! happened. It accepts new changes until it is frozen (when the transaction
//! commits) and rejects every mutation afterwards.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut set = ChangeSet::new();
//! set.add_change(change)?;
//! set.freeze();
//! assert!(set.add_change(other).is_err());
//! ```

use crate::change::Change;
use crate::error::{MeshError, MeshResult};
use crate::mesh::MeshBase;
use crate::types::MeshObjectIdentifier;
use mesh_codec::{CodecResult, Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Strategy for coalescing the changes of a set.
pub trait CompactionStrategy {
    /// Returns the compacted sequence.
    fn compact(&self, changes: Vec<Change>) -> Vec<Change>;
}

/// Compaction that keeps every change.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCompaction;

impl CompactionStrategy for IdentityCompaction {
    fn compact(&self, changes: Vec<Change>) -> Vec<Change> {
        changes
    }
}

/// An ordered, freeze-once sequence of changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    changes: Vec<Change>,
    frozen: bool,
}

impl ChangeSet {
    /// Creates an empty, open change set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an open copy of another set.
    #[must_use]
    pub fn create_copy(other: &ChangeSet) -> Self {
        Self {
            changes: other.changes.clone(),
            frozen: false,
        }
    }

    /// Concatenates two sets into a new open set.
    #[must_use]
    pub fn concat(first: &ChangeSet, second: &ChangeSet) -> Self {
        Self::concat_all([first, second])
    }

    /// Concatenates any number of sets, preserving order.
    pub fn concat_all<'a>(sets: impl IntoIterator<Item = &'a ChangeSet>) -> Self {
        let changes = sets
            .into_iter()
            .flat_map(|set| set.changes.iter().cloned())
            .collect();
        Self {
            changes,
            frozen: false,
        }
    }

    /// Iterates over the changes in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Change> {
        self.changes.iter()
    }

    /// Copies the changes out.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Change> {
        self.changes.clone()
    }

    /// Returns the change at `index`.
    ///
    /// # Errors
    ///
    /// [`MeshError::IndexOutOfRange`] past the end.
    pub fn get(&self, index: usize) -> MeshResult<&Change> {
        self.changes.get(index).ok_or(MeshError::IndexOutOfRange {
            index,
            len: self.changes.len(),
        })
    }

    /// Returns the number of changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns true if there are no changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Returns true once frozen.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Freezes the set. There is no way back.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Compacts with [`IdentityCompaction`].
    pub fn compact(&mut self) -> MeshResult<()> {
        self.compact_with(&IdentityCompaction)
    }

    /// Compacts with a custom strategy.
    pub fn compact_with(&mut self, strategy: &dyn CompactionStrategy) -> MeshResult<()> {
        self.ensure_open()?;
        let changes = std::mem::take(&mut self.changes);
        self.changes = strategy.compact(changes);
        Ok(())
    }

    /// Appends a change.
    ///
    /// # Errors
    ///
    /// [`MeshError::ChangeSetFrozen`] once frozen.
    pub fn add_change(&mut self, change: Change) -> MeshResult<()> {
        self.ensure_open()?;
        self.changes.push(change);
        Ok(())
    }

    /// Appends every change of another set.
    pub fn append(&mut self, other: &ChangeSet) -> MeshResult<()> {
        self.ensure_open()?;
        self.changes.extend(other.changes.iter().cloned());
        Ok(())
    }

    /// Returns the changes affecting one object, in order.
    pub fn changes_affecting<'a>(
        &'a self,
        identifier: &'a MeshObjectIdentifier,
    ) -> impl Iterator<Item = &'a Change> + 'a {
        self.changes
            .iter()
            .filter(move |c| c.affected_identifier() == identifier)
    }

    /// Binds every change to a resolver.
    pub fn set_resolver(&self, resolver: &Arc<dyn MeshBase>) {
        for change in &self.changes {
            change.set_resolver(Arc::clone(resolver));
        }
    }

    /// Replays every change onto `base` within one transaction.
    ///
    /// Joins the calling thread's transaction on `base` if there is one.
    pub fn apply_to(&self, base: &Arc<dyn MeshBase>) -> MeshResult<()> {
        let handle = base.transactions().create_transaction_now_if_needed()?;
        for change in &self.changes {
            if let Err(e) = change.apply_to(base) {
                handle.abandon(Some(&e));
                return Err(e);
            }
        }
        handle.finish()
    }

    fn ensure_open(&self) -> MeshResult<()> {
        if self.frozen {
            return Err(MeshError::ChangeSetFrozen);
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a Change;
    type IntoIter = std::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChangeSet[")?;
        for (i, change) in self.changes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{change}")?;
        }
        write!(f, "]")
    }
}

impl Encode for ChangeSet {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        mesh_codec::to_envelope(self)
    }
}

impl Decode for ChangeSet {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        mesh_codec::from_envelope(bytes)
    }
}
