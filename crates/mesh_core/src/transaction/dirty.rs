//! Pending projected-property recalculations.

use crate::change::Change;
use crate::error::MeshResult;
use crate::mesh::MeshObjectRef;
use crate::transaction::Transaction;
use std::fmt;
use std::sync::Arc;

/// Recalculates a projected property of an object.
///
/// Updaters run on the committing thread during pre-commit recalculation.
/// They may mutate objects through `tx`, which can dirty further objects;
/// those are picked up in the next round.
pub trait ProjectedPropertyUpdater: Send + Sync {
    /// Recalculates `object` in response to `event`.
    fn update(&self, tx: &Transaction, object: &MeshObjectRef, event: &Change) -> MeshResult<()>;
}

/// An object waiting for recalculation.
pub struct DirtyRecord {
    object: MeshObjectRef,
    updater: Arc<dyn ProjectedPropertyUpdater>,
    event: Change,
}

impl DirtyRecord {
    /// Creates a record.
    pub fn new(object: MeshObjectRef, updater: Arc<dyn ProjectedPropertyUpdater>, event: Change) -> Self {
        Self {
            object,
            updater,
            event,
        }
    }

    /// The dirty object.
    #[must_use]
    pub fn object(&self) -> &MeshObjectRef {
        &self.object
    }

    /// The updater to run.
    #[must_use]
    pub fn updater(&self) -> &Arc<dyn ProjectedPropertyUpdater> {
        &self.updater
    }

    /// The change that dirtied the object.
    #[must_use]
    pub fn event(&self) -> &Change {
        &self.event
    }
}

// Objects compare by identifier, updaters by identity, events structurally.
impl PartialEq for DirtyRecord {
    fn eq(&self, other: &Self) -> bool {
        self.object.identifier() == other.object.identifier()
            && std::ptr::addr_eq(Arc::as_ptr(&self.updater), Arc::as_ptr(&other.updater))
            && self.event == other.event
    }
}

impl fmt::Debug for DirtyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirtyRecord")
            .field("object", self.object.identifier())
            .field("event", &self.event)
            .finish()
    }
}

/// Deduplicating worklist. Recalculation drains it one batch at a time.
#[derive(Debug, Default)]
pub(crate) struct DirtyQueue {
    pending: Vec<DirtyRecord>,
}

impl DirtyQueue {
    /// Enqueues a record unless an equal one is pending.
    pub(crate) fn push(&mut self, record: DirtyRecord) -> bool {
        if self.pending.contains(&record) {
            return false;
        }
        self.pending.push(record);
        true
    }

    /// Swaps the pending records for an empty batch.
    pub(crate) fn take_batch(&mut self) -> Vec<DirtyRecord> {
        std::mem::take(&mut self.pending)
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Outcome of the last pre-commit recalculation of a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecalculationReport {
    /// Rounds executed.
    pub rounds: u32,
    /// Updater invocations across all rounds.
    pub records_processed: usize,
    /// True if recalculation stopped because it did not converge.
    pub cycle_detected: bool,
}
