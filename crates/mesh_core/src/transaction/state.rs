//! Transaction state.

use crate::change::Change;
use crate::change_set::ChangeSet;
use crate::config::CyclePolicy;
use crate::error::{MeshError, MeshResult};
use crate::mesh::MeshObjectRef;
use crate::transaction::dirty::{DirtyQueue, DirtyRecord, ProjectedPropertyUpdater, RecalculationReport};
use crate::transaction::listener::TransactionListener;
use crate::transaction::manager::ManagerShared;
use crate::types::{MeshBaseIdentifier, TimeStamp, TransactionId};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, error, warn};

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Created, not yet handed out.
    NotStarted,
    /// Transaction is active and can record changes.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been rolled back.
    RolledBack,
}

struct TransactionInner {
    state: TransactionState,
    changes: ChangeSet,
    dirty: DirtyQueue,
    report: RecalculationReport,
}

/// A unit of work on one mesh base.
///
/// At most one transaction is active per mesh base. Mutations record their
/// changes into it; [`commit`](Self::commit) recalculates projected
/// properties, freezes the change set and notifies the mesh base and the
/// transaction listeners.
///
/// Commit, rollback and dirty registration are mutually exclusive across
/// threads. The committing thread itself may re-enter, which is how updaters
/// record new changes during recalculation.
pub struct Transaction {
    id: TransactionId,
    base: MeshBaseIdentifier,
    owner: ThreadId,
    created_at: TimeStamp,
    shared: Arc<ManagerShared>,
    inner: ReentrantMutex<RefCell<TransactionInner>>,
}

impl Transaction {
    pub(crate) fn new(id: TransactionId, shared: Arc<ManagerShared>) -> Self {
        Self {
            id,
            base: shared.base.clone(),
            owner: thread::current().id(),
            created_at: TimeStamp::now(),
            shared,
            inner: ReentrantMutex::new(RefCell::new(TransactionInner {
                state: TransactionState::NotStarted,
                changes: ChangeSet::new(),
                dirty: DirtyQueue::default(),
                report: RecalculationReport::default(),
            })),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the identifier of the mesh base this transaction belongs to.
    #[must_use]
    pub fn base_identifier(&self) -> &MeshBaseIdentifier {
        &self.base
    }

    /// Returns the thread that created the transaction.
    #[must_use]
    pub fn owner_thread(&self) -> ThreadId {
        self.owner
    }

    /// Returns when the transaction was created.
    #[must_use]
    pub fn created_at(&self) -> TimeStamp {
        self.created_at
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.with_inner(|inner| inner.state)
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    /// Returns a copy of the recorded changes.
    #[must_use]
    pub fn change_set(&self) -> ChangeSet {
        self.with_inner(|inner| inner.changes.clone())
    }

    /// Returns the outcome of the last pre-commit recalculation.
    #[must_use]
    pub fn recalculation_report(&self) -> RecalculationReport {
        self.with_inner(|inner| inner.report)
    }

    /// Records a change.
    ///
    /// # Errors
    ///
    /// [`MeshError::NotWithinTransactionBoundaries`] once the transaction is
    /// no longer active.
    pub fn add_change(&self, change: Change) -> MeshResult<()> {
        self.with_inner(|inner| {
            if inner.state != TransactionState::Active {
                return Err(self.not_within());
            }
            inner.changes.add_change(change)
        })
    }

    /// Registers an object for recalculation before commit.
    ///
    /// Equal registrations are collapsed. Dead objects and finished
    /// transactions are ignored.
    pub fn add_dirty_object(
        &self,
        object: &MeshObjectRef,
        updater: &Arc<dyn ProjectedPropertyUpdater>,
        event: &Change,
    ) {
        if object.is_dead() {
            return;
        }
        let record = DirtyRecord::new(Arc::clone(object), Arc::clone(updater), event.clone());
        self.with_inner(|inner| {
            if inner.state == TransactionState::Active {
                inner.dirty.push(record);
            }
        });
    }

    /// Commits the transaction.
    ///
    /// Runs the pre-commit recalculation and freezes the change set. The mesh
    /// base and then every transaction listener are notified before the mesh
    /// base is released, so the next transaction starts only after all of
    /// them have heard of this one.
    ///
    /// # Errors
    ///
    /// - [`MeshError::NotWithinTransactionBoundaries`] if not active
    /// - an updater error, or [`MeshError::RecalculationCycle`] under
    ///   [`CyclePolicy::Fail`]; the transaction is rolled back first
    /// - the first listener error; the transaction stays committed and the
    ///   slot is released
    pub fn commit(&self) -> MeshResult<()> {
        let guard = self.inner.lock();
        if guard.borrow().state != TransactionState::Active {
            return Err(self.not_within());
        }
        debug!(txid = %self.id, base = %self.base, "committing transaction");

        if let Err(e) = self.pre_commit() {
            drop(guard);
            if let Err(rollback_err) = self.rollback(Some(&e)) {
                warn!(txid = %self.id, error = %rollback_err, "rollback after failed commit reported an error");
            }
            return Err(e);
        }

        {
            let mut inner = guard.borrow_mut();
            if inner.state != TransactionState::Active {
                // rolled back by an updater
                return Err(self.not_within());
            }
            inner.changes.freeze();
            inner.state = TransactionState::Committed;
        }
        drop(guard);

        if let Some(owner) = self.shared.owner() {
            owner.transaction_committed(self);
        }
        let notified = self.notify_listeners(|listener| listener.transaction_committed(self));
        self.shared.release(self);
        notified
    }

    /// Rolls the transaction back.
    ///
    /// The mesh base and the listeners are notified before the slot is
    /// released, so the mesh base restores its state before another
    /// transaction starts.
    ///
    /// # Errors
    ///
    /// [`MeshError::NotWithinTransactionBoundaries`] if not active, or the
    /// first listener error.
    pub fn rollback(&self, cause: Option<&MeshError>) -> MeshResult<()> {
        self.with_inner(|inner| {
            if inner.state != TransactionState::Active {
                return Err(self.not_within());
            }
            inner.state = TransactionState::RolledBack;
            inner.dirty.clear();
            Ok(())
        })?;
        debug!(txid = %self.id, base = %self.base, cause = ?cause, "rolled back transaction");

        if let Some(owner) = self.shared.owner() {
            owner.transaction_rolled_back(self, cause);
        }
        let notified =
            self.notify_listeners(|listener| listener.transaction_rolled_back(self, cause));
        self.shared.release(self);
        notified
    }

    pub(crate) fn mark_active(&self) {
        self.with_inner(|inner| inner.state = TransactionState::Active);
    }

    // Drains the dirty queue round by round until it stays empty. A round
    // that does not shrink the queue counts against the attempt budget; a
    // shrinking round restores it.
    fn pre_commit(&self) -> MeshResult<()> {
        let max_attempts = self.shared.config.max_recalculate_attempts;
        let mut attempts_left = max_attempts;
        let mut report = RecalculationReport::default();

        let outcome = 'recalc: loop {
            let batch = self.with_inner(|inner| inner.dirty.take_batch());
            if batch.is_empty() {
                break Ok(());
            }
            let batch_size = batch.len();
            report.rounds += 1;

            for record in &batch {
                if record.object().is_dead() {
                    continue;
                }
                if let Err(e) = record
                    .updater()
                    .update(self, record.object(), record.event())
                {
                    break 'recalc Err(e);
                }
                report.records_processed += 1;
            }

            let next_size = self.with_inner(|inner| inner.dirty.len());
            if next_size == 0 {
                break Ok(());
            }
            if next_size < batch_size {
                attempts_left = max_attempts;
                continue;
            }
            attempts_left = attempts_left.saturating_sub(1);
            if attempts_left == 0 {
                let pending = self.with_inner(|inner| inner.dirty.take_batch());
                error!(
                    txid = %self.id,
                    rounds = report.rounds,
                    ?pending,
                    "circular projected property recalculation"
                );
                report.cycle_detected = true;
                break match self.shared.config.cycle_policy {
                    CyclePolicy::LogAndProceed => Ok(()),
                    CyclePolicy::Fail => Err(MeshError::RecalculationCycle {
                        rounds: report.rounds,
                    }),
                };
            }
        };

        if report.rounds > 0 {
            debug!(txid = %self.id, rounds = report.rounds, processed = report.records_processed, "recalculated projected properties");
        }
        self.with_inner(|inner| inner.report = report);
        outcome
    }

    // Stops at the first failing listener.
    fn notify_listeners(
        &self,
        notify: impl Fn(&dyn TransactionListener) -> MeshResult<()>,
    ) -> MeshResult<()> {
        for listener in self.shared.listeners.snapshot() {
            notify(listener.as_ref())?;
        }
        Ok(())
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut TransactionInner) -> R) -> R {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        f(&mut inner)
    }

    fn not_within(&self) -> MeshError {
        MeshError::NotWithinTransactionBoundaries {
            base: self.base.clone(),
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("base", &self.base)
            .field("state", &self.state())
            .finish()
    }
}
