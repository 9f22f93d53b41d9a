//! Lazily created transactions.

use crate::error::{MeshError, MeshResult};
use crate::transaction::manager::TransactionManager;
use crate::transaction::state::Transaction;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

/// A transaction that is only created when first needed.
///
/// Work that may or may not mutate a mesh base can hold one of these instead
/// of a transaction, so the single transaction slot is only taken once a
/// mutation actually happens.
pub struct OnDemandTransaction<'a> {
    manager: &'a TransactionManager,
    tx: Mutex<Option<Arc<Transaction>>>,
}

impl<'a> OnDemandTransaction<'a> {
    /// Creates the wrapper; no transaction is requested yet.
    #[must_use]
    pub fn new(manager: &'a TransactionManager) -> Self {
        Self {
            manager,
            tx: Mutex::new(None),
        }
    }

    /// Returns the transaction, creating it on first use.
    ///
    /// Creation waits for the slot like
    /// [`TransactionManager::create_transaction_asap`].
    pub fn obtain(&self) -> MeshResult<Arc<Transaction>> {
        let mut slot = self.tx.lock();
        if let Some(tx) = slot.as_ref() {
            return Ok(Arc::clone(tx));
        }
        let tx = self.manager.create_transaction_asap()?;
        *slot = Some(Arc::clone(&tx));
        Ok(tx)
    }

    /// Returns true once a transaction has been created.
    #[must_use]
    pub fn is_materialized(&self) -> bool {
        self.tx.lock().is_some()
    }

    /// Commits the transaction if one was created and is still active.
    pub fn finish(self) -> MeshResult<()> {
        match self.tx.into_inner() {
            Some(tx) if tx.is_active() => tx.commit(),
            _ => Ok(()),
        }
    }

    /// Rolls the transaction back if one was created and is still active.
    pub fn abandon(self, cause: Option<&MeshError>) {
        if let Some(tx) = self.tx.into_inner() {
            if tx.is_active() {
                if let Err(e) = tx.rollback(cause) {
                    warn!(txid = %tx.id(), error = %e, "rollback reported an error");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::mesh::Transactable;
    use crate::transaction::TransactionState;
    use crate::types::MeshBaseIdentifier;
    use std::sync::Weak;

    struct Detached;
    impl Transactable for Detached {}

    fn manager() -> TransactionManager {
        let owner: Weak<dyn Transactable> = Weak::<Detached>::new();
        TransactionManager::new(MeshBaseIdentifier::new("lazy"), Config::default(), owner)
    }

    #[test]
    fn unused_wrapper_never_takes_the_slot() {
        let tm = manager();
        let lazy = OnDemandTransaction::new(&tm);
        assert!(!lazy.is_materialized());
        assert!(tm.current_transaction().is_none());
        lazy.finish().unwrap();
        assert!(tm.current_transaction().is_none());
    }

    #[test]
    fn obtain_creates_once() {
        let tm = manager();
        let lazy = OnDemandTransaction::new(&tm);
        let first = lazy.obtain().unwrap();
        let second = lazy.obtain().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(lazy.is_materialized());

        lazy.finish().unwrap();
        assert_eq!(first.state(), TransactionState::Committed);
    }

    #[test]
    fn abandon_rolls_back() {
        let tm = manager();
        let lazy = OnDemandTransaction::new(&tm);
        let tx = lazy.obtain().unwrap();
        lazy.abandon(None);
        assert_eq!(tx.state(), TransactionState::RolledBack);
        assert!(tm.current_transaction().is_none());
    }
}
