//! Retrying runner for transactional units of work.
//!
//! A [`TransactionAction`] runs inside a transaction obtained by the runner
//! and reports how it went through an [`ActionOutcome`]. The runner commits
//! on success, rolls back otherwise and loops for as long as the action asks
//! to be retried.
//!
//! # Example
//!
//! ```ignore
//! let id = base.transactions().execute_now(|tx: &Transaction| {
//!     match base.create_object(tx, None) {
//!         Ok(object) => ActionOutcome::Success(object.identifier().clone()),
//!         Err(e) => ActionOutcome::Error(e),
//!     }
//! })?;
//! ```

use crate::error::MeshError;
use crate::transaction::manager::TransactionManager;
use crate::transaction::state::Transaction;
use thiserror::Error;
use tracing::debug;

/// How a unit of work ended.
#[derive(Debug)]
pub enum ActionOutcome<T> {
    /// Done; commit and return the value.
    Success(T),
    /// Roll back and stop.
    Rollback,
    /// Roll back and run again in a fresh transaction.
    Retry,
    /// Roll back and report an unexpected failure.
    Error(MeshError),
}

/// A unit of work that needs an active transaction.
pub trait TransactionAction<T> {
    /// Runs once within `tx`.
    fn execute(&mut self, tx: &Transaction) -> ActionOutcome<T>;
}

impl<T, F> TransactionAction<T> for F
where
    F: FnMut(&Transaction) -> ActionOutcome<T>,
{
    fn execute(&mut self, tx: &Transaction) -> ActionOutcome<T> {
        self(tx)
    }
}

/// Result type for the action runner.
pub type ActionResult<T> = Result<T, TransactionActionError>;

/// Errors that end a transaction action without a value.
#[derive(Debug, Error)]
pub enum TransactionActionError {
    /// The action asked to roll back.
    #[error("transaction action rolled back")]
    RolledBack,

    /// The action asked for a retry while running inside a transaction it
    /// did not open.
    #[error("transaction action cannot be retried inside an enclosing transaction")]
    NotRetriable,

    /// The retry limit was reached.
    #[error("transaction action gave up after {attempts} attempts")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
    },

    /// The action failed, or its transaction could not commit.
    #[error("transaction action failed: {0}")]
    Failed(#[source] MeshError),

    /// No transaction could be obtained.
    #[error("could not create transaction: {0}")]
    CreationFailed(#[source] MeshError),
}

impl TransactionManager {
    /// Runs `action`, creating transactions with fail-fast semantics.
    ///
    /// Joins the calling thread's transaction if there is one.
    pub fn execute_now<T, A>(&self, action: A) -> ActionResult<T>
    where
        A: TransactionAction<T>,
    {
        self.run_action(action, false)
    }

    /// Runs `action`, waiting for the transaction slot as needed.
    pub fn execute_asap<T, A>(&self, action: A) -> ActionResult<T>
    where
        A: TransactionAction<T>,
    {
        self.run_action(action, true)
    }

    fn run_action<T, A>(&self, mut action: A, asap: bool) -> ActionResult<T>
    where
        A: TransactionAction<T>,
    {
        let limit = self.config().action_retry_limit;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let handle = if asap {
                self.create_transaction_asap_if_needed()
            } else {
                self.create_transaction_now_if_needed()
            }
            .map_err(TransactionActionError::CreationFailed)?;

            let joined = !handle.is_opened();
            match action.execute(handle.transaction()) {
                ActionOutcome::Success(value) => {
                    handle.finish().map_err(TransactionActionError::Failed)?;
                    return Ok(value);
                }
                ActionOutcome::Rollback => {
                    handle.abandon(None);
                    return Err(TransactionActionError::RolledBack);
                }
                ActionOutcome::Error(e) => {
                    handle.abandon(Some(&e));
                    return Err(TransactionActionError::Failed(e));
                }
                ActionOutcome::Retry if joined => return Err(TransactionActionError::NotRetriable),
                ActionOutcome::Retry => {
                    handle.abandon(None);
                    if limit.is_some_and(|limit| attempts > limit) {
                        return Err(TransactionActionError::RetriesExhausted { attempts });
                    }
                    debug!(attempt = attempts, "retrying transaction action");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::MeshResult;
    use crate::mesh::Transactable;
    use crate::transaction::TransactionListener;
    use crate::types::MeshBaseIdentifier;
    use parking_lot::Mutex;
    use std::sync::{Arc, Weak};

    struct Detached;
    impl Transactable for Detached {}

    #[derive(Default)]
    struct Outcomes {
        log: Mutex<Vec<&'static str>>,
    }

    impl TransactionListener for Outcomes {
        fn transaction_committed(&self, _tx: &Transaction) -> MeshResult<()> {
            self.log.lock().push("commit");
            Ok(())
        }

        fn transaction_rolled_back(&self, _tx: &Transaction, _cause: Option<&MeshError>) -> MeshResult<()> {
            self.log.lock().push("rollback");
            Ok(())
        }
    }

    fn manager(config: Config) -> (TransactionManager, Arc<Outcomes>) {
        let owner: Weak<dyn Transactable> = Weak::<Detached>::new();
        let tm = TransactionManager::new(MeshBaseIdentifier::new("runner"), config, owner);
        let outcomes = Arc::new(Outcomes::default());
        tm.add_transaction_listener(outcomes.clone());
        (tm, outcomes)
    }

    #[test]
    fn success_commits() {
        let (tm, outcomes) = manager(Config::default());
        let value = tm
            .execute_now(|tx: &Transaction| ActionOutcome::Success(tx.id().as_u64()))
            .unwrap();
        assert_eq!(value, 1);
        assert_eq!(*outcomes.log.lock(), vec!["commit"]);
    }

    #[test]
    fn retry_rolls_back_and_runs_again() {
        let (tm, outcomes) = manager(Config::default());
        let mut calls = 0;
        let value = tm
            .execute_now(|_tx: &Transaction| {
                calls += 1;
                if calls < 3 {
                    ActionOutcome::Retry
                } else {
                    ActionOutcome::Success(calls)
                }
            })
            .unwrap();
        assert_eq!(value, 3);
        assert_eq!(*outcomes.log.lock(), vec!["rollback", "rollback", "commit"]);
    }

    #[test]
    fn retry_limit_is_enforced() {
        let (tm, outcomes) = manager(Config::default().action_retry_limit(Some(2)));
        let result: ActionResult<()> = tm.execute_now(|_tx: &Transaction| ActionOutcome::Retry);
        assert!(matches!(
            result,
            Err(TransactionActionError::RetriesExhausted { attempts: 3 })
        ));
        assert_eq!(outcomes.log.lock().len(), 3);
    }

    #[test]
    fn rollback_and_error_stop() {
        let (tm, outcomes) = manager(Config::default());
        let rolled: ActionResult<()> = tm.execute_now(|_tx: &Transaction| ActionOutcome::Rollback);
        assert!(matches!(rolled, Err(TransactionActionError::RolledBack)));

        let failed: ActionResult<()> = tm.execute_now(|_tx: &Transaction| {
            ActionOutcome::Error(MeshError::invalid_operation("boom"))
        });
        assert!(matches!(failed, Err(TransactionActionError::Failed(_))));
        assert_eq!(*outcomes.log.lock(), vec!["rollback", "rollback"]);
        assert!(tm.current_transaction().is_none());
    }

    #[test]
    fn creation_failure_is_reported() {
        let (tm, _) = manager(Config::default());
        let other_thread_tx = std::thread::scope(|s| {
            s.spawn(|| tm.create_transaction_now().unwrap()).join().unwrap()
        });

        let result: ActionResult<()> = tm.execute_now(|_tx: &Transaction| ActionOutcome::Success(()));
        assert!(matches!(
            result,
            Err(TransactionActionError::CreationFailed(MeshError::TransactionActiveAlready { .. }))
        ));
        other_thread_tx.rollback(None).unwrap();
    }

    #[test]
    fn joined_action_leaves_outer_transaction_alone() {
        let (tm, outcomes) = manager(Config::default());
        let outer = tm.create_transaction_now().unwrap();

        let rolled: ActionResult<()> = tm.execute_now(|_tx: &Transaction| ActionOutcome::Rollback);
        assert!(matches!(rolled, Err(TransactionActionError::RolledBack)));
        let retried: ActionResult<()> = tm.execute_now(|_tx: &Transaction| ActionOutcome::Retry);
        assert!(matches!(retried, Err(TransactionActionError::NotRetriable)));
        let joined = tm
            .execute_now(|tx: &Transaction| ActionOutcome::Success(tx.id()))
            .unwrap();
        assert_eq!(joined, outer.id());

        assert!(outer.is_active());
        assert!(outcomes.log.lock().is_empty());
        outer.commit().unwrap();
        assert_eq!(*outcomes.log.lock(), vec!["commit"]);
    }
}
