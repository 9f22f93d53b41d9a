//! Transaction manager.

use crate::config::Config;
use crate::error::{MeshError, MeshResult};
use crate::mesh::Transactable;
use crate::transaction::listener::{ListenerSet, TransactionListener};
use crate::transaction::state::Transaction;
use crate::types::{MeshBaseIdentifier, TransactionId};
use parking_lot::{Condvar, Mutex};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Instant;
use tracing::{debug, warn};

/// State shared between a manager and the transactions it hands out.
pub(crate) struct ManagerShared {
    pub(crate) base: MeshBaseIdentifier,
    pub(crate) config: Config,
    pub(crate) listeners: ListenerSet<dyn TransactionListener>,
    active: Mutex<Option<Arc<Transaction>>>,
    released: Condvar,
    owner: Weak<dyn Transactable>,
}

impl ManagerShared {
    /// Frees the slot if `tx` holds it and wakes asap waiters.
    pub(crate) fn release(&self, tx: &Transaction) {
        let released = {
            let mut slot = self.active.lock();
            if slot.as_ref().is_some_and(|active| std::ptr::eq(Arc::as_ptr(active), tx)) {
                slot.take()
            } else {
                None
            }
        };
        if released.is_some() {
            self.released.notify_all();
        }
    }

    pub(crate) fn owner(&self) -> Option<Arc<dyn Transactable>> {
        self.owner.upgrade()
    }
}

/// A transaction obtained with "if needed" semantics.
///
/// `Opened` transactions were created for the caller, who has to finish
/// them. `Joined` transactions belong to an enclosing unit of work on the
/// same thread and are left alone.
#[derive(Debug)]
pub enum TransactionHandle {
    /// Created by this request.
    Opened(Arc<Transaction>),
    /// The calling thread's transaction, already active.
    Joined(Arc<Transaction>),
}

impl TransactionHandle {
    /// Returns the transaction.
    #[must_use]
    pub fn transaction(&self) -> &Arc<Transaction> {
        match self {
            Self::Opened(tx) | Self::Joined(tx) => tx,
        }
    }

    /// Returns true if the transaction was created by this request.
    #[must_use]
    pub fn is_opened(&self) -> bool {
        matches!(self, Self::Opened(_))
    }

    /// Commits an opened transaction; a joined one is left to its owner.
    pub fn finish(self) -> MeshResult<()> {
        match self {
            Self::Opened(tx) => tx.commit(),
            Self::Joined(_) => Ok(()),
        }
    }

    /// Rolls back an opened transaction; a joined one is left to its owner.
    pub fn abandon(self, cause: Option<&MeshError>) {
        if let Self::Opened(tx) = self {
            if let Err(e) = tx.rollback(cause) {
                warn!(txid = %tx.id(), error = %e, "rollback reported an error");
            }
        }
    }
}

impl Deref for TransactionHandle {
    type Target = Transaction;

    fn deref(&self) -> &Transaction {
        self.transaction()
    }
}

/// Hands out the single transaction slot of a mesh base.
///
/// The manager provides:
/// - fail-fast creation via `create_transaction_now`
/// - blocking creation with a timeout via `create_transaction_asap`
/// - "if needed" variants that join the calling thread's transaction
/// - transaction listeners and the retrying action runner
///
/// ## Single-Transaction Guarantee
///
/// Only one transaction can be active per mesh base. It holds the slot from
/// creation until it has committed or rolled back and the mesh base and
/// every listener have been notified.
pub struct TransactionManager {
    /// Next transaction ID.
    next_txid: AtomicU64,
    shared: Arc<ManagerShared>,
}

impl TransactionManager {
    /// Creates a manager for the mesh base `base`.
    ///
    /// `owner` receives the start, commit and rollback callbacks of every
    /// transaction.
    pub fn new(base: MeshBaseIdentifier, config: Config, owner: Weak<dyn Transactable>) -> Self {
        Self {
            next_txid: AtomicU64::new(1),
            shared: Arc::new(ManagerShared {
                base,
                config,
                listeners: ListenerSet::new(),
                active: Mutex::new(None),
                released: Condvar::new(),
                owner,
            }),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Returns the identifier of the managed mesh base.
    #[must_use]
    pub fn base_identifier(&self) -> &MeshBaseIdentifier {
        &self.shared.base
    }

    /// Creates a transaction, failing if one is active.
    ///
    /// # Errors
    ///
    /// [`MeshError::TransactionActiveAlready`] if the slot is taken.
    pub fn create_transaction_now(&self) -> MeshResult<Arc<Transaction>> {
        let tx = {
            let mut slot = self.shared.active.lock();
            if let Some(active) = slot.as_ref() {
                return Err(self.active_already(active));
            }
            self.occupy(&mut slot)
        };
        self.start(tx)
    }

    /// Creates a transaction, waiting up to [`Config::asap_timeout`] for the
    /// active one to finish.
    ///
    /// # Errors
    ///
    /// - [`MeshError::TransactionActiveAlready`] if the calling thread holds
    ///   the active transaction itself
    /// - [`MeshError::TransactionAsapTimeout`] if the wait times out
    pub fn create_transaction_asap(&self) -> MeshResult<Arc<Transaction>> {
        let timeout = self.shared.config.asap_timeout;
        let deadline = Instant::now() + timeout;
        let me = thread::current().id();

        let tx = {
            let mut slot = self.shared.active.lock();
            while let Some(active) = slot.as_ref() {
                if active.owner_thread() == me {
                    return Err(self.active_already(active));
                }
                if self.shared.released.wait_until(&mut slot, deadline).timed_out() && slot.is_some() {
                    return Err(MeshError::TransactionAsapTimeout {
                        base: self.shared.base.clone(),
                        timeout,
                    });
                }
            }
            self.occupy(&mut slot)
        };
        self.start(tx)
    }

    /// Joins the calling thread's transaction, or creates one now.
    pub fn create_transaction_now_if_needed(&self) -> MeshResult<TransactionHandle> {
        match self.current_for_this_thread() {
            Some(tx) => Ok(TransactionHandle::Joined(tx)),
            None => self.create_transaction_now().map(TransactionHandle::Opened),
        }
    }

    /// Joins the calling thread's transaction, or creates one as soon as
    /// possible.
    pub fn create_transaction_asap_if_needed(&self) -> MeshResult<TransactionHandle> {
        match self.current_for_this_thread() {
            Some(tx) => Ok(TransactionHandle::Joined(tx)),
            None => self.create_transaction_asap().map(TransactionHandle::Opened),
        }
    }

    /// Returns the active transaction, whichever thread created it.
    #[must_use]
    pub fn current_transaction(&self) -> Option<Arc<Transaction>> {
        self.shared.active.lock().clone()
    }

    /// Verifies that `tx` is the active transaction of this mesh base.
    ///
    /// # Errors
    ///
    /// [`MeshError::NotWithinTransactionBoundaries`] otherwise.
    pub fn check_transaction(&self, tx: &Transaction) -> MeshResult<()> {
        // The slot lock is never held while a transaction's own lock is taken.
        let holds_slot = self
            .shared
            .active
            .lock()
            .as_ref()
            .is_some_and(|active| std::ptr::eq(Arc::as_ptr(active), tx));
        if holds_slot && tx.is_active() {
            Ok(())
        } else {
            Err(MeshError::NotWithinTransactionBoundaries {
                base: self.shared.base.clone(),
            })
        }
    }

    /// Registers a transaction listener.
    pub fn add_transaction_listener(&self, listener: Arc<dyn TransactionListener>) {
        self.shared.listeners.add(listener);
    }

    /// Removes a transaction listener.
    pub fn remove_transaction_listener(&self, listener: &Arc<dyn TransactionListener>) -> bool {
        self.shared.listeners.remove(listener)
    }

    fn current_for_this_thread(&self) -> Option<Arc<Transaction>> {
        let me = thread::current().id();
        self.shared
            .active
            .lock()
            .as_ref()
            .filter(|tx| tx.owner_thread() == me)
            .cloned()
    }

    fn occupy(&self, slot: &mut Option<Arc<Transaction>>) -> Arc<Transaction> {
        let txid = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        let tx = Arc::new(Transaction::new(txid, Arc::clone(&self.shared)));
        *slot = Some(Arc::clone(&tx));
        tx
    }

    fn start(&self, tx: Arc<Transaction>) -> MeshResult<Arc<Transaction>> {
        tx.mark_active();
        debug!(txid = %tx.id(), base = %self.shared.base, "transaction started");

        if let Some(owner) = self.shared.owner() {
            owner.transaction_started(&tx);
        }
        for listener in self.shared.listeners.snapshot() {
            if let Err(e) = listener.transaction_started(&tx) {
                if let Err(rollback_err) = tx.rollback(Some(&e)) {
                    warn!(txid = %tx.id(), error = %rollback_err, "rollback after failed start reported an error");
                }
                return Err(e);
            }
        }
        Ok(tx)
    }

    fn active_already(&self, active: &Transaction) -> MeshError {
        MeshError::TransactionActiveAlready {
            base: self.shared.base.clone(),
            active: active.id(),
        }
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("base", &self.shared.base)
            .field("next_txid", &self.next_txid.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionState;
    use std::time::Duration;

    struct Detached;
    impl Transactable for Detached {}

    fn manager(config: Config) -> Arc<TransactionManager> {
        let owner: Weak<dyn Transactable> = Weak::<Detached>::new();
        Arc::new(TransactionManager::new(
            MeshBaseIdentifier::new("test"),
            config,
            owner,
        ))
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        name: &'static str,
    }

    impl TransactionListener for Recorder {
        fn transaction_started(&self, tx: &Transaction) -> MeshResult<()> {
            self.events.lock().push(format!("{}:started:{}", self.name, tx.id()));
            Ok(())
        }

        fn transaction_committed(&self, tx: &Transaction) -> MeshResult<()> {
            self.events.lock().push(format!("{}:committed:{}", self.name, tx.id()));
            Ok(())
        }

        fn transaction_rolled_back(&self, tx: &Transaction, _cause: Option<&MeshError>) -> MeshResult<()> {
            self.events.lock().push(format!("{}:rolled_back:{}", self.name, tx.id()));
            Ok(())
        }
    }

    #[test]
    fn only_one_active_transaction() {
        let tm = manager(Config::default());
        let tx = tm.create_transaction_now().unwrap();
        assert_eq!(tx.state(), TransactionState::Active);

        let err = tm.create_transaction_now().unwrap_err();
        assert!(matches!(err, MeshError::TransactionActiveAlready { active, .. } if active == tx.id()));

        tx.commit().unwrap();
        assert!(tm.current_transaction().is_none());
        let next = tm.create_transaction_now().unwrap();
        assert!(next.id() > tx.id());
        next.rollback(None).unwrap();
    }

    #[test]
    fn asap_times_out_while_slot_is_held() {
        let tm = manager(Config::default().asap_timeout(Duration::from_millis(30)));
        let tx = tm.create_transaction_now().unwrap();

        let waiter = Arc::clone(&tm);
        let result = thread::spawn(move || waiter.create_transaction_asap().map(|t| t.id()))
            .join()
            .unwrap();
        assert!(matches!(result, Err(MeshError::TransactionAsapTimeout { .. })));
        tx.commit().unwrap();
    }

    #[test]
    fn asap_proceeds_once_slot_is_released() {
        let tm = manager(Config::default().asap_timeout(Duration::from_secs(5)));
        let tx = tm.create_transaction_now().unwrap();

        let waiter = Arc::clone(&tm);
        let handle = thread::spawn(move || {
            let tx = waiter.create_transaction_asap().unwrap();
            let id = tx.id();
            tx.commit().unwrap();
            id
        });
        thread::sleep(Duration::from_millis(20));
        tx.commit().unwrap();

        let second = handle.join().unwrap();
        assert!(second > tx.id());
    }

    #[test]
    fn asap_on_owning_thread_fails_fast() {
        let tm = manager(Config::default());
        let tx = tm.create_transaction_now().unwrap();
        assert!(matches!(
            tm.create_transaction_asap(),
            Err(MeshError::TransactionActiveAlready { .. })
        ));
        tx.rollback(None).unwrap();
    }

    #[test]
    fn if_needed_joins_same_thread_only() {
        let tm = manager(Config::default());
        let opened = tm.create_transaction_now_if_needed().unwrap();
        assert!(opened.is_opened());

        let joined = tm.create_transaction_now_if_needed().unwrap();
        assert!(!joined.is_opened());
        assert!(Arc::ptr_eq(joined.transaction(), opened.transaction()));
        joined.finish().unwrap();
        assert!(opened.is_active());

        let other = Arc::clone(&tm);
        let from_other_thread = thread::spawn(move || other.create_transaction_now_if_needed().map(|h| h.is_opened()))
            .join()
            .unwrap();
        assert!(matches!(from_other_thread, Err(MeshError::TransactionActiveAlready { .. })));

        opened.finish().unwrap();
        assert!(tm.current_transaction().is_none());
    }

    #[test]
    fn check_transaction_rejects_finished_and_foreign() {
        let tm = manager(Config::default());
        let other = manager(Config::default());
        let tx = tm.create_transaction_now().unwrap();
        let foreign = other.create_transaction_now().unwrap();

        assert!(tm.check_transaction(&tx).is_ok());
        assert!(tm.check_transaction(&foreign).is_err());

        tx.commit().unwrap();
        assert!(matches!(
            tm.check_transaction(&tx),
            Err(MeshError::NotWithinTransactionBoundaries { .. })
        ));
        assert!(tx.add_change(crate::Change::state(
            "a".into(),
            crate::ObjectState::Live,
            crate::ObjectState::Stale,
            crate::TimeStamp::now(),
        ))
        .is_err());
        foreign.rollback(None).unwrap();
    }

    #[test]
    fn finished_transaction_cannot_finish_again() {
        let tm = manager(Config::default());
        let tx = tm.create_transaction_now().unwrap();
        tx.commit().unwrap();
        assert_eq!(tx.state(), TransactionState::Committed);
        assert!(tx.commit().is_err());
        assert!(tx.rollback(None).is_err());
        assert!(tx.change_set().is_frozen());
    }

    #[test]
    fn listeners_are_notified_in_registration_order() {
        let tm = manager(Config::default());
        let first = Arc::new(Recorder {
            name: "first",
            ..Recorder::default()
        });
        let second = Arc::new(Recorder {
            name: "second",
            ..Recorder::default()
        });
        tm.add_transaction_listener(first.clone());
        tm.add_transaction_listener(second.clone());

        let tx = tm.create_transaction_now().unwrap();
        tx.commit().unwrap();
        let tx2 = tm.create_transaction_now().unwrap();
        tx2.rollback(None).unwrap();

        assert_eq!(
            *first.events.lock(),
            vec!["first:started:txn:1", "first:committed:txn:1", "first:started:txn:2", "first:rolled_back:txn:2"]
        );
        assert_eq!(second.events.lock().len(), 4);
    }

    #[test]
    fn failing_listener_stops_fan_out() {
        struct Failing;
        impl TransactionListener for Failing {
            fn transaction_committed(&self, _tx: &Transaction) -> MeshResult<()> {
                Err(MeshError::listener_failed("nope"))
            }
        }

        let tm = manager(Config::default());
        let after = Arc::new(Recorder {
            name: "after",
            ..Recorder::default()
        });
        tm.add_transaction_listener(Arc::new(Failing));
        tm.add_transaction_listener(after.clone());

        let tx = tm.create_transaction_now().unwrap();
        let err = tx.commit().unwrap_err();
        assert!(matches!(err, MeshError::ListenerFailed { .. }));
        assert_eq!(tx.state(), TransactionState::Committed);
        assert!(tm.current_transaction().is_none());
        assert_eq!(*after.events.lock(), vec!["after:started:txn:1"]);
    }
}
