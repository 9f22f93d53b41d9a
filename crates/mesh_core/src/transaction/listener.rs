//! Transaction and lifecycle listeners.

use crate::change::Change;
use crate::error::{MeshError, MeshResult};
use crate::transaction::Transaction;
use parking_lot::RwLock;
use std::sync::Arc;

/// Observes the transactions of a mesh base.
///
/// Listeners are notified in registration order. An error returned from a
/// notification stops the fan-out and is handed to whoever finished the
/// transaction.
///
/// Notifications arrive while the transaction still holds its mesh base, so
/// a listener cannot start another transaction on the same mesh base.
pub trait TransactionListener: Send + Sync {
    /// A transaction became active.
    fn transaction_started(&self, _tx: &Transaction) -> MeshResult<()> {
        Ok(())
    }

    /// A transaction committed.
    fn transaction_committed(&self, _tx: &Transaction) -> MeshResult<()> {
        Ok(())
    }

    /// A transaction rolled back.
    fn transaction_rolled_back(&self, _tx: &Transaction, _cause: Option<&MeshError>) -> MeshResult<()> {
        Ok(())
    }
}

/// Observes creation and deletion of objects once their transaction has
/// committed.
pub trait LifecycleListener: Send + Sync {
    /// An object was created.
    fn created(&self, _event: &Change) {}

    /// An object was deleted.
    fn deleted(&self, _event: &Change) {}
}

/// An ordered set of listeners.
///
/// Notification works on a snapshot, so listeners may register or remove
/// listeners while being notified.
pub struct ListenerSet<L: ?Sized> {
    listeners: RwLock<Vec<Arc<L>>>,
}

impl<L: ?Sized> ListenerSet<L> {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Appends a listener.
    pub fn add(&self, listener: Arc<L>) {
        self.listeners.write().push(listener);
    }

    /// Removes a listener by identity. Returns true if it was registered.
    pub fn remove(&self, listener: &Arc<L>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(listener)));
        listeners.len() != before
    }

    /// Returns the listeners in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<L>> {
        self.listeners.read().clone()
    }

    /// Returns the number of listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Returns true if no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }
}

impl<L: ?Sized> Default for ListenerSet<L> {
    fn default() -> Self {
        Self::new()
    }
}
