//! Transactions and their management.
//!
//! A mesh base allows one active [`Transaction`] at a time. Every mutation
//! records a [`Change`](crate::Change) into it. Before the transaction
//! commits, projected properties dirtied during the transaction are
//! recalculated until no more objects are dirty:
//! - **Double-buffered**: updaters running in one round enqueue into the next
//! - **Bounded**: rounds that do not shrink the worklist are counted, and a
//!   cycle is declared once [`Config::max_recalculate_attempts`] of them
//!   happen in a row
//! - **Configurable**: a cycle is logged, or fails the commit under
//!   [`CyclePolicy::Fail`]
//!
//! [`Config::max_recalculate_attempts`]: crate::Config::max_recalculate_attempts
//! [`CyclePolicy::Fail`]: crate::CyclePolicy::Fail

mod action;
mod dirty;
mod listener;
mod manager;
mod on_demand;
mod state;

pub use action::{ActionOutcome, ActionResult, TransactionAction, TransactionActionError};
pub use dirty::{DirtyRecord, ProjectedPropertyUpdater, RecalculationReport};
pub use listener::{LifecycleListener, ListenerSet, TransactionListener};
pub use manager::{TransactionHandle, TransactionManager};
pub use on_demand::OnDemandTransaction;
pub use state::{Transaction, TransactionState};
