//! # Mesh Core
//!
//! Transactional change tracking for an object mesh.
//!
//! This crate provides:
//! - Change records for every kind of object mutation, resolvable against
//!   any mesh base and invertible where that makes sense
//! - Change sets with freezing, concatenation and replay
//! - Transactions with a single active slot per mesh base, pre-commit
//!   recalculation of projected properties and cycle detection
//! - A retrying action runner and lazily created transactions
//! - An in-memory mesh base implementing the mesh boundary traits
//!
//! ## Usage
//!
//! ```ignore
//! use mesh_core::memory::{MMeshBase, MModelBase};
//! use mesh_core::{Config, MeshBaseIdentifier};
//!
//! let base = MMeshBase::create(MeshBaseIdentifier::new("main"), model, Config::default());
//! let changes = base.transactions().execute_now(|tx: &Transaction| {
//!     /* mutate objects */
//!     ActionOutcome::Success(tx.change_set())
//! })?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod change;
pub mod change_set;
pub mod config;
pub mod error;
pub mod memory;
pub mod mesh;
pub mod model;
pub mod transaction;
pub mod types;
pub mod value;

pub use change::{Aspect, Change, ChangeDirection, ChangeKind, Resolution, ResolvedValue};
pub use change_set::{ChangeSet, CompactionStrategy, IdentityCompaction};
pub use config::{Config, CyclePolicy};
pub use error::{MeshError, MeshResult};
pub use mesh::{
    ExternalizedMeshObject, LifecycleManager, MeshBase, MeshObject, MeshObjectRef, ObjectState,
    Transactable,
};
pub use model::{EntityType, ModelBase, PropertyType, RoleType};
pub use transaction::{
    ActionOutcome, ActionResult, LifecycleListener, OnDemandTransaction, ProjectedPropertyUpdater,
    RecalculationReport, Transaction, TransactionAction, TransactionActionError, TransactionHandle,
    TransactionListener, TransactionManager, TransactionState,
};
pub use types::{MeshBaseIdentifier, MeshObjectIdentifier, MeshTypeIdentifier, TimeStamp, TransactionId};
pub use value::PropertyValue;
