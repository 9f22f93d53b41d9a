//! # Mesh Testkit
//!
//! Test utilities for the mesh change tracking crates.
//!
//! This crate provides:
//! - A ready-made model and in-memory mesh base ([`TestMesh`])
//! - Projected property updaters and recording listeners
//! - A resolver wrapper that counts lookups
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mesh_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_mesh() {
//!     let mesh = TestMesh::new();
//!     let (_, changes) = mesh.in_transaction(|tx| {
//!         mesh.base.create_object(tx, None).unwrap();
//!     });
//!     assert_eq!(changes.len(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use mesh_core::*;
}

pub use fixtures::*;
pub use generators::*;
