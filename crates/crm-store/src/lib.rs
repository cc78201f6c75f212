//! Record store adapter for the contact merge engine.
//!
//! The merge engine never talks to a database directly. It sees the record
//! store as a set of named tables exposing four operations: `select`,
//! `insert`, `update`, and `delete`, all scoped by conjunctions of
//! exact-equality conditions ([`Filter`]). Rows are JSON objects ([`Row`]).
//!
//! # Storage Backends
//!
//! All backends implement the [`RecordStore`] trait:
//!
//! - [`InMemoryRecordStore`] -- `HashMap`-based store for tests, fixtures,
//!   and the operator CLI. Supports fault injection.
//!
//! # Design Rules
//!
//! 1. Every write is independent and immediately committed. There are no
//!    multi-statement transactions.
//! 2. Updates and deletes must carry at least one filter condition.
//! 3. Rows come back in a stable order (insertion order for the in-memory
//!    backend).
//! 4. All backend errors are propagated, never silently ignored.

pub mod error;
pub mod filter;
pub mod memory;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use error::{StoreError, StoreOp, StoreResult};
pub use filter::{Filter, Join, Row};
pub use memory::{Fixture, FixtureTable, InMemoryRecordStore};
pub use traits::RecordStore;
