//! Conflict-free replicated documents
//!
//! This module implements the replication layer of the mesh core:
//! - Grow-only counters, observed-remove sets, and last-write-wins
//!   registers with type-specific merge rules
//! - General structured documents as causally-ordered operation logs with
//!   deterministic conflict resolution
//! - The per-node document store with vector clocks and snapshot
//!   export/import

pub mod counter;
pub mod document;
pub mod orset;
pub mod register;
pub mod store;


pub use counter::GCounter;
pub use document::{FieldConflict, FieldWrite, StructuredDocument};
pub use orset::{OrSet, SetElement};
pub use register::LwwRegister;
pub use store::{
    CrdtStats, DocumentKind, DocumentState, DocumentStore, MergeOutcome, ReplicatedDocument,
    StateSnapshot,
};
