//! Domain model of the versioned-entity engine.
//!
//! # Responsibility
//! - Define roots, snapshots, version edges and audit records.
//! - Hold the pure lifecycle, temporal and diff logic that storage layers call.
//!
//! # Invariants
//! - Model functions never touch storage; they operate on loaded edge lists.
//! - Every root is identified by a stable `RootUid`.

pub mod audit;
pub mod entity;
pub mod equality;
pub mod ledger;
pub mod snapshot;
pub mod temporal;
pub mod version;
