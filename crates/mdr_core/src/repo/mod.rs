//! SQLite persistence for the versioning engine.
//!
//! # Responsibility
//! - Keep SQL for libraries, roots, snapshots, edges and audit rows here.
//! - Provide the write-claim primitive (`lock`) every mutation runs under.
//!
//! # Invariants
//! - Repositories borrow a connection or transaction and never begin
//!   transactions themselves; `lock` owns transaction boundaries.
//! - Semantic failures (`NotFound`, `BusinessRule`) are reported separately
//!   from transport errors.

pub mod audit_repo;
pub mod ledger_repo;
pub mod library_repo;
pub mod lock;
pub mod snapshot_repo;
