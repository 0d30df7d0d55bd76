//! Versioned-entity engine for a clinical metadata repository.
//!
//! Every mutable entity keeps a full version history with a
//! Draft/Final/Retired lifecycle, deduplicated content snapshots, an
//! append-only audit trail and temporal lookups.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::EngineConfig;
pub use error::{VersioningError, VersioningResult};
pub use logging::{
    default_log_level, init_logging, init_logging_with_config, logging_status, LoggingError,
};
pub use model::audit::{diff, AuditDiff};
pub use model::entity::{
    AuditAction, AuditKind, EntityRoot, EntityState, Library, ResolvedEntity, VersionEdge,
};
pub use model::equality::{ContentEqualityStrategy, FieldwiseEquality, StrategyRegistry};
pub use model::snapshot::{EntityKind, FieldValue, RootUid, SnapshotContent, SnapshotId};
pub use model::temporal::{resolve, ResolveMode, Resolution};
pub use model::version::{LibraryItemStatus, ObjectAction, Version};
pub use service::cache::EntityCache;
pub use service::collaborators::{
    AuthorIdAsUsername, AuthorUsernameResolver, Clock, DisplayVersionPicker,
    HighestVersionPicker, ManualClock, SqliteUserDirectory, SystemClock,
};
pub use service::versioned_entity::{
    FindOptions, LockedScope, ResolvedGraph, SaveOutcome, SaveRequest, VersionedEntityService,
};

/// Minimal health-check API for host integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
