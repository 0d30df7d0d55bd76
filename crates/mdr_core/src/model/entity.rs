//! Roots, libraries, version edges and audit records.
//!
//! # Responsibility
//! - Define the persisted shapes the ledger, audit and façade layers exchange.
//!
//! # Invariants
//! - A root uid is never reused; deletion only sets `deleted_at`.
//! - Edge validity is the half-open interval `[start_date, end_date)`.
//! - Audit states are stored inline, so they outlive structural deletion.

use crate::model::snapshot::{EntityKind, RootUid, SnapshotContent, SnapshotId};
use crate::model::version::{LibraryItemStatus, Version};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Namespace of entity roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Library {
    pub name: String,
    pub is_editable: bool,
}

/// Permanent identity of one versioned thing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRoot {
    pub uid: RootUid,
    pub kind: EntityKind,
    pub library_name: String,
    pub created_at: i64,
    pub deleted_at: Option<i64>,
}

impl EntityRoot {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Link between a root and one snapshot, with status, version and validity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionEdge {
    pub edge_id: i64,
    pub root_uid: RootUid,
    pub snapshot_id: SnapshotId,
    pub status: LibraryItemStatus,
    pub version: Version,
    pub start_date: i64,
    pub end_date: Option<i64>,
    pub author_id: String,
    pub change_description: String,
}

impl VersionEdge {
    pub fn is_open(&self) -> bool {
        self.end_date.is_none()
    }

    /// True when `at` lies inside `[start_date, end_date)`.
    pub fn covers(&self, at: i64) -> bool {
        self.start_date <= at && self.end_date.map_or(true, |end| at < end)
    }
}

/// Kind of an audit trail entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditKind {
    Create,
    Edit,
    Delete,
}

impl AuditKind {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Edit => "Edit",
            Self::Delete => "Delete",
        }
    }

    pub fn from_db_str(value: &str) -> Option<Self> {
        match value {
            "Create" => Some(Self::Create),
            "Edit" => Some(Self::Edit),
            "Delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl Display for AuditKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// Reconstructible entity state referenced by an audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub edge_id: i64,
    pub version: Version,
    pub status: LibraryItemStatus,
    pub snapshot_id: SnapshotId,
    pub content: SnapshotContent,
}

impl EntityState {
    pub fn from_edge(edge: &VersionEdge, content: &SnapshotContent) -> Self {
        Self {
            edge_id: edge.edge_id,
            version: edge.version,
            status: edge.status,
            snapshot_id: edge.snapshot_id.clone(),
            content: content.clone(),
        }
    }
}

/// One immutable audit trail entry.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditAction {
    pub action_id: i64,
    pub root_uid: RootUid,
    pub kind: AuditKind,
    pub date: i64,
    pub author_id: String,
    pub before: Option<EntityState>,
    pub after: Option<EntityState>,
}

/// Entity view returned by the façade read paths.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEntity {
    pub root: EntityRoot,
    pub edge: VersionEdge,
    pub content: SnapshotContent,
    /// Set when an `AtDate` lookup predates the first edge and fell back.
    pub date_conflict: bool,
    /// Version surfaced for "as of" views among the edges valid at the lookup instant.
    pub display_version: Version,
    pub author_username: String,
}
