//! Error taxonomy shared by the versioning engine.
//!
//! # Responsibility
//! - Name the invariant that rejected a mutation or lookup.
//! - Separate retryable lock contention from fatal misuse.
//!
//! # Invariants
//! - SQLite busy/locked failures always surface as `Concurrency`.
//! - `is_retryable()` is true only for `Concurrency`.

use crate::db::DbError;
use crate::model::snapshot::RootUid;
use crate::model::version::{LibraryItemStatus, ObjectAction};
use rusqlite::ErrorCode;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type VersioningResult<T> = Result<T, VersioningError>;

/// Errors returned by ledger, snapshot, audit and façade operations.
#[derive(Debug)]
pub enum VersioningError {
    /// Lifecycle action not allowed from the current state.
    InvalidTransition {
        uid: RootUid,
        status: Option<LibraryItemStatus>,
        action: ObjectAction,
    },
    /// Uid, version, status or date has nothing to resolve to.
    NotFound(String),
    /// Another transaction holds the write claim; retry the whole operation.
    Concurrency(String),
    /// Stored ledger breaks the tiling or ordering invariants.
    ConsistencyViolation { uid: RootUid, reason: String },
    /// Domain rule rejected the mutation.
    BusinessRule(String),
    Db(DbError),
    /// Persisted or supplied data cannot be interpreted.
    InvalidData(String),
}

impl VersioningError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Concurrency(_))
    }

    pub(crate) fn not_found_root(uid: &str) -> Self {
        Self::NotFound(format!("entity root not found: {uid}"))
    }
}

impl Display for VersioningError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTransition {
                uid,
                status,
                action,
            } => match status {
                Some(status) => write!(
                    f,
                    "invalid transition: `{action}` is not allowed for {uid} in status {status}"
                ),
                None => write!(
                    f,
                    "invalid transition: `{action}` is not allowed for {uid} without a current version"
                ),
            },
            Self::NotFound(message) => write!(f, "{message}"),
            Self::Concurrency(message) => write!(f, "concurrent modification: {message}"),
            Self::ConsistencyViolation { uid, reason } => {
                write!(f, "version ledger of {uid} is inconsistent: {reason}")
            }
            Self::BusinessRule(message) => write!(f, "business rule violated: {message}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid data: {message}"),
        }
    }
}

impl Error for VersioningError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for VersioningError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) => err.into(),
            other => Self::Db(other),
        }
    }
}

impl From<rusqlite::Error> for VersioningError {
    fn from(value: rusqlite::Error) -> Self {
        match value.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                Self::Concurrency(value.to_string())
            }
            _ => Self::Db(DbError::Sqlite(value)),
        }
    }
}

impl From<serde_json::Error> for VersioningError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidData(value.to_string())
    }
}
