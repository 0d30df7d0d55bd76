//! SQLite storage bootstrap for the versioning engine.
//!
//! # Responsibility
//! - Open connections configured for exclusive write claims.
//! - Bring the ledger, snapshot and audit schema up to date.
//!
//! # Invariants
//! - Schema version lives in `PRAGMA user_version`.
//! - Repositories refuse connections whose schema is not current.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory, open_db_with_config};

pub type DbResult<T> = Result<T, DbError>;

/// Storage bootstrap and schema readiness failures.
#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// Connection was opened without running migrations.
    SchemaNotReady {
        expected_version: u32,
        actual_version: u32,
    },
    MissingTable(&'static str),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::SchemaNotReady {
                expected_version,
                actual_version,
            } => write!(
                f,
                "versioning schema not ready: expected user_version {expected_version}, found {actual_version}"
            ),
            Self::MissingTable(table) => write!(f, "versioning schema is missing table `{table}`"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Tables every repository expects after migrations.
pub(crate) const REQUIRED_TABLES: [&str; 8] = [
    "libraries",
    "entity_roots",
    "uid_counters",
    "snapshots",
    "snapshot_refs",
    "version_edges",
    "audit_actions",
    "users",
];

/// Fails unless `conn` carries the current schema.
pub fn ensure_schema_ready(conn: &rusqlite::Connection) -> DbResult<()> {
    let expected_version = migrations::latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(DbError::SchemaNotReady {
            expected_version,
            actual_version,
        });
    }

    for table in REQUIRED_TABLES {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1
            );",
            [table],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(DbError::MissingTable(table));
        }
    }

    Ok(())
}
