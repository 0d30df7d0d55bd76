//! Libraries, entity roots and uid allocation.
//!
//! # Responsibility
//! - Persist libraries and their editability flag.
//! - Allocate `<Prefix>_<000001>` uids from per-kind counters.
//! - Create, tombstone and look up entity roots.
//!
//! # Invariants
//! - Counters only move forward, so a uid is never handed out twice.
//! - Roots are never removed; deletion sets `deleted_at`.

use crate::db::ensure_schema_ready;
use crate::error::{VersioningError, VersioningResult};
use crate::model::entity::{EntityRoot, Library};
use crate::model::snapshot::{EntityKind, RootUid};
use rusqlite::{params, Connection, OptionalExtension, Row};

const ROOT_SELECT_SQL: &str = "SELECT
    uid,
    kind,
    library_name,
    created_at,
    deleted_at
FROM entity_roots";

/// SQLite-backed library and root repository.
pub struct SqliteLibraryRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteLibraryRepository<'conn> {
    /// Wraps a connection already known to carry the current schema.
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn try_new(conn: &'conn Connection) -> VersioningResult<Self> {
        ensure_schema_ready(conn)?;
        Ok(Self { conn })
    }

    pub fn create_library(&self, name: &str, is_editable: bool) -> VersioningResult<Library> {
        let name = name.trim();
        if name.is_empty() {
            return Err(VersioningError::InvalidData(
                "library name must not be blank".to_string(),
            ));
        }

        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO libraries (name, is_editable) VALUES (?1, ?2);",
            params![name, is_editable],
        )?;
        if inserted == 0 {
            return Err(VersioningError::BusinessRule(format!(
                "library `{name}` already exists"
            )));
        }

        Ok(Library {
            name: name.to_string(),
            is_editable,
        })
    }

    pub fn get_library(&self, name: &str) -> VersioningResult<Option<Library>> {
        let library = self
            .conn
            .query_row(
                "SELECT name, is_editable FROM libraries WHERE name = ?1;",
                [name],
                |row| {
                    Ok(Library {
                        name: row.get(0)?,
                        is_editable: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(library)
    }

    pub fn require_library(&self, name: &str) -> VersioningResult<Library> {
        self.get_library(name)?
            .ok_or_else(|| VersioningError::NotFound(format!("library not found: {name}")))
    }

    pub fn set_editable(&self, name: &str, is_editable: bool) -> VersioningResult<()> {
        let changed = self.conn.execute(
            "UPDATE libraries SET is_editable = ?2 WHERE name = ?1;",
            params![name, is_editable],
        )?;
        if changed == 0 {
            return Err(VersioningError::NotFound(format!("library not found: {name}")));
        }
        Ok(())
    }

    /// Reserves the next uid for `kind`. Call inside the write transaction.
    pub fn generate_uid(&self, kind: EntityKind) -> VersioningResult<RootUid> {
        self.conn.execute(
            "INSERT INTO uid_counters (kind, next_value) VALUES (?1, 1)
             ON CONFLICT(kind) DO NOTHING;",
            [kind.as_db_str()],
        )?;
        let value: i64 = self.conn.query_row(
            "SELECT next_value FROM uid_counters WHERE kind = ?1;",
            [kind.as_db_str()],
            |row| row.get(0),
        )?;
        self.conn.execute(
            "UPDATE uid_counters SET next_value = next_value + 1 WHERE kind = ?1;",
            [kind.as_db_str()],
        )?;

        Ok(format!("{}_{:06}", kind.uid_prefix(), value))
    }

    pub fn create_root(
        &self,
        kind: EntityKind,
        library_name: &str,
        created_at: i64,
    ) -> VersioningResult<EntityRoot> {
        let uid = self.generate_uid(kind)?;
        self.conn.execute(
            "INSERT INTO entity_roots (uid, kind, library_name, created_at)
             VALUES (?1, ?2, ?3, ?4);",
            params![uid, kind.as_db_str(), library_name, created_at],
        )?;

        Ok(EntityRoot {
            uid,
            kind,
            library_name: library_name.to_string(),
            created_at,
            deleted_at: None,
        })
    }

    /// Root by uid, tombstoned or not.
    pub fn get_root(&self, uid: &str) -> VersioningResult<Option<EntityRoot>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{ROOT_SELECT_SQL} WHERE uid = ?1;"))?;
        let mut rows = stmt.query([uid])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_root_row(row)?)),
            None => Ok(None),
        }
    }

    /// Root by uid; tombstoned roots count as missing.
    pub fn require_active_root(&self, uid: &str) -> VersioningResult<EntityRoot> {
        match self.get_root(uid)? {
            Some(root) if !root.is_deleted() => Ok(root),
            _ => Err(VersioningError::not_found_root(uid)),
        }
    }

    /// Current `lock_token` of a root, tombstoned or not. Every committed
    /// save bumps it, so it doubles as a change counter for readers.
    pub fn lock_token(&self, uid: &str) -> VersioningResult<Option<i64>> {
        let token = self
            .conn
            .query_row(
                "SELECT lock_token FROM entity_roots WHERE uid = ?1;",
                [uid],
                |row| row.get(0),
            )
            .optional()?;
        Ok(token)
    }

    pub fn list_roots(&self, kind: EntityKind) -> VersioningResult<Vec<EntityRoot>> {
        let mut stmt = self.conn.prepare(&format!(
            "{ROOT_SELECT_SQL}
             WHERE kind = ?1 AND deleted_at IS NULL
             ORDER BY uid ASC;"
        ))?;
        let mut rows = stmt.query([kind.as_db_str()])?;
        let mut roots = Vec::new();
        while let Some(row) = rows.next()? {
            roots.push(parse_root_row(row)?);
        }
        Ok(roots)
    }

    pub fn tombstone_root(&self, uid: &str, deleted_at: i64) -> VersioningResult<()> {
        let changed = self.conn.execute(
            "UPDATE entity_roots SET deleted_at = ?2 WHERE uid = ?1 AND deleted_at IS NULL;",
            params![uid, deleted_at],
        )?;
        if changed == 0 {
            return Err(VersioningError::not_found_root(uid));
        }
        Ok(())
    }
}

fn parse_root_row(row: &Row<'_>) -> VersioningResult<EntityRoot> {
    let kind_raw: String = row.get(1)?;
    let kind = EntityKind::from_db_str(&kind_raw).ok_or_else(|| {
        VersioningError::InvalidData(format!("unknown entity kind `{kind_raw}`"))
    })?;

    Ok(EntityRoot {
        uid: row.get(0)?,
        kind,
        library_name: row.get(2)?,
        created_at: row.get(3)?,
        deleted_at: row.get(4)?,
    })
}
