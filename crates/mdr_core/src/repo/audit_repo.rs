//! Append-only audit trail storage.
//!
//! # Responsibility
//! - Record one `Create | Edit | Delete` action per save.
//! - Return a root's history newest first.
//!
//! # Invariants
//! - Rows are never updated or deleted (enforced by triggers).
//! - Before/after states are stored inline as JSON.

use crate::error::{VersioningError, VersioningResult};
use crate::model::entity::{AuditAction, AuditKind, EntityState};
use rusqlite::{params, Connection, Row};

pub struct SqliteAuditRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteAuditRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn record(
        &self,
        root_uid: &str,
        kind: AuditKind,
        before: Option<&EntityState>,
        after: Option<&EntityState>,
        author_id: &str,
        date: i64,
    ) -> VersioningResult<AuditAction> {
        let before_json = before.map(serde_json::to_string).transpose()?;
        let after_json = after.map(serde_json::to_string).transpose()?;

        self.conn.execute(
            "INSERT INTO audit_actions (root_uid, kind, date, author_id, before_state, after_state)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                root_uid,
                kind.as_db_str(),
                date,
                author_id,
                before_json,
                after_json
            ],
        )?;

        Ok(AuditAction {
            action_id: self.conn.last_insert_rowid(),
            root_uid: root_uid.to_string(),
            kind,
            date,
            author_id: author_id.to_string(),
            before: before.cloned(),
            after: after.cloned(),
        })
    }

    /// Actions of `root_uid`, newest first (ties broken by insertion order).
    pub fn history(&self, root_uid: &str) -> VersioningResult<Vec<AuditAction>> {
        let mut stmt = self.conn.prepare(
            "SELECT action_id, root_uid, kind, date, author_id, before_state, after_state
             FROM audit_actions
             WHERE root_uid = ?1
             ORDER BY date DESC, action_id DESC;",
        )?;
        let mut rows = stmt.query([root_uid])?;
        let mut actions = Vec::new();
        while let Some(row) = rows.next()? {
            actions.push(parse_action_row(row)?);
        }
        Ok(actions)
    }
}

fn parse_action_row(row: &Row<'_>) -> VersioningResult<AuditAction> {
    let kind_raw: String = row.get(2)?;
    let kind = AuditKind::from_db_str(&kind_raw)
        .ok_or_else(|| VersioningError::InvalidData(format!("unknown audit kind `{kind_raw}`")))?;
    let before_raw: Option<String> = row.get(5)?;
    let after_raw: Option<String> = row.get(6)?;

    Ok(AuditAction {
        action_id: row.get(0)?,
        root_uid: row.get(1)?,
        kind,
        date: row.get(3)?,
        author_id: row.get(4)?,
        before: before_raw
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        after: after_raw.as_deref().map(serde_json::from_str).transpose()?,
    })
}
