//! Content-addressed snapshot store.
//!
//! # Responsibility
//! - Persist immutable snapshots and the reference pins taken at creation.
//! - Decide, per save, whether desired content needs a new snapshot.
//!
//! # Invariants
//! - Snapshot rows are never updated. Equal content plus equal pins maps to
//!   one row (`INSERT OR IGNORE` on the content address).
//! - Unchanged content reuses the base snapshot id and writes nothing.
//! - Rows are removed only when no version edge references them anymore.

use crate::error::{VersioningError, VersioningResult};
use crate::model::entity::VersionEdge;
use crate::model::equality::ContentEqualityStrategy;
use crate::model::snapshot::{content_address, ReferencePins, SnapshotContent, SnapshotId};
use crate::model::version::LibraryItemStatus;
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};

/// Snapshot as stored, with the pins recorded at creation.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSnapshot {
    pub snapshot_id: SnapshotId,
    pub content: SnapshotContent,
    pub pins: ReferencePins,
}

/// Result of [`SqliteSnapshotRepository::propose`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotProposal {
    pub snapshot_id: SnapshotId,
    pub changed: bool,
    /// A new row was written. False when an equal snapshot already existed.
    pub created: bool,
}

pub struct SqliteSnapshotRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSnapshotRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, snapshot_id: &str) -> VersioningResult<Option<StoredSnapshot>> {
        let content_json: Option<String> = self
            .conn
            .query_row(
                "SELECT content_json FROM snapshots WHERE snapshot_id = ?1;",
                [snapshot_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(content_json) = content_json else {
            return Ok(None);
        };
        let content: SnapshotContent = serde_json::from_str(&content_json)?;

        let mut stmt = self.conn.prepare(
            "SELECT target_uid, target_snapshot_id
             FROM snapshot_refs
             WHERE snapshot_id = ?1;",
        )?;
        let mut rows = stmt.query([snapshot_id])?;
        let mut pins = ReferencePins::new();
        while let Some(row) = rows.next()? {
            pins.insert(row.get(0)?, row.get(1)?);
        }

        Ok(Some(StoredSnapshot {
            snapshot_id: snapshot_id.to_string(),
            content,
            pins,
        }))
    }

    /// Snapshot an edge points at; a dangling id means corrupted storage.
    pub fn require(&self, snapshot_id: &str) -> VersioningResult<StoredSnapshot> {
        self.get(snapshot_id)?.ok_or_else(|| {
            VersioningError::InvalidData(format!("snapshot {snapshot_id} is referenced but missing"))
        })
    }

    /// Snapshot behind the `Latest` edge of `uid`, if the root has any edge.
    pub fn latest_snapshot_of(&self, uid: &str) -> VersioningResult<Option<SnapshotId>> {
        let snapshot_id = self
            .conn
            .query_row(
                "SELECT snapshot_id
                 FROM version_edges
                 WHERE root_uid = ?1 AND end_date IS NULL
                 ORDER BY
                    CASE status WHEN 'Draft' THEN 0 WHEN 'Final' THEN 1 ELSE 2 END,
                    start_date DESC
                 LIMIT 1;",
                [uid],
                |row| row.get(0),
            )
            .optional()?;
        Ok(snapshot_id)
    }

    /// Pins every referenced uid of `content` to its current latest snapshot.
    pub fn current_pins(&self, content: &SnapshotContent) -> VersioningResult<ReferencePins> {
        let mut pins = ReferencePins::new();
        for uid in content.referenced_uids() {
            pins.insert(uid.clone(), self.latest_snapshot_of(uid)?);
        }
        Ok(pins)
    }

    /// True when a referenced root moved on since `stored` was created.
    pub fn has_stale_pins(&self, stored: &StoredSnapshot) -> VersioningResult<bool> {
        for (uid, pinned) in &stored.pins {
            if self.latest_snapshot_of(uid)? != *pinned {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Writes `content` under its address unless an equal row exists.
    pub fn insert(
        &self,
        content: &SnapshotContent,
        pins: &ReferencePins,
        created_at: i64,
    ) -> VersioningResult<(SnapshotId, bool)> {
        let snapshot_id = content_address(content, pins)?;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO snapshots (snapshot_id, kind, content_json, created_at)
             VALUES (?1, ?2, ?3, ?4);",
            params![
                snapshot_id,
                content.kind.as_db_str(),
                content.canonical_json()?,
                created_at
            ],
        )?;

        if inserted == 1 {
            for (category, uids) in &content.references {
                for uid in uids {
                    self.conn.execute(
                        "INSERT INTO snapshot_refs (snapshot_id, category, target_uid, target_snapshot_id)
                         VALUES (?1, ?2, ?3, ?4);",
                        params![snapshot_id, category, uid, pins.get(uid).cloned().flatten()],
                    )?;
                }
            }
        }

        Ok((snapshot_id, inserted == 1))
    }

    /// Decides whether `desired` differs from the base edge's snapshot and
    /// stores it when it does.
    ///
    /// A Draft base also counts as changed when one of its pins went stale.
    /// Final and Retired bases skip that check, so opening a new draft
    /// version does not mint content on its own.
    pub fn propose(
        &self,
        base: Option<(&VersionEdge, &StoredSnapshot)>,
        desired: &SnapshotContent,
        strategy: &dyn ContentEqualityStrategy,
        now: i64,
    ) -> VersioningResult<SnapshotProposal> {
        if let Some((edge, stored)) = base {
            if stored.content.kind != desired.kind {
                return Err(VersioningError::InvalidData(format!(
                    "content kind {} does not match {} of {}",
                    desired.kind, stored.content.kind, edge.root_uid
                )));
            }

            let content_changed = strategy.is_changed(&stored.content, desired);
            let stale = !content_changed
                && edge.status == LibraryItemStatus::Draft
                && self.has_stale_pins(stored)?;

            if !content_changed && !stale {
                debug!(
                    "event=snapshot_propose module=snapshot status=reused root_uid={} snapshot_id={}",
                    edge.root_uid, edge.snapshot_id
                );
                return Ok(SnapshotProposal {
                    snapshot_id: edge.snapshot_id.clone(),
                    changed: false,
                    created: false,
                });
            }
        }

        let pins = self.current_pins(desired)?;
        let (snapshot_id, created) = self.insert(desired, &pins, now)?;
        debug!(
            "event=snapshot_propose module=snapshot status=changed snapshot_id={} created={}",
            snapshot_id, created
        );

        Ok(SnapshotProposal {
            snapshot_id,
            changed: true,
            created,
        })
    }

    /// Removes a snapshot no edge references anymore. Returns whether it went.
    pub fn delete_if_unreferenced(&self, snapshot_id: &str) -> VersioningResult<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM snapshots
             WHERE snapshot_id = ?1
               AND NOT EXISTS (SELECT 1 FROM version_edges WHERE snapshot_id = ?1);",
            [snapshot_id],
        )?;
        Ok(deleted == 1)
    }

    pub fn count(&self) -> VersioningResult<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM snapshots;", [], |row| row.get(0))?;
        Ok(count)
    }
}
