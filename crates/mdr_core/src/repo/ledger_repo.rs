//! Version edge persistence.
//!
//! # Responsibility
//! - Load a root's edges in `(major, minor, start_date)` order.
//! - Open and close edges as planned by `model::ledger`.
//!
//! # Invariants
//! - Only open edges are ever closed; closing an already closed edge means
//!   a concurrent writer bypassed the lock and is reported as a violation.
//! - `(root_uid, start_date)` is unique.

use crate::error::{VersioningError, VersioningResult};
use crate::model::entity::VersionEdge;
use crate::model::snapshot::SnapshotId;
use crate::model::version::{LibraryItemStatus, Version};
use rusqlite::{params, Connection, Row};

const EDGE_SELECT_SQL: &str = "SELECT
    edge_id,
    root_uid,
    snapshot_id,
    status,
    major,
    minor,
    start_date,
    end_date,
    author_id,
    change_description
FROM version_edges";

/// Values for a new edge; the store assigns `edge_id`.
#[derive(Debug, Clone)]
pub struct NewVersionEdge<'a> {
    pub root_uid: &'a str,
    pub snapshot_id: &'a str,
    pub status: LibraryItemStatus,
    pub version: Version,
    pub start_date: i64,
    pub author_id: &'a str,
    pub change_description: &'a str,
}

pub struct SqliteLedgerRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteLedgerRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn list_edges(&self, root_uid: &str) -> VersioningResult<Vec<VersionEdge>> {
        let mut stmt = self.conn.prepare(&format!(
            "{EDGE_SELECT_SQL}
             WHERE root_uid = ?1
             ORDER BY major ASC, minor ASC, start_date ASC;"
        ))?;
        let mut rows = stmt.query([root_uid])?;
        let mut edges = Vec::new();
        while let Some(row) = rows.next()? {
            edges.push(parse_edge_row(row)?);
        }
        Ok(edges)
    }

    pub fn insert_edge(&self, edge: &NewVersionEdge<'_>) -> VersioningResult<VersionEdge> {
        self.conn.execute(
            "INSERT INTO version_edges (
                root_uid,
                snapshot_id,
                status,
                major,
                minor,
                start_date,
                author_id,
                change_description
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                edge.root_uid,
                edge.snapshot_id,
                edge.status.as_db_str(),
                edge.version.major,
                edge.version.minor,
                edge.start_date,
                edge.author_id,
                edge.change_description,
            ],
        )?;

        Ok(VersionEdge {
            edge_id: self.conn.last_insert_rowid(),
            root_uid: edge.root_uid.to_string(),
            snapshot_id: edge.snapshot_id.to_string(),
            status: edge.status,
            version: edge.version,
            start_date: edge.start_date,
            end_date: None,
            author_id: edge.author_id.to_string(),
            change_description: edge.change_description.to_string(),
        })
    }

    pub fn close_edges(
        &self,
        root_uid: &str,
        edge_ids: &[i64],
        end_date: i64,
    ) -> VersioningResult<()> {
        for edge_id in edge_ids {
            let changed = self.conn.execute(
                "UPDATE version_edges
                 SET end_date = ?3
                 WHERE edge_id = ?1
                   AND root_uid = ?2
                   AND end_date IS NULL;",
                params![edge_id, root_uid, end_date],
            )?;
            if changed == 0 {
                return Err(VersioningError::ConsistencyViolation {
                    uid: root_uid.to_string(),
                    reason: format!("edge {edge_id} was expected to be open"),
                });
            }
        }
        Ok(())
    }

    /// Removes every edge of a root and returns the snapshot ids they used.
    pub fn delete_edges(&self, root_uid: &str) -> VersioningResult<Vec<SnapshotId>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT snapshot_id FROM version_edges WHERE root_uid = ?1;",
        )?;
        let snapshot_ids = stmt
            .query_map([root_uid], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        self.conn
            .execute("DELETE FROM version_edges WHERE root_uid = ?1;", [root_uid])?;
        Ok(snapshot_ids)
    }
}

fn parse_edge_row(row: &Row<'_>) -> VersioningResult<VersionEdge> {
    let status_raw: String = row.get(3)?;
    let status = LibraryItemStatus::from_db_str(&status_raw).ok_or_else(|| {
        VersioningError::InvalidData(format!("unknown edge status `{status_raw}`"))
    })?;

    Ok(VersionEdge {
        edge_id: row.get(0)?,
        root_uid: row.get(1)?,
        snapshot_id: row.get(2)?,
        status,
        version: Version::new(row.get(4)?, row.get(5)?),
        start_date: row.get(6)?,
        end_date: row.get(7)?,
        author_id: row.get(8)?,
        change_description: row.get(9)?,
    })
}
