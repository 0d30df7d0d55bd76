//! Outbound collaborator contracts of the façade.
//!
//! # Responsibility
//! - Pick the version surfaced in "as of" views.
//! - Map author ids to display names.
//! - Supply the wall clock used to stamp new edges.

use crate::error::VersioningResult;
use crate::model::entity::VersionEdge;
use crate::model::version::Version;
use log::warn;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Chooses which version string to show among edges valid at one instant.
pub trait DisplayVersionPicker: Send + Sync {
    fn pick(&self, candidates: &[&VersionEdge]) -> Option<Version>;
}

/// Surfaces the highest version among the candidates.
#[derive(Debug, Clone, Copy, Default)]
pub struct HighestVersionPicker;

impl DisplayVersionPicker for HighestVersionPicker {
    fn pick(&self, candidates: &[&VersionEdge]) -> Option<Version> {
        candidates.iter().map(|edge| edge.version).max()
    }
}

/// Display-only lookup of author names. Never fails; falls back to the id.
pub trait AuthorUsernameResolver {
    fn username(&self, author_id: &str) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorIdAsUsername;

impl AuthorUsernameResolver for AuthorIdAsUsername {
    fn username(&self, author_id: &str) -> String {
        author_id.to_string()
    }
}

/// Reads usernames from the `users` table.
pub struct SqliteUserDirectory<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteUserDirectory<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn upsert_user(&self, user_id: &str, username: &str) -> VersioningResult<()> {
        self.conn.execute(
            "INSERT INTO users (user_id, username) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET username = excluded.username;",
            params![user_id, username],
        )?;
        Ok(())
    }
}

impl AuthorUsernameResolver for SqliteUserDirectory<'_> {
    fn username(&self, author_id: &str) -> String {
        let found: rusqlite::Result<Option<String>> = self
            .conn
            .query_row(
                "SELECT username FROM users WHERE user_id = ?1;",
                [author_id],
                |row| row.get(0),
            )
            .optional();
        match found {
            Ok(Some(username)) => username,
            Ok(None) => author_id.to_string(),
            Err(err) => {
                warn!(
                    "event=username_lookup module=service status=error author_id={} error={}",
                    author_id, err
                );
                author_id.to_string()
            }
        }
    }
}

/// Source of epoch-millisecond timestamps for new edges.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis() as i64)
    }
}

/// Clock that only moves when told to. For tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    /// Moves the clock forward and returns the new instant.
    pub fn advance(&self, delta_ms: i64) -> i64 {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst) + delta_ms
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
