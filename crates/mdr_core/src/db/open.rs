//! Connection bootstrap.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON`, the configured busy timeout
//!   and a fully migrated schema.
//! - Every open emits one `db_open` start event and one ok/error event.

use super::migrations::apply_migrations;
use super::{DbError, DbResult};
use crate::config::EngineConfig;
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::Instant;

/// Opens a database file with default settings and migrates it.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    open_db_with_config(path, &EngineConfig::default())
}

/// Opens a database file, applying `config.busy_timeout_ms` for write claims.
pub fn open_db_with_config(path: impl AsRef<Path>, config: &EngineConfig) -> DbResult<Connection> {
    bootstrap("file", config, || Connection::open(path))
}

/// Opens a private in-memory database and migrates it.
pub fn open_db_in_memory() -> DbResult<Connection> {
    bootstrap("memory", &EngineConfig::default(), Connection::open_in_memory)
}

fn bootstrap(
    mode: &str,
    config: &EngineConfig,
    connect: impl FnOnce() -> rusqlite::Result<Connection>,
) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode={mode}");

    let result = connect()
        .map_err(DbError::from)
        .and_then(|mut conn| -> DbResult<Connection> {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.busy_timeout(config.busy_timeout())?;
            apply_migrations(&mut conn)?;
            Ok(conn)
        });

    match &result {
        Ok(_) => info!(
            "event=db_open module=db status=ok mode={} duration_ms={} busy_timeout_ms={}",
            mode,
            started_at.elapsed().as_millis(),
            config.busy_timeout_ms
        ),
        Err(err) => error!(
            "event=db_open module=db status=error mode={} duration_ms={} error={}",
            mode,
            started_at.elapsed().as_millis(),
            err
        ),
    }

    result
}
