//! Root-level write claims.
//!
//! # Responsibility
//! - Run a closure inside one `BEGIN IMMEDIATE` transaction.
//! - Mark the claimed root by bumping its `lock_token`.
//!
//! # Invariants
//! - Commit only on `Ok`; any `Err` rolls everything back.
//! - The claim is released implicitly at commit or rollback.
//! - Waiting longer than the connection busy timeout yields a retryable
//!   `VersioningError::Concurrency`.
//! - Transactions never nest. Work that must share an open claim goes
//!   through the scope handed to the outer closure.

use crate::error::{VersioningError, VersioningResult};
use log::{debug, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::time::Instant;

/// Runs `f` inside an exclusive write transaction.
///
/// # Errors
/// - `BusinessRule` when `conn` already has an open transaction.
pub fn with_write_transaction<T, F>(conn: &Connection, f: F) -> VersioningResult<T>
where
    F: FnOnce(&Transaction<'_>) -> VersioningResult<T>,
{
    if !conn.is_autocommit() {
        warn!("event=lock_acquire module=lock status=nested");
        return Err(VersioningError::BusinessRule(
            "a write transaction is already open on this connection; \
             save through the LockedScope passed to with_lock instead"
                .to_string(),
        ));
    }

    let started_at = Instant::now();
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate).map_err(|err| {
        let err = VersioningError::from(err);
        if err.is_retryable() {
            warn!(
                "event=lock_acquire module=lock status=timeout wait_ms={}",
                started_at.elapsed().as_millis()
            );
        }
        err
    })?;
    debug!(
        "event=lock_acquire module=lock status=ok wait_ms={}",
        started_at.elapsed().as_millis()
    );

    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

/// Runs `f` with an exclusive claim on `uid`.
///
/// # Errors
/// - `NotFound` when the root does not exist.
/// - `Concurrency` when another writer holds the claim past the busy timeout.
pub fn with_lock<T, F>(conn: &Connection, uid: &str, f: F) -> VersioningResult<T>
where
    F: FnOnce(&Transaction<'_>) -> VersioningResult<T>,
{
    with_write_transaction(conn, |tx| {
        claim_root(tx, uid)?;
        f(tx)
    })
}

/// Marks `uid` as written by the current transaction and returns the new token.
pub fn claim_root(conn: &Connection, uid: &str) -> VersioningResult<i64> {
    let changed = conn.execute(
        "UPDATE entity_roots SET lock_token = lock_token + 1 WHERE uid = ?1;",
        [uid],
    )?;
    if changed == 0 {
        return Err(VersioningError::not_found_root(uid));
    }
    let token = conn.query_row(
        "SELECT lock_token FROM entity_roots WHERE uid = ?1;",
        [uid],
        |row| row.get(0),
    )?;
    Ok(token)
}
