//! Read cache owned by the façade.
//!
//! # Responsibility
//! - Keep recently read ledgers and audit histories keyed by root uid.
//!
//! # Invariants
//! - Entries are only filled from committed reads outside write transactions.
//! - Every entry is stamped with the root's `lock_token` read before the
//!   entry was loaded. A hit is served only while the stored token still
//!   equals the current one. Every committed save bumps the token, so writes
//!   through other façades, connections or processes are never masked.
//! - A successful save through this cache's façade also drops every entry of
//!   each touched uid right away.
//! - Capacity is bounded; the optional TTL only ages out idle entries.

use crate::config::EngineConfig;
use crate::model::entity::{AuditAction, VersionEdge};
use crate::model::snapshot::RootUid;
use log::debug;
use moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Stamped<T> {
    lock_token: i64,
    value: Arc<Vec<T>>,
}

/// Cloning shares the underlying caches.
#[derive(Clone)]
pub struct EntityCache {
    ledgers: Cache<RootUid, Stamped<VersionEdge>>,
    histories: Cache<RootUid, Stamped<AuditAction>>,
}

impl EntityCache {
    pub fn new(max_capacity: u64, ttl: Option<Duration>) -> Self {
        Self {
            ledgers: build_cache(max_capacity, ttl),
            histories: build_cache(max_capacity, ttl),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.cache_max_capacity, config.cache_ttl())
    }

    /// Cached ledger of `uid`, if it was loaded under `lock_token`.
    pub fn ledger(&self, uid: &str, lock_token: i64) -> Option<Arc<Vec<VersionEdge>>> {
        fresh(&self.ledgers, "ledger", uid, lock_token)
    }

    /// Stores `edges` read after observing `lock_token`.
    pub fn store_ledger(&self, uid: &str, lock_token: i64, edges: Arc<Vec<VersionEdge>>) {
        self.ledgers.insert(
            uid.to_string(),
            Stamped {
                lock_token,
                value: edges,
            },
        );
    }

    pub fn history(&self, uid: &str, lock_token: i64) -> Option<Arc<Vec<AuditAction>>> {
        fresh(&self.histories, "history", uid, lock_token)
    }

    pub fn store_history(&self, uid: &str, lock_token: i64, actions: Arc<Vec<AuditAction>>) {
        self.histories.insert(
            uid.to_string(),
            Stamped {
                lock_token,
                value: actions,
            },
        );
    }

    /// Drops every entry for each uid.
    pub fn invalidate<'a>(&self, uids: impl IntoIterator<Item = &'a str>) {
        for uid in uids {
            self.ledgers.invalidate(uid);
            self.histories.invalidate(uid);
            debug!("event=cache_invalidate module=cache status=ok root_uid={uid}");
        }
    }
}

impl Default for EntityCache {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

fn fresh<T>(
    cache: &Cache<RootUid, Stamped<T>>,
    entry: &str,
    uid: &str,
    lock_token: i64,
) -> Option<Arc<Vec<T>>>
where
    T: Clone + Send + Sync + 'static,
{
    let stamped = cache.get(uid)?;
    if stamped.lock_token == lock_token {
        return Some(stamped.value);
    }

    cache.invalidate(uid);
    debug!(
        "event=cache_invalidate module=cache status=stale entry={} root_uid={} cached_token={} current_token={}",
        entry, uid, stamped.lock_token, lock_token
    );
    None
}

fn build_cache<V>(max_capacity: u64, ttl: Option<Duration>) -> Cache<RootUid, V>
where
    V: Clone + Send + Sync + 'static,
{
    let mut builder = Cache::builder().max_capacity(max_capacity);
    if let Some(ttl) = ttl {
        builder = builder.time_to_live(ttl);
    }
    builder.build()
}
