//! Temporal resolution over one root's version edges.
//!
//! # Responsibility
//! - Pick the edge answering `Latest`, `LatestFinal`, `LatestRetired`,
//!   `AtDate(t)` and `Version(v)` lookups.
//!
//! # Invariants
//! - Resolution is read-only. Inconsistent ledgers are logged and resolved
//!   to the edge with the latest `start_date`, never repaired.
//! - `AtDate(t)` before the first edge falls back to the earliest edge and
//!   sets `date_conflict`.

use crate::model::entity::VersionEdge;
use crate::model::version::{LibraryItemStatus, Version};
use log::warn;

/// Lookup mode for [`resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    Latest,
    LatestFinal,
    LatestRetired,
    AtDate(i64),
    Version(Version),
}

/// Edge selected by [`resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution<'a> {
    pub edge: &'a VersionEdge,
    /// Lookup instant predates every edge; `edge` is the earliest one.
    pub date_conflict: bool,
}

/// Edges whose validity interval contains `at`.
pub fn edges_valid_at(edges: &[VersionEdge], at: i64) -> Vec<&VersionEdge> {
    edges.iter().filter(|edge| edge.covers(at)).collect()
}

/// Open Final plus an open Draft of the same major: the one legal overlap.
pub fn is_sanctioned_overlap(candidates: &[&VersionEdge]) -> bool {
    let [first, second] = candidates else {
        return false;
    };
    let (final_edge, draft_edge) = match (first.status, second.status) {
        (LibraryItemStatus::Final, LibraryItemStatus::Draft) => (first, second),
        (LibraryItemStatus::Draft, LibraryItemStatus::Final) => (second, first),
        _ => return false,
    };
    final_edge.version.major == draft_edge.version.major
        && final_edge.start_date < draft_edge.start_date
}

pub fn resolve(edges: &[VersionEdge], mode: ResolveMode) -> Option<Resolution<'_>> {
    match mode {
        ResolveMode::Latest => exact(
            latest_open(edges, LibraryItemStatus::Draft)
                .or_else(|| latest_open(edges, LibraryItemStatus::Final))
                .or_else(|| latest_open(edges, LibraryItemStatus::Retired)),
        ),
        ResolveMode::LatestFinal => exact(latest_open(edges, LibraryItemStatus::Final)),
        ResolveMode::LatestRetired => exact(latest_open(edges, LibraryItemStatus::Retired)),
        ResolveMode::Version(version) => exact(
            edges
                .iter()
                .filter(|edge| edge.version == version)
                .max_by_key(|edge| (edge.start_date, edge.edge_id)),
        ),
        ResolveMode::AtDate(at) => resolve_at(edges, at),
    }
}

fn resolve_at(edges: &[VersionEdge], at: i64) -> Option<Resolution<'_>> {
    let candidates = edges_valid_at(edges, at);

    if candidates.len() > 1 && !is_sanctioned_overlap(&candidates) {
        warn!(
            "event=temporal_resolve module=temporal status=inconsistent root_uid={} at={} candidates={}",
            candidates[0].root_uid,
            at,
            candidates.len()
        );
    }

    if let Some(edge) = candidates
        .into_iter()
        .max_by_key(|edge| (edge.start_date, edge.edge_id))
    {
        return Some(Resolution {
            edge,
            date_conflict: false,
        });
    }

    let earliest = edges
        .iter()
        .min_by_key(|edge| (edge.start_date, edge.edge_id))?;
    if earliest.start_date <= at {
        // Instant falls into a gap after the first edge.
        warn!(
            "event=temporal_resolve module=temporal status=gap root_uid={} at={}",
            earliest.root_uid, at
        );
    }
    Some(Resolution {
        edge: earliest,
        date_conflict: true,
    })
}

fn exact(edge: Option<&VersionEdge>) -> Option<Resolution<'_>> {
    edge.map(|edge| Resolution {
        edge,
        date_conflict: false,
    })
}

fn latest_open(edges: &[VersionEdge], status: LibraryItemStatus) -> Option<&VersionEdge> {
    edges
        .iter()
        .filter(|edge| edge.is_open() && edge.status == status)
        .max_by_key(|edge| (edge.start_date, edge.edge_id))
}
