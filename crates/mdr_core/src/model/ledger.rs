//! Version ledger state machine.
//!
//! # Responsibility
//! - Compute the allowed lifecycle actions for a root's current state.
//! - Plan each transition: which edges close and which edge opens.
//! - Verify stored ledgers against ordering and tiling invariants.
//!
//! # Invariants
//! - Versions never go backwards. Only a Final/Retired flip keeps the version.
//! - Start dates are strictly increasing per root.
//! - At any instant exactly one edge is valid, except an open Final that is
//!   overlapped by Drafts of the same major while a new version is prepared.
//! - Roots that were ever approved cannot be deleted.

use crate::error::{VersioningError, VersioningResult};
use crate::model::entity::VersionEdge;
use crate::model::temporal::{edges_valid_at, is_sanctioned_overlap, resolve, ResolveMode};
use crate::model::version::{LibraryItemStatus, ObjectAction, Version};
use std::collections::BTreeSet;

/// Status and version of the edge a transition opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextEdge {
    pub status: LibraryItemStatus,
    pub version: Version,
}

/// Storage-independent description of one lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    pub action: ObjectAction,
    /// Edge whose snapshot the transition starts from. `None` for `Create`.
    pub base: Option<VersionEdge>,
    /// Edge ids closed at the transition instant.
    pub close: Vec<i64>,
    /// Edge to open. `None` for `Delete`.
    pub next: Option<NextEdge>,
    /// Whether the caller may supply new content.
    pub accepts_content: bool,
}

/// Current edge of a root: the open Draft if any, else the open Final or Retired.
pub fn current_edge(edges: &[VersionEdge]) -> Option<&VersionEdge> {
    resolve(edges, ResolveMode::Latest).map(|resolution| resolution.edge)
}

/// True once any edge reached Final (Retired implies an earlier Final).
pub fn ever_released(edges: &[VersionEdge]) -> bool {
    edges
        .iter()
        .any(|edge| edge.status != LibraryItemStatus::Draft)
}

pub fn possible_actions(edges: &[VersionEdge]) -> BTreeSet<ObjectAction> {
    let Some(current) = current_edge(edges) else {
        return BTreeSet::new();
    };

    match current.status {
        LibraryItemStatus::Draft if current.version.major == 0 => BTreeSet::from([
            ObjectAction::Approve,
            ObjectAction::Edit,
            ObjectAction::Delete,
        ]),
        LibraryItemStatus::Draft => BTreeSet::from([ObjectAction::Approve, ObjectAction::Edit]),
        LibraryItemStatus::Final => {
            BTreeSet::from([ObjectAction::NewVersion, ObjectAction::Inactivate])
        }
        LibraryItemStatus::Retired => BTreeSet::from([ObjectAction::Reactivate]),
    }
}

/// Validates `action` against the ledger and describes its effect.
pub fn plan_transition(
    uid: &str,
    edges: &[VersionEdge],
    action: ObjectAction,
) -> VersioningResult<TransitionPlan> {
    let current = current_edge(edges);
    let invalid = || VersioningError::InvalidTransition {
        uid: uid.to_string(),
        status: current.map(|edge| edge.status),
        action,
    };

    if action == ObjectAction::Create {
        if !edges.is_empty() {
            return Err(invalid());
        }
        return Ok(TransitionPlan {
            action,
            base: None,
            close: Vec::new(),
            next: Some(NextEdge {
                status: LibraryItemStatus::Draft,
                version: Version::INITIAL_DRAFT,
            }),
            accepts_content: true,
        });
    }

    if action == ObjectAction::Delete && ever_released(edges) {
        return Err(VersioningError::BusinessRule(format!(
            "{uid} cannot be deleted because it has been approved; inactivate it instead"
        )));
    }

    let current = current.ok_or_else(invalid)?;
    if !possible_actions(edges).contains(&action) {
        return Err(invalid());
    }

    let base = Some(current.clone());
    let plan = match action {
        ObjectAction::Edit => TransitionPlan {
            action,
            base,
            close: vec![current.edge_id],
            next: Some(NextEdge {
                status: LibraryItemStatus::Draft,
                version: current.version.next_minor(),
            }),
            accepts_content: true,
        },
        ObjectAction::Approve => {
            let mut close = vec![current.edge_id];
            close.extend(
                edges
                    .iter()
                    .filter(|edge| edge.is_open() && edge.status == LibraryItemStatus::Final)
                    .map(|edge| edge.edge_id),
            );
            TransitionPlan {
                action,
                base,
                close,
                next: Some(NextEdge {
                    status: LibraryItemStatus::Final,
                    version: current.version.next_major(),
                }),
                accepts_content: false,
            }
        }
        ObjectAction::NewVersion => TransitionPlan {
            action,
            base,
            close: Vec::new(),
            next: Some(NextEdge {
                status: LibraryItemStatus::Draft,
                version: current.version.next_minor(),
            }),
            accepts_content: true,
        },
        ObjectAction::Inactivate => TransitionPlan {
            action,
            base,
            close: vec![current.edge_id],
            next: Some(NextEdge {
                status: LibraryItemStatus::Retired,
                version: current.version,
            }),
            accepts_content: false,
        },
        ObjectAction::Reactivate => TransitionPlan {
            action,
            base,
            close: vec![current.edge_id],
            next: Some(NextEdge {
                status: LibraryItemStatus::Final,
                version: current.version,
            }),
            accepts_content: false,
        },
        ObjectAction::Delete => TransitionPlan {
            action,
            base,
            close: edges.iter().map(|edge| edge.edge_id).collect(),
            next: None,
            accepts_content: false,
        },
        ObjectAction::Create => return Err(invalid()),
    };

    Ok(plan)
}

/// Start instant for a new edge: `now`, pushed past the newest existing start.
pub fn next_start_date(edges: &[VersionEdge], now: i64) -> i64 {
    edges
        .iter()
        .map(|edge| edge.start_date + 1)
        .fold(now, i64::max)
}

/// Checks ordering and tiling of one root's edges. Never repairs anything.
pub fn verify_ledger(uid: &str, edges: &[VersionEdge]) -> VersioningResult<()> {
    let violation = |reason: String| VersioningError::ConsistencyViolation {
        uid: uid.to_string(),
        reason,
    };

    let mut ordered: Vec<&VersionEdge> = edges.iter().collect();
    ordered.sort_by_key(|edge| (edge.start_date, edge.edge_id));

    for edge in &ordered {
        if let Some(end) = edge.end_date {
            if end <= edge.start_date {
                return Err(violation(format!(
                    "edge {} ({}) has an empty validity interval",
                    edge.edge_id, edge.version
                )));
            }
        }
    }

    for pair in ordered.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        if next.start_date == prev.start_date {
            return Err(violation(format!(
                "edges {} and {} start at the same instant",
                prev.edge_id, next.edge_id
            )));
        }
        let status_flip = matches!(
            (prev.status, next.status),
            (LibraryItemStatus::Final, LibraryItemStatus::Retired)
                | (LibraryItemStatus::Retired, LibraryItemStatus::Final)
        );
        let increasing = next.version > prev.version || (next.version == prev.version && status_flip);
        if !increasing {
            return Err(violation(format!(
                "version {} follows {} without increasing",
                next.version, prev.version
            )));
        }
    }

    let mut breakpoints: BTreeSet<i64> = BTreeSet::new();
    for edge in &ordered {
        breakpoints.insert(edge.start_date);
        if let Some(end) = edge.end_date {
            breakpoints.insert(end);
        }
    }

    for at in breakpoints {
        let valid = edges_valid_at(edges, at);
        match valid.len() {
            0 => return Err(violation(format!("no edge is valid at {at}"))),
            1 => {}
            2 if is_sanctioned_overlap(&valid) => {}
            count => {
                return Err(violation(format!(
                    "{count} edges overlap at {at} outside the Final/Draft pair"
                )))
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(
        edge_id: i64,
        status: LibraryItemStatus,
        version: (u32, u32),
        start: i64,
        end: Option<i64>,
    ) -> VersionEdge {
        VersionEdge {
            edge_id,
            root_uid: "CTTerm_000001".to_string(),
            snapshot_id: format!("snap-{edge_id}"),
            status,
            version: Version::new(version.0, version.1),
            start_date: start,
            end_date: end,
            author_id: "alice".to_string(),
            change_description: String::new(),
        }
    }

    #[test]
    fn pure_draft_allows_delete() {
        let edges = vec![edge(1, LibraryItemStatus::Draft, (0, 1), 10, None)];
        assert_eq!(
            possible_actions(&edges),
            BTreeSet::from([
                ObjectAction::Approve,
                ObjectAction::Edit,
                ObjectAction::Delete
            ])
        );
        let plan = plan_transition("CTTerm_000001", &edges, ObjectAction::Delete).unwrap();
        assert_eq!(plan.next, None);
        assert_eq!(plan.close, vec![1]);
    }

    #[test]
    fn approve_closes_draft_and_open_final() {
        let edges = vec![
            edge(1, LibraryItemStatus::Draft, (0, 1), 10, Some(20)),
            edge(2, LibraryItemStatus::Final, (1, 0), 20, None),
            edge(3, LibraryItemStatus::Draft, (1, 1), 30, None),
        ];
        let plan = plan_transition("CTTerm_000001", &edges, ObjectAction::Approve).unwrap();
        assert_eq!(plan.close, vec![3, 2]);
        assert_eq!(
            plan.next,
            Some(NextEdge {
                status: LibraryItemStatus::Final,
                version: Version::new(2, 0),
            })
        );
        assert_eq!(plan.base.unwrap().edge_id, 3);
    }

    #[test]
    fn approve_on_final_is_invalid_transition() {
        let edges = vec![
            edge(1, LibraryItemStatus::Draft, (0, 1), 10, Some(20)),
            edge(2, LibraryItemStatus::Final, (1, 0), 20, None),
        ];
        let err = plan_transition("CTTerm_000001", &edges, ObjectAction::Approve).unwrap_err();
        assert!(matches!(
            err,
            VersioningError::InvalidTransition {
                status: Some(LibraryItemStatus::Final),
                action: ObjectAction::Approve,
                ..
            }
        ));
    }

    #[test]
    fn delete_after_release_is_business_rule() {
        let edges = vec![
            edge(1, LibraryItemStatus::Draft, (0, 1), 10, Some(20)),
            edge(2, LibraryItemStatus::Final, (1, 0), 20, Some(30)),
            edge(3, LibraryItemStatus::Retired, (1, 0), 30, None),
        ];
        let err = plan_transition("CTTerm_000001", &edges, ObjectAction::Delete).unwrap_err();
        assert!(matches!(err, VersioningError::BusinessRule(_)));
    }

    #[test]
    fn retire_is_rejected_while_draft_is_open() {
        let edges = vec![
            edge(1, LibraryItemStatus::Final, (1, 0), 20, None),
            edge(2, LibraryItemStatus::Draft, (1, 1), 30, None),
        ];
        let err = plan_transition("CTTerm_000001", &edges, ObjectAction::Inactivate).unwrap_err();
        assert!(matches!(err, VersioningError::InvalidTransition { .. }));
    }

    #[test]
    fn next_start_is_strictly_after_latest_start() {
        let edges = vec![edge(1, LibraryItemStatus::Draft, (0, 1), 100, None)];
        assert_eq!(next_start_date(&edges, 50), 101);
        assert_eq!(next_start_date(&edges, 500), 500);
        assert_eq!(next_start_date(&[], 7), 7);
    }

    #[test]
    fn verify_accepts_new_version_overlap() {
        let edges = vec![
            edge(1, LibraryItemStatus::Draft, (0, 1), 10, Some(20)),
            edge(2, LibraryItemStatus::Final, (1, 0), 20, Some(50)),
            edge(3, LibraryItemStatus::Draft, (1, 1), 30, Some(40)),
            edge(4, LibraryItemStatus::Draft, (1, 2), 40, Some(50)),
            edge(5, LibraryItemStatus::Final, (2, 0), 50, Some(60)),
            edge(6, LibraryItemStatus::Retired, (2, 0), 60, None),
        ];
        verify_ledger("CTTerm_000001", &edges).unwrap();
    }

    #[test]
    fn verify_reports_gap_and_double_open() {
        let gap = vec![
            edge(1, LibraryItemStatus::Draft, (0, 1), 10, Some(20)),
            edge(2, LibraryItemStatus::Final, (1, 0), 25, None),
        ];
        assert!(matches!(
            verify_ledger("CTTerm_000001", &gap),
            Err(VersioningError::ConsistencyViolation { .. })
        ));

        let double_open = vec![
            edge(1, LibraryItemStatus::Final, (1, 0), 10, None),
            edge(2, LibraryItemStatus::Final, (2, 0), 20, None),
        ];
        assert!(verify_ledger("CTTerm_000001", &double_open).is_err());
    }
}
