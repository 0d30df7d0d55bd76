//! Pure diffing over an audit history.
//!
//! # Invariants
//! - Output is ordered oldest to newest regardless of input order.
//! - The oldest entry reports an empty change set.
//! - A `Delete` entry reports every attribute of the vanished state.

use crate::model::entity::{AuditAction, AuditKind, EntityState};
use crate::model::equality::changed_attributes;
use std::collections::BTreeSet;

/// Name reported when only the lifecycle status changed.
pub const STATUS_FIELD: &str = "status";

/// Changed attribute names for one audit entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditDiff {
    pub action_id: i64,
    pub kind: AuditKind,
    pub date: i64,
    pub changed_fields: BTreeSet<String>,
}

pub fn diff(history: &[AuditAction]) -> Vec<AuditDiff> {
    let mut ordered: Vec<&AuditAction> = history.iter().collect();
    ordered.sort_by_key(|action| (action.date, action.action_id));

    let mut previous: Option<&EntityState> = None;
    let mut diffs = Vec::with_capacity(ordered.len());
    for (index, action) in ordered.into_iter().enumerate() {
        let changed_fields = if index == 0 {
            BTreeSet::new()
        } else {
            let before = previous.or(action.before.as_ref());
            state_changes(before, action.after.as_ref())
        };

        diffs.push(AuditDiff {
            action_id: action.action_id,
            kind: action.kind,
            date: action.date,
            changed_fields,
        });
        previous = action.after.as_ref();
    }

    diffs
}

fn state_changes(before: Option<&EntityState>, after: Option<&EntityState>) -> BTreeSet<String> {
    match (before, after) {
        (Some(before), Some(after)) => {
            let mut changed = changed_attributes(&before.content, &after.content);
            if before.status != after.status {
                changed.insert(STATUS_FIELD.to_string());
            }
            changed
        }
        (Some(vanished), None) => vanished.content.attribute_names(),
        (None, Some(appeared)) => appeared.content.attribute_names(),
        (None, None) => BTreeSet::new(),
    }
}
