//! Content equality strategies per entity kind.
//!
//! # Responsibility
//! - Decide whether desired content differs from a base snapshot.
//! - Let domain services tune comparison rules without touching the engine.
//!
//! # Invariants
//! - Scalar fields compare by value; a missing field differs from any present one.
//! - Reference categories compare as sets, each category on its own.

use crate::model::snapshot::{EntityKind, SnapshotContent};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Names of fields and reference categories that differ between two contents.
pub fn changed_attributes(base: &SnapshotContent, desired: &SnapshotContent) -> BTreeSet<String> {
    let mut changed = BTreeSet::new();

    let field_names: BTreeSet<&String> = base.fields.keys().chain(desired.fields.keys()).collect();
    for name in field_names {
        if base.fields.get(name) != desired.fields.get(name) {
            changed.insert(name.clone());
        }
    }

    let categories: BTreeSet<&String> = base
        .references
        .keys()
        .chain(desired.references.keys())
        .collect();
    for category in categories {
        let before = base.references.get(category).filter(|set| !set.is_empty());
        let after = desired.references.get(category).filter(|set| !set.is_empty());
        if before != after {
            changed.insert(category.clone());
        }
    }

    changed
}

/// Comparison rules a domain service supplies for one entity kind.
pub trait ContentEqualityStrategy: Send + Sync {
    /// Attributes considered changed from `base` to `desired`.
    fn changed_attributes(
        &self,
        base: &SnapshotContent,
        desired: &SnapshotContent,
    ) -> BTreeSet<String>;

    fn is_changed(&self, base: &SnapshotContent, desired: &SnapshotContent) -> bool {
        !self.changed_attributes(base, desired).is_empty()
    }

    /// Whether roots of a read-only library may still be mutated.
    fn edit_allowed_in_non_editable_library(&self) -> bool {
        false
    }
}

/// Default strategy: every field and category counts unless ignored.
#[derive(Debug, Clone, Default)]
pub struct FieldwiseEquality {
    ignored: BTreeSet<String>,
    allow_non_editable_library: bool,
}

impl FieldwiseEquality {
    pub fn new() -> Self {
        Self::default()
    }

    /// Excludes a field or reference category from comparison.
    pub fn ignoring(mut self, name: impl Into<String>) -> Self {
        self.ignored.insert(name.into());
        self
    }

    pub fn allowing_non_editable_library(mut self) -> Self {
        self.allow_non_editable_library = true;
        self
    }
}

impl ContentEqualityStrategy for FieldwiseEquality {
    fn changed_attributes(
        &self,
        base: &SnapshotContent,
        desired: &SnapshotContent,
    ) -> BTreeSet<String> {
        let mut changed = changed_attributes(base, desired);
        changed.retain(|name| !self.ignored.contains(name));
        changed
    }

    fn edit_allowed_in_non_editable_library(&self) -> bool {
        self.allow_non_editable_library
    }
}

/// Strategy lookup by entity kind with a shared fallback.
#[derive(Clone)]
pub struct StrategyRegistry {
    fallback: Arc<dyn ContentEqualityStrategy>,
    by_kind: HashMap<EntityKind, Arc<dyn ContentEqualityStrategy>>,
}

impl StrategyRegistry {
    pub fn new(fallback: Arc<dyn ContentEqualityStrategy>) -> Self {
        Self {
            fallback,
            by_kind: HashMap::new(),
        }
    }

    pub fn register(mut self, kind: EntityKind, strategy: Arc<dyn ContentEqualityStrategy>) -> Self {
        self.by_kind.insert(kind, strategy);
        self
    }

    pub fn for_kind(&self, kind: EntityKind) -> &dyn ContentEqualityStrategy {
        self.by_kind
            .get(&kind)
            .map_or(self.fallback.as_ref(), |strategy| strategy.as_ref())
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new(Arc::new(FieldwiseEquality::new()))
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&EntityKind> = self.by_kind.keys().collect();
        kinds.sort();
        f.debug_struct("StrategyRegistry")
            .field("registered_kinds", &kinds)
            .finish()
    }
}
