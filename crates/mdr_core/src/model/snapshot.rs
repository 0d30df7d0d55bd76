//! Snapshot content model.
//!
//! # Responsibility
//! - Define the typed, immutable content payload stored behind version edges.
//! - Derive content addresses used for snapshot deduplication.
//!
//! # Invariants
//! - Scalar fields and reference sets are kept in ordered maps/sets, so the
//!   canonical encoding of equal content is byte-identical.
//! - A snapshot id is the sha256 of the canonical encoding plus reference pins.
//! - Reference categories are compared independently; order inside a
//!   category never matters.
//! - Float fields are finite. JSON has no encoding for NaN or infinity, so
//!   such a value could be written but never read back.

use crate::error::{VersioningError, VersioningResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

/// Stable identity of a versioned entity root.
pub type RootUid = String;

/// Content address of one snapshot (lowercase sha256 hex).
pub type SnapshotId = String;

/// Entity kinds handled by the versioning engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    CtCodelist,
    CtTerm,
    Activity,
    ActivityGroup,
    ActivitySubGroup,
    ActivityInstance,
    StudyEpoch,
    StudyVisit,
    StudySoaFootnote,
}

impl EntityKind {
    pub const ALL: [EntityKind; 9] = [
        Self::CtCodelist,
        Self::CtTerm,
        Self::Activity,
        Self::ActivityGroup,
        Self::ActivitySubGroup,
        Self::ActivityInstance,
        Self::StudyEpoch,
        Self::StudyVisit,
        Self::StudySoaFootnote,
    ];

    /// Prefix used for generated root uids, e.g. `CTTerm_000001`.
    pub fn uid_prefix(self) -> &'static str {
        match self {
            Self::CtCodelist => "CTCodelist",
            Self::CtTerm => "CTTerm",
            Self::Activity => "Activity",
            Self::ActivityGroup => "ActivityGroup",
            Self::ActivitySubGroup => "ActivitySubGroup",
            Self::ActivityInstance => "ActivityInstance",
            Self::StudyEpoch => "StudyEpoch",
            Self::StudyVisit => "StudyVisit",
            Self::StudySoaFootnote => "StudySoAFootnote",
        }
    }

    pub fn as_db_str(self) -> &'static str {
        match self {
            Self::CtCodelist => "ct_codelist",
            Self::CtTerm => "ct_term",
            Self::Activity => "activity",
            Self::ActivityGroup => "activity_group",
            Self::ActivitySubGroup => "activity_sub_group",
            Self::ActivityInstance => "activity_instance",
            Self::StudyEpoch => "study_epoch",
            Self::StudyVisit => "study_visit",
            Self::StudySoaFootnote => "study_soa_footnote",
        }
    }

    pub fn from_db_str(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_db_str() == value)
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// One scalar attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// Immutable bag of domain attributes plus references to other roots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotContent {
    pub kind: EntityKind,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
    #[serde(default)]
    pub references: BTreeMap<String, BTreeSet<RootUid>>,
}

impl SnapshotContent {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            fields: BTreeMap::new(),
            references: BTreeMap::new(),
        }
    }

    /// Builder-style scalar setter.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Builder-style reference setter. Adds `uid` to `category`.
    pub fn with_reference(mut self, category: impl Into<String>, uid: impl Into<RootUid>) -> Self {
        self.references
            .entry(category.into())
            .or_default()
            .insert(uid.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// All referenced uids across every category, deduplicated.
    pub fn referenced_uids(&self) -> BTreeSet<&RootUid> {
        self.references.values().flatten().collect()
    }

    /// Names of every field and reference category carried by this content.
    pub fn attribute_names(&self) -> BTreeSet<String> {
        self.fields
            .keys()
            .chain(self.references.keys())
            .cloned()
            .collect()
    }

    /// Rejects content that cannot survive a round trip through storage.
    ///
    /// # Errors
    /// - `InvalidData` naming the first non-finite float field.
    pub fn validate(&self) -> VersioningResult<()> {
        for (name, value) in &self.fields {
            if let FieldValue::Float(number) = value {
                if !number.is_finite() {
                    return Err(VersioningError::InvalidData(format!(
                        "field `{name}` of {} holds non-finite float {number}",
                        self.kind
                    )));
                }
            }
        }
        Ok(())
    }

    /// Deterministic JSON encoding used for persistence and addressing.
    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Which snapshot of a referenced root was current when a snapshot was made.
pub type ReferencePins = BTreeMap<RootUid, Option<SnapshotId>>;

#[derive(Serialize)]
struct AddressInput<'a> {
    content: &'a SnapshotContent,
    pins: &'a ReferencePins,
}

/// Computes the content address for `content` pinned to `pins`.
pub fn content_address(
    content: &SnapshotContent,
    pins: &ReferencePins,
) -> Result<SnapshotId, serde_json::Error> {
    let encoded = serde_json::to_string(&AddressInput { content, pins })?;
    Ok(sha256::digest(encoded))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activity() -> SnapshotContent {
        SnapshotContent::new(EntityKind::Activity)
            .with_field("name", "Blood pressure")
            .with_field("is_data_collected", true)
            .with_reference("groupings", "ActivitySubGroup_000002")
            .with_reference("groupings", "ActivitySubGroup_000001")
    }

    #[test]
    fn reference_insertion_order_does_not_change_address() {
        let a = activity();
        let b = SnapshotContent::new(EntityKind::Activity)
            .with_reference("groupings", "ActivitySubGroup_000001")
            .with_reference("groupings", "ActivitySubGroup_000002")
            .with_field("is_data_collected", true)
            .with_field("name", "Blood pressure");

        let pins = ReferencePins::new();
        assert_eq!(
            content_address(&a, &pins).unwrap(),
            content_address(&b, &pins).unwrap()
        );
    }

    #[test]
    fn pins_participate_in_address() {
        let content = activity();
        let mut pins = ReferencePins::new();
        let unpinned = content_address(&content, &pins).unwrap();
        pins.insert("ActivitySubGroup_000001".to_string(), Some("abc".to_string()));
        assert_ne!(unpinned, content_address(&content, &pins).unwrap());
    }

    #[test]
    fn canonical_json_roundtrips_typed_values() {
        let content = activity().with_field("order", 3_i64).with_field("note", FieldValue::Null);
        let json = content.canonical_json().unwrap();
        let decoded: SnapshotContent = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, content);
    }

    #[test]
    fn non_finite_floats_are_rejected() {
        for number in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let content = activity().with_field("window", number);
            assert!(matches!(
                content.validate(),
                Err(VersioningError::InvalidData(message)) if message.contains("window")
            ));
        }
        assert!(activity().with_field("window", 1.5).validate().is_ok());
    }

    #[test]
    fn kind_db_codes_roundtrip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_db_str(kind.as_db_str()), Some(kind));
        }
        assert_eq!(EntityKind::from_db_str("unknown"), None);
    }
}
