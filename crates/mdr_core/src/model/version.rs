//! Version numbers, lifecycle statuses and lifecycle actions.
//!
//! # Responsibility
//! - Define the `(major, minor)` version value and its text form (`"1.0"`).
//! - Define the `Draft | Final | Retired` lifecycle and the action vocabulary.
//!
//! # Invariants
//! - Versions order by `(major, minor)`.
//! - Text form is always `<major>.<minor>` with decimal digits only.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

static VERSION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(0|[1-9][0-9]*)\.(0|[1-9][0-9]*)$").expect("version pattern is valid")
});

/// Version number attached to every version edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    /// First version of every new entity.
    pub const INITIAL_DRAFT: Version = Version { major: 0, minor: 1 };

    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Draft edit: same major, minor + 1.
    pub fn next_minor(self) -> Self {
        Self::new(self.major, self.minor + 1)
    }

    /// Approval: major + 1, minor reset.
    pub fn next_major(self) -> Self {
        Self::new(self.major + 1, 0)
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Error for malformed version text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseVersionError(pub String);

impl Display for ParseVersionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid version `{}`; expected <major>.<minor>", self.0)
    }
}

impl Error for ParseVersionError {}

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let captures = VERSION_PATTERN
            .captures(trimmed)
            .ok_or_else(|| ParseVersionError(value.to_string()))?;
        let major = captures[1]
            .parse()
            .map_err(|_| ParseVersionError(value.to_string()))?;
        let minor = captures[2]
            .parse()
            .map_err(|_| ParseVersionError(value.to_string()))?;
        Ok(Self::new(major, minor))
    }
}

/// Lifecycle status of one version edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LibraryItemStatus {
    Draft,
    Final,
    Retired,
}

impl LibraryItemStatus {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::Final => "Final",
            Self::Retired => "Retired",
        }
    }

    pub fn from_db_str(value: &str) -> Option<Self> {
        match value {
            "Draft" => Some(Self::Draft),
            "Final" => Some(Self::Final),
            "Retired" => Some(Self::Retired),
            _ => None,
        }
    }
}

impl Display for LibraryItemStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// Actions that move an entity through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjectAction {
    Create,
    Edit,
    Approve,
    NewVersion,
    Inactivate,
    Reactivate,
    Delete,
}

impl ObjectAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Edit => "edit",
            Self::Approve => "approve",
            Self::NewVersion => "new_version",
            Self::Inactivate => "inactivate",
            Self::Reactivate => "reactivate",
            Self::Delete => "delete",
        }
    }

    /// Change description used when the caller does not supply one.
    pub fn default_change_description(self) -> &'static str {
        match self {
            Self::Create => "Initial version",
            Self::Edit => "Edited draft",
            Self::Approve => "Approved version",
            Self::NewVersion => "New draft version",
            Self::Inactivate => "Inactivated version",
            Self::Reactivate => "Reactivated version",
            Self::Delete => "Deleted draft",
        }
    }
}

impl Display for ObjectAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
