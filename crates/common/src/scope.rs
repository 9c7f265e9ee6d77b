//! Scope catalog and set arithmetic.
//!
//! A scope is a short `resource:action` string (for example `project:read`).
//! Credentials carry a [`ScopeSet`]; routes declare the scopes they require and
//! the authorizer checks `granted.is_superset_of(required)`.
//!
//! # Wire format
//!
//! OAuth2 introspection responses carry scopes as a single space-delimited
//! string (`"org:read project:read"`). [`ScopeSet::from_space_delimited`]
//! parses that form; the serde representation of a `ScopeSet` is a JSON array
//! so that cached rows round-trip without reparsing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// =============================================================================
// Catalog
// =============================================================================

pub const ORG_READ: &str = "org:read";
pub const ORG_WRITE: &str = "org:write";
pub const PROJECT_READ: &str = "project:read";
pub const PROJECT_WRITE: &str = "project:write";
pub const DISCOVERY_READ: &str = "discovery:read";
pub const DISCOVERY_WRITE: &str = "discovery:write";
pub const TEMPLATES_READ: &str = "templates:read";
pub const TEMPLATES_WRITE: &str = "templates:write";
pub const INTEGRATIONS_READ: &str = "integrations:read";
pub const INTEGRATIONS_WRITE: &str = "integrations:write";
pub const EMAIL_WRITE: &str = "email:write";
pub const SUPERADMIN_READ: &str = "superadmin:read";

/// Every scope known to the system.
///
/// Principals that are trusted without a scope claim (standalone service key,
/// development tokens, userinfo fallback) receive this full list.
pub const ALL_SCOPES: &[&str] = &[
    ORG_READ,
    ORG_WRITE,
    PROJECT_READ,
    PROJECT_WRITE,
    DISCOVERY_READ,
    DISCOVERY_WRITE,
    TEMPLATES_READ,
    TEMPLATES_WRITE,
    INTEGRATIONS_READ,
    INTEGRATIONS_WRITE,
    EMAIL_WRITE,
    SUPERADMIN_READ,
];

/// Scopes that only read data.
pub const READ_ONLY_SCOPES: &[&str] = &[
    ORG_READ,
    PROJECT_READ,
    DISCOVERY_READ,
    TEMPLATES_READ,
    INTEGRATIONS_READ,
];

// =============================================================================
// ScopeSet
// =============================================================================

/// An ordered, duplicate-free set of scope strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// The full catalog ([`ALL_SCOPES`]).
    #[must_use]
    pub fn all() -> Self {
        ALL_SCOPES.iter().copied().collect()
    }

    /// The read-only subset of the catalog.
    #[must_use]
    pub fn read_only() -> Self {
        READ_ONLY_SCOPES.iter().copied().collect()
    }

    /// Parse an OAuth2 `scope` claim (space-delimited, any amount of whitespace).
    #[must_use]
    pub fn from_space_delimited(raw: &str) -> Self {
        raw.split_whitespace().collect()
    }

    #[must_use]
    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// True when every scope in `required` is present in `self`.
    ///
    /// The empty set is a subset of every set, so a route with no required
    /// scopes admits any authenticated caller.
    #[must_use]
    pub fn is_superset_of(&self, required: &ScopeSet) -> bool {
        self.0.is_superset(&required.0)
    }

    /// Scopes in `required` that `self` lacks, in sorted order.
    #[must_use]
    pub fn missing(&self, required: &ScopeSet) -> Vec<String> {
        required.0.difference(&self.0).cloned().collect()
    }

    /// Space-delimited form, the inverse of [`ScopeSet::from_space_delimited`].
    #[must_use]
    pub fn to_space_delimited(&self) -> String {
        self.iter().collect::<Vec<_>>().join(" ")
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_space_delimited())
    }
}

impl<S: Into<String>> FromIterator<S> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<'a> IntoIterator for &'a ScopeSet {
    type Item = &'a String;
    type IntoIter = std::collections::btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
