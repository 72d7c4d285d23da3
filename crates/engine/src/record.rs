//! Persisted record types
//!
//! A record is the plain-data form of a user or group. The resolution engine
//! never shares these with callers; it converts them into its own entity type
//! on load and back again on save.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sitegate_sdk::PermissionDefault;

/// Everything an entity holds for one scope (a site, or the common scope)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeRecord {
    /// Permission expressions, newest first
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
    /// Free-form options
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
    /// Parent group names (group memberships, for users)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    /// Marks the default group of this scope (groups only)
    #[serde(skip_serializing_if = "is_false")]
    pub default: bool,
}

impl ScopeRecord {
    /// Check if the scope carries no data at all
    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
            && self.options.is_empty()
            && self.parents.is_empty()
            && self.prefix.is_none()
            && self.suffix.is_none()
            && !self.default
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// A permission grant that stops applying at `expires_at` (Unix seconds)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedPermissionRecord {
    pub permission: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    pub expires_at: u64,
}

/// Persisted form of a user or group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityRecord {
    /// Display name; filled in from the document key
    #[serde(skip)]
    pub name: String,
    /// Scope-independent data
    pub common: ScopeRecord,
    /// Site-specific data keyed by site name
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub sites: BTreeMap<String, ScopeRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub timed: Vec<TimedPermissionRecord>,
}

impl EntityRecord {
    /// Create an empty record
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Borrow the data for a scope (`None` = common)
    pub fn scope(&self, site: Option<&str>) -> Option<&ScopeRecord> {
        match site {
            None => Some(&self.common),
            Some(site) => self.sites.get(site),
        }
    }

    /// Mutably borrow the data for a scope, creating it if needed
    pub fn scope_mut(&mut self, site: Option<&str>) -> &mut ScopeRecord {
        match site {
            None => &mut self.common,
            Some(site) => self.sites.entry(site.to_string()).or_default(),
        }
    }
}

/// Site-level data: which sites a site inherits from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteRecord {
    pub inheritance: Vec<String>,
}

/// A declared permission node and its default policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Dotted path, e.g. `site.modify`
    pub path: String,
    #[serde(default, with = "display_fromstr")]
    pub default: PermissionDefault,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl NodeRecord {
    pub fn new(path: impl Into<String>, default: PermissionDefault) -> Self {
        Self {
            path: path.into(),
            default,
            description: None,
        }
    }
}

/// Serialize through `Display`/`FromStr` so the sdk stays dependency free
mod display_fromstr {
    use std::fmt::Display;
    use std::str::FromStr;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Display,
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}
