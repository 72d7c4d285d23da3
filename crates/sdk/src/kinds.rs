//! Entity kinds and permission node default policies

use std::fmt;
use std::str::FromStr;

/// What kind of principal an entity record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    /// An identified principal (account, session owner)
    User,
    /// A named bundle of permissions other entities inherit from
    Group,
}

impl EntityKind {
    /// Lowercase name used in logs and persisted layouts
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Group => "group",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy applied when no held expression has an opinion on a permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PermissionDefault {
    /// Granted to everyone
    True,
    /// Denied to everyone
    #[default]
    False,
    /// Granted to operators only
    Op,
    /// Granted to everyone except operators
    NotOp,
}

impl PermissionDefault {
    /// Resolve the policy for a principal
    pub fn allows(&self, is_op: bool) -> bool {
        match self {
            PermissionDefault::True => true,
            PermissionDefault::False => false,
            PermissionDefault::Op => is_op,
            PermissionDefault::NotOp => !is_op,
        }
    }

    /// Canonical spelling used by `Display`
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionDefault::True => "true",
            PermissionDefault::False => "false",
            PermissionDefault::Op => "op",
            PermissionDefault::NotOp => "notop",
        }
    }
}

impl fmt::Display for PermissionDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a default policy string is not recognised
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDefault(pub String);

impl fmt::Display for UnknownDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown permission default: {}", self.0)
    }
}

impl std::error::Error for UnknownDefault {}

impl FromStr for PermissionDefault {
    type Err = UnknownDefault;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "always" => Ok(PermissionDefault::True),
            "false" | "no" | "never" => Ok(PermissionDefault::False),
            "op" | "isop" | "operator" => Ok(PermissionDefault::Op),
            "notop" | "not op" | "!op" | "not_op" => Ok(PermissionDefault::NotOp),
            other => Err(UnknownDefault(other.to_string())),
        }
    }
}
