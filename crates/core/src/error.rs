//! Error types for the permission engine

use sitegate_engine::BackendError;

use crate::config::ConfigError;

/// Errors surfaced by permission administration and resolution
///
/// Most variants describe an inconsistent authorization dataset. They are
/// returned rather than papered over so a broken configuration never fails
/// open or closed silently. [`crate::PermissionManager::has`] is the one
/// entry point that never returns them: it logs and denies instead.
#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    /// A group was referenced that neither the cache nor the backend knows
    #[error("Group '{0}' does not exist")]
    UnknownGroup(String),

    /// A user was referenced that neither the cache nor the backend knows
    #[error("Entity '{0}' does not exist")]
    UnknownEntity(String),

    /// Tried to create a user or group that already exists
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// No default group is configured for the requested scope or the common scope
    #[error("No default group defined")]
    NoDefaultGroup,

    /// Assigning the parent would make a group inherit from itself
    #[error("Group '{group}' cannot inherit from '{parent}': '{parent}' already inherits from it")]
    CyclicInheritance { group: String, parent: String },

    /// A site was told to inherit from itself
    #[error("Site '{0}' cannot inherit from itself")]
    SelfInheritingSite(String),

    /// No backend is registered under the requested alias
    #[error("Unknown permission backend: {0}")]
    UnknownBackend(String),

    /// Promotion or demotion was refused
    #[error("Ranking error for '{target}': {message}")]
    Ranking {
        message: String,
        target: String,
        promoter: Option<String>,
    },

    /// The backend failed to load or save
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// The engine configuration could not be loaded
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for permission operations
pub type PermissionResult<T> = Result<T, PermissionError>;
