//! Change event types

use sitegate_sdk::EntityKind;

/// What changed on an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityAction {
    Permissions,
    Options,
    Inheritance,
    /// Prefix or suffix
    Info,
    Weight,
    Rank,
    TimedPermission,
    DefaultGroup,
    Saved,
    Removed,
}

/// Notification fired after the permission dataset changes
///
/// Consumers holding derived state (sessions, rendered menus) use these to
/// invalidate it. Events are delivered after the change is applied and the
/// engine's own caches are already invalidated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionEvent {
    EntityChanged {
        id: String,
        kind: EntityKind,
        action: EntityAction,
    },
    DefaultGroupChanged {
        site: Option<String>,
    },
    SiteInheritanceChanged {
        site: String,
    },
    DebugModeToggled(bool),
    BackendChanged(String),
    Reloaded,
}
