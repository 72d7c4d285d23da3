//! sitegate Core - Permission Resolution
//!
//! This crate contains the permission engine: entity and group handles, the
//! inheritance resolver, the matcher, and the [`PermissionManager`] that ties
//! them to a storage backend.
//!
//! # Re-exports
//!
//! This crate re-exports the SDK and engine crates for convenience:
//! - [`sdk`] - Entity kinds, node defaults and reserved names
//! - [`engine`] - Record types, the backend contract and bundled backends

pub use sitegate_engine as engine;
pub use sitegate_sdk as sdk;

pub mod backends;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod permissions;

pub use backends::{BackendFactory, BackendRegistry};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ConfigResult, FileSettings, PermissionsConfig};
pub use error::{PermissionError, PermissionResult};
pub use events::{EntityAction, EventBus, ListenerKey, PermissionEvent};

// Re-export permission types
pub use permissions::{
    // Handles
    EntityRef, PermissibleEntity, PermissibleGroup, PermissibleUser, PermissionManager,
    // Matching
    Decision, PermissionExpression, PermissionMatcher, RegexMatcher,
    // Node tree
    PermissionNode, PermissionTree,
};
