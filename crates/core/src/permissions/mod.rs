//! Multi-site, inheritance-based permission resolution
//!
//! Users and groups hold permission expressions, options and parent groups,
//! each either for one site or for the common scope. A query walks the
//! entity's own scopes first and then its parents, and the first expression
//! that matches decides.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────── PermissionManager ────────────────────────┐
//! │  config · matcher · clock · EventBus                               │
//! │                                                                    │
//! │  RwLock<Arc<Registry>> ──swap on reload──▶ Registry                │
//! │        │                                   ├─ users / groups       │
//! │        │ snapshot                          ├─ default / site memos │
//! │        ▼                                   ├─ resolved cache       │
//! │  ┌──────────┐  read   ┌──────────┐         └─ PermissionTree       │
//! │  │ Resolver │ ──────▶ │ Entities │                                 │
//! │  └──────────┘         └──────────┘                                 │
//! │        │ expressions                                               │
//! │        ▼                                                           │
//! │  PermissionMatcher ──▶ Decision ──▶ node default (NoOpinion)       │
//! └───────────────────────────────│────────────────────────────────────┘
//!                                 ▼ load / save
//!                        dyn PermissionBackend
//! ```
//!
//! # Expression Format
//!
//! - `site.view` - grants the node (and nothing below it)
//! - `site.*` - grants every node strictly below `site`
//! - `-site.delete` - denies the node
//! - `#site.manage` - applies to the holder only, not to inheriting entities
//! - anything containing regex syntax is matched as an anchored,
//!   case-insensitive regular expression
//!
//! # Usage
//!
//! ```ignore
//! let staff = manager.create_group("staff")?;
//! staff.add_permission("blog.*", Some("example.com"))?;
//!
//! let bob = manager.entity_or_create("bob")?;
//! bob.add_group("staff", None)?;
//! bob.add_timed_permission("blog.pin", None, 3600)?;
//!
//! assert!(manager.has("bob", "blog.post", Some("example.com")));
//! ```

mod entity;
mod group;
mod manager;
mod matcher;
mod node;
mod permissible;
mod registry;
mod resolve;
mod types;
mod user;

pub use entity::{normalize, PermissibleEntity};
pub use group::PermissibleGroup;
pub use manager::PermissionManager;
pub use matcher::{decide, resolve, PermissionMatcher, RegexMatcher};
pub use node::{PermissionNode, PermissionTree};
pub use permissible::EntityRef;
pub use types::{parse_bool, parse_double, parse_integer, Decision, PermissionExpression};
pub use user::PermissibleUser;
