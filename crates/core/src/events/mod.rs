//! Permission change events
//!
//! Every manager owns an [`EventBus`]. Consumers either register a callback
//! or take a channel receiver.
//!
//! # Example
//!
//! ```ignore
//! use sitegate_core::events::PermissionEvent;
//!
//! let key = manager.events().on_event(|event| {
//!     if let PermissionEvent::EntityChanged { id, .. } = event {
//!         tracing::info!("Permissions of {} changed", id);
//!     }
//! });
//!
//! // Or from another thread:
//! let receiver = manager.events().subscribe();
//! std::thread::spawn(move || {
//!     for event in receiver {
//!         sessions.invalidate(&event);
//!     }
//! });
//! ```

mod bus;
mod types;

pub use bus::{EventBus, EventCallback, ListenerKey};
pub use types::{EntityAction, PermissionEvent};
