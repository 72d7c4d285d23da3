//! sitegate Engine - Permission Storage
//!
//! This crate handles:
//! - The serde record types an authorization dataset is made of
//! - The [`PermissionBackend`] contract the resolution engine loads from and saves to
//! - Two bundled backends: [`MemoryBackend`] and [`FileBackend`]
//!
//! # Architecture
//!
//! Every bundled backend keeps a [`PermissionsDocument`] in memory. The memory
//! backend stops there; the file backend mirrors the document to a TOML or
//! JSON file after each write and re-reads it on [`PermissionBackend::reload`].
//!
//! # Thread Safety
//!
//! Backends are shared between request threads, so every method takes `&self`
//! and implementations guard their own state.

pub mod backend;
pub mod document;
pub mod error;
pub mod file;
pub mod memory;
pub mod record;

pub use backend::PermissionBackend;
pub use document::PermissionsDocument;
pub use error::{BackendError, BackendResult};
pub use file::{FileBackend, FileFormat};
pub use memory::MemoryBackend;
pub use record::{EntityRecord, NodeRecord, ScopeRecord, SiteRecord, TimedPermissionRecord};
