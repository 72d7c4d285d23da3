//! sitegate SDK - Shared Permission Vocabulary
//!
//! This crate contains the small set of types and names every other sitegate
//! crate agrees on. It has no dependencies and compiles quickly, allowing
//! parallel compilation of dependent crates.
//!
//! # Modules
//!
//! - [`kinds`] - Entity kinds and node default policies
//! - [`names`] - Reserved expression prefixes and well-known option names

pub mod kinds;
pub mod names;

pub use kinds::*;
pub use names::WELL_KNOWN_OPTIONS;
