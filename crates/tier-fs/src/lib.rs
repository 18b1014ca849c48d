//! File-backed configuration store for Tier
//!
//! [`TomlStore`] keeps one TOML file per registry path and implements
//! [`tier_core::ConfigStore`]. Saving edits the existing file in place with
//! `toml_edit`, so comments, formatting and keys written by hand survive.

pub mod convert;
pub mod error;
pub mod io;
pub mod store;

pub use error::{Error, Result};
pub use store::TomlStore;
