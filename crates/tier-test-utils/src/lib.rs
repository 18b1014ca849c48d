//! Shared test utilities for the Tier workspace.
//!
//! This crate provides standardised test fixtures to eliminate duplication
//! across crate test suites. It is a dev-dependency only and is never published.
//!
//! # Modules
//!
//! - [`items`]: items that record what the engine did to them
//! - [`fixtures`]: common registries and a static item loader

pub mod fixtures;
pub mod items;

pub use fixtures::{StaticLoader, layered_registry};
pub use items::{Recorder, RecorderLog, constant, echo, failing, to_json};

use tier_core::SectionPath;

/// Parse a dotted path, panicking on malformed input.
pub fn p(path: &str) -> SectionPath {
    SectionPath::parse(path).unwrap_or_else(|err| panic!("bad test path '{path}': {err}"))
}
