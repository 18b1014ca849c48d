//! Error types for tier-core

use std::path::PathBuf;

use crate::layer::TypeHint;
use crate::path::SectionPath;

/// Result type for tier-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error raised by user items, factories and collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur in tier-core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Resolution attempted before the registry was built
    #[error("Registry is not loaded")]
    NotLoaded,

    /// The first segment does not name any top-level namespace
    #[error("Unknown root namespace '{root}'")]
    UnknownRoot { root: String },

    /// A known prefix exists but the next segment does not
    #[error("Name not found: {known} has no child '{missing}' (resolving {path})")]
    NameNotFound {
        path: SectionPath,
        known: SectionPath,
        missing: String,
    },

    /// A leaf operation was applied to a section
    #[error("{path} is a section, not a leaf")]
    NotALeaf { path: SectionPath },

    /// A child was inserted below a leaf
    #[error("{path} is a leaf and cannot hold children")]
    NotASection { path: SectionPath },

    /// A section gained mixed leaf/section children after its result shape
    /// was fixed in the current load cycle
    #[error("Section {path} mixes leaf and section children since it was last materialized; reload required")]
    StaleSection { path: SectionPath },

    /// Forced dependents reachable from an update form a cycle
    #[error(
        "Cannot resolve configuration dependencies of {target}: cycle through [{}]",
        display_paths(.participants)
    )]
    DependencyCycle {
        target: SectionPath,
        participants: Vec<SectionPath>,
    },

    /// Propagation stopped converging
    #[error(
        "Cannot resolve configuration dependencies of {target}: propagation stalled on [{}]",
        display_paths(.pending)
    )]
    PropagationStalled {
        target: SectionPath,
        pending: Vec<SectionPath>,
    },

    /// The item is already running or being materialized further up the stack
    #[error("{path} is already running or being materialized")]
    ReentrantRun { path: SectionPath },

    /// An update value contradicts the key's type hint
    #[error("Type mismatch for {path}:{key}: expected {expected}, found {found}")]
    TypeMismatch {
        path: SectionPath,
        key: String,
        expected: TypeHint,
        found: String,
    },

    /// A path string or segment is malformed
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// The item loader cannot find a definition for a declared name
    #[error("No item definition found for {path}")]
    ItemNotFound { path: SectionPath },

    /// The item loader found a definition but could not use it
    #[error("Item definition for {path} is malformed: {reason}")]
    ItemMalformed { path: SectionPath, reason: String },

    /// A field reference names a key the referenced item does not have
    #[error("{path} has no configuration key '{key}'")]
    MissingKey { path: SectionPath, key: String },

    /// The config store failed to load or save
    #[error("Config store error for {path}: {reason}")]
    Store { path: SectionPath, reason: String },

    /// Engine options file could not be read
    #[error("Options file not found at {path}")]
    OptionsNotFound { path: PathBuf },

    /// Construction or execution failure raised by an item
    #[error(transparent)]
    Item(BoxError),

    /// JSON serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// TOML deserialization error
    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    /// Standard I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap an item's own failure so it propagates verbatim.
    pub fn item(err: impl Into<BoxError>) -> Self {
        Self::Item(err.into())
    }

    /// Build a store error from anything displayable.
    pub fn store(path: &SectionPath, reason: impl std::fmt::Display) -> Self {
        Self::Store {
            path: path.clone(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error came from dependency propagation failing to converge.
    pub fn is_unresolvable(&self) -> bool {
        matches!(
            self,
            Self::DependencyCycle { .. } | Self::PropagationStalled { .. }
        )
    }

    /// Whether this error means a name could not be found.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::UnknownRoot { .. } | Self::NameNotFound { .. } | Self::ItemNotFound { .. }
        )
    }
}

fn display_paths(paths: &[SectionPath]) -> String {
    paths
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
