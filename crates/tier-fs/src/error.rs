//! Error types for tier-fs

use std::path::PathBuf;

use tier_core::SectionPath;

/// Result type for tier-fs operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tier-fs operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML config at {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("Invalid reference under '{key}' in {path}: {reason}")]
    InvalidReference {
        path: PathBuf,
        key: String,
        reason: String,
    },

    #[error("Value of '{key}' in {path} is not a finite number")]
    NonFinite { path: PathBuf, key: String },

    #[error("Value of '{key}' cannot be written as TOML: {reason}")]
    Unrepresentable { key: String, reason: String },

    #[error("Lock acquisition failed for {path}")]
    LockFailed { path: PathBuf },

    #[error("The root path has no config file")]
    RootPath,
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Report this failure to the engine as a store error for `path`.
    pub fn into_store_error(self, path: &SectionPath) -> tier_core::Error {
        tier_core::Error::store(path, self)
    }
}
