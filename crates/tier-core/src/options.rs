//! Engine options
//!
//! Options are plain TOML; every key is optional.
//!
//! ```toml
//! batch_mode = "stop-on-error"
//! max_propagation_rounds = 16
//! keep_updates_on_reload = true
//! validate_types = false
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::BatchMode;
use crate::error::{Error, Result};

fn default_max_rounds() -> usize {
    64
}

fn default_true() -> bool {
    true
}

/// Behaviour switches for an [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOptions {
    /// What a batch update does after a failed entry.
    #[serde(default)]
    pub batch_mode: BatchMode,

    /// Upper bound on propagation rounds for one change.
    #[serde(default = "default_max_rounds")]
    pub max_propagation_rounds: usize,

    /// Keep persisted updates across `Engine::reload`.
    #[serde(default = "default_true")]
    pub keep_updates_on_reload: bool,

    /// Check updates against type hints.
    #[serde(default = "default_true")]
    pub validate_types: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            batch_mode: BatchMode::default(),
            max_propagation_rounds: default_max_rounds(),
            keep_updates_on_reload: true,
            validate_types: true,
        }
    }
}

impl EngineOptions {
    /// Parse options from TOML content
    ///
    /// # Example
    ///
    /// ```
    /// use tier_core::{BatchMode, EngineOptions};
    ///
    /// let options = EngineOptions::from_toml(r#"batch_mode = "stop-on-error""#).unwrap();
    /// assert_eq!(options.batch_mode, BatchMode::StopOnError);
    /// assert_eq!(options.max_propagation_rounds, 64);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load options from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `Error::OptionsNotFound` if the file does not exist, or a
    /// parse error if it is not valid TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::OptionsNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        let options = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), ?options, "loaded engine options");
        Ok(options)
    }
}
