//! Common registries and collaborators.

use std::collections::HashMap;

use serde_json::json;
use tier_core::{Error, ItemLoader, Leaf, Result, Section, SectionPath, config};

/// `models` (`a = 1`) containing `vision` (`b = 2`) containing `encoder`.
///
/// The shape used to check layer ordering: a top-level layer, an
/// intermediate layer and a leaf.
pub fn layered_registry(encoder: Leaf) -> Section {
    Section::new().section(
        "models",
        Section::new()
            .with_config(config([("a", json!(1))]))
            .section(
                "vision",
                Section::new()
                    .with_config(config([("b", json!(2))]))
                    .leaf("encoder", encoder),
            ),
    )
}

/// Item loader answering from a fixed table.
#[derive(Default, Clone)]
pub struct StaticLoader {
    leaves: HashMap<SectionPath, Leaf>,
    malformed: HashMap<SectionPath, String>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `leaf` for `path`.
    pub fn with(mut self, path: SectionPath, leaf: Leaf) -> Self {
        self.leaves.insert(path, leaf);
        self
    }

    /// Report the definition at `path` as malformed.
    pub fn malformed(mut self, path: SectionPath, reason: &str) -> Self {
        self.malformed.insert(path, reason.to_string());
        self
    }
}

impl ItemLoader for StaticLoader {
    fn resolve(&self, path: &SectionPath) -> Result<Leaf> {
        if let Some(reason) = self.malformed.get(path) {
            return Err(Error::ItemMalformed {
                path: path.clone(),
                reason: reason.clone(),
            });
        }
        self.leaves
            .get(path)
            .cloned()
            .ok_or_else(|| Error::ItemNotFound { path: path.clone() })
    }
}
