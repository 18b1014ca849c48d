//! Collaborator interfaces the engine consumes
//!
//! - [`ConfigStore`] supplies file-backed defaults for a path and persists a
//!   node's configuration.
//! - [`ItemLoader`] produces the leaf for a name that was only declared.
//!
//! [`MemoryStore`] is an in-process store, handy for tests and for sessions
//! that never touch disk. A file-backed implementation lives in `tier-fs`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::item::Leaf;
use crate::layer::{Config, Defaults};
use crate::path::SectionPath;

/// Source of file-backed defaults.
pub trait ConfigStore {
    /// Defaults and type hints for `path`. A path with nothing stored yields
    /// empty defaults rather than an error.
    fn load(&self, path: &SectionPath) -> Result<Defaults>;

    /// Persist `config` for `path`, keeping out-of-band edits. Saving an
    /// unchanged configuration must leave the stored form byte-identical.
    fn save(&self, path: &SectionPath, config: &Config) -> Result<()>;
}

/// Produces the leaf for a declared name.
pub trait ItemLoader {
    /// # Errors
    ///
    /// `Error::ItemNotFound` when nothing is defined under `path`,
    /// `Error::ItemMalformed` when a definition exists but is unusable.
    fn resolve(&self, path: &SectionPath) -> Result<Leaf>;
}

impl<F> ItemLoader for F
where
    F: Fn(&SectionPath) -> Result<Leaf>,
{
    fn resolve(&self, path: &SectionPath) -> Result<Leaf> {
        self(path)
    }
}

/// Loader for registries that declare nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLoader;

impl ItemLoader for NoLoader {
    fn resolve(&self, path: &SectionPath) -> Result<Leaf> {
        Err(Error::ItemNotFound { path: path.clone() })
    }
}

/// In-memory config store.
///
/// Clones share the same contents, so a test can keep a handle after moving
/// the store into an engine.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    inner: Rc<RefCell<MemoryStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    defaults: HashMap<SectionPath, Defaults>,
    loads: HashMap<SectionPath, usize>,
    saves: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace what `load(path)` returns.
    pub fn set(&self, path: &SectionPath, defaults: Defaults) {
        self.inner.borrow_mut().defaults.insert(path.clone(), defaults);
    }

    /// Replace the stored values for `path`, inferring type hints.
    pub fn set_values(&self, path: &SectionPath, values: Config) {
        self.set(path, Defaults::inferred(values));
    }

    /// What is currently stored for `path`.
    pub fn get(&self, path: &SectionPath) -> Option<Defaults> {
        self.inner.borrow().defaults.get(path).cloned()
    }

    /// How many times `path` was loaded.
    pub fn load_count(&self, path: &SectionPath) -> usize {
        self.inner.borrow().loads.get(path).copied().unwrap_or(0)
    }

    /// How many saves actually changed the stored contents.
    pub fn save_count(&self) -> usize {
        self.inner.borrow().saves
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self, path: &SectionPath) -> Result<Defaults> {
        let mut inner = self.inner.borrow_mut();
        *inner.loads.entry(path.clone()).or_default() += 1;
        Ok(inner.defaults.get(path).cloned().unwrap_or_default())
    }

    fn save(&self, path: &SectionPath, config: &Config) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let entry = inner.defaults.entry(path.clone()).or_default();
        if entry.values == *config {
            return Ok(());
        }
        entry.values = config.clone();
        inner.saves += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::config;
    use serde_json::json;

    fn p(s: &str) -> SectionPath {
        SectionPath::parse(s).unwrap()
    }

    #[test]
    fn missing_path_loads_empty_defaults() {
        let store = MemoryStore::new();
        let defaults = store.load(&p("a.b")).unwrap();
        assert!(defaults.values.is_empty());
        assert_eq!(store.load_count(&p("a.b")), 1);
    }

    #[test]
    fn clones_share_contents() {
        let store = MemoryStore::new();
        let handle = store.clone();
        store.set_values(&p("a"), config([("x", json!(1))]));
        assert_eq!(handle.get(&p("a")).unwrap().values.len(), 1);
    }

    #[test]
    fn unchanged_save_is_a_no_op() {
        let store = MemoryStore::new();
        let cfg = config([("x", json!(1))]);
        store.save(&p("a"), &cfg).unwrap();
        store.save(&p("a"), &cfg).unwrap();
        assert_eq!(store.save_count(), 1);
    }

    #[test]
    fn no_loader_reports_not_found() {
        let err = NoLoader.resolve(&p("a.b")).unwrap_err();
        assert!(matches!(err, Error::ItemNotFound { .. }));
    }
}
