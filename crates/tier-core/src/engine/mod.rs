//! The engine: one logical session over an item registry
//!
//! An [`Engine`] owns everything that is mutable during a session: the
//! registry, the loaded config layers, the session-local layer, the
//! dependency graph, the execution context and the object cache. It is
//! passed by reference to every operation, including user items through
//! [`RunContext`].
//!
//! The engine is single-threaded by construction (`!Sync`). Sessions that
//! need parallelism use one engine per worker.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use tier_core::{Engine, Leaf, MemoryStore, Schema, Section, SectionPath, TypeHint, config};
//!
//! let engine = Engine::new(MemoryStore::new());
//! engine.load(Section::new().section(
//!     "jobs",
//!     Section::new().leaf(
//!         "greet",
//!         Leaf::function(|cfg, _| Ok(json!(format!("hello {}", cfg["name"]))))
//!             .with_schema(Schema::new().field("name", json!("world"), TypeHint::String)),
//!     ),
//! ))?;
//!
//! let path = SectionPath::parse("jobs.greet")?;
//! assert_eq!(engine.run(&path)?, json!("hello \"world\""));
//!
//! engine.update(&path, config([("name", json!("tier"))]), true)?;
//! assert_eq!(engine.run(&path)?, json!("hello \"tier\""));
//! # Ok::<(), tier_core::Error>(())
//! ```

mod batch;
mod iterate;
mod propagate;
mod resolve;
mod runner;

pub use batch::{BatchEntry, BatchMode, BatchReport};
pub use iterate::{ChangeSet, Iteration};
pub use resolve::{RefreshOutcome, UpdateOutcome};
pub use runner::{CacheState, Fanout};

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

use crate::context::{ExecutionContext, Frame, FrameGuard};
use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::item::{Leaf, Object};
use crate::layer::{Config, ConfigLayer, ConfigValue};
use crate::options::EngineOptions;
use crate::path::SectionPath;
use crate::reference::Reference;
use crate::registry::{Node, NodeKind, Registry, Section};
use crate::store::{ConfigStore, ItemLoader, NoLoader};

use runner::ObjectCache;

/// Resolution engine, dependency tracker and runner for one session.
pub struct Engine {
    /// Registry as declared, kept for rebuilding on reload.
    definition: RefCell<Option<Registry>>,
    /// Registry of the current load cycle.
    registry: RefCell<Option<Registry>>,
    layers: RefCell<HashMap<SectionPath, ConfigLayer>>,
    /// Persisted records of layers dropped by a reload, replayed on next load.
    carried: RefCell<HashMap<SectionPath, Vec<Config>>>,
    local: RefCell<HashMap<SectionPath, Config>>,
    graph: RefCell<DependencyGraph>,
    context: RefCell<ExecutionContext>,
    cache: RefCell<ObjectCache>,
    store: Box<dyn ConfigStore>,
    loader: Box<dyn ItemLoader>,
    options: EngineOptions,
}

impl Engine {
    /// Create an engine over `store`. Nothing is loaded until [`Engine::load`].
    pub fn new(store: impl ConfigStore + 'static) -> Self {
        Self {
            definition: RefCell::new(None),
            registry: RefCell::new(None),
            layers: RefCell::default(),
            carried: RefCell::default(),
            local: RefCell::default(),
            graph: RefCell::default(),
            context: RefCell::default(),
            cache: RefCell::default(),
            store: Box::new(store),
            loader: Box::new(NoLoader),
            options: EngineOptions::default(),
        }
    }

    pub fn with_loader(mut self, loader: impl ItemLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Build the registry from `definition` and start a fresh load cycle.
    pub fn load(&self, definition: Section) -> Result<()> {
        *self.definition.borrow_mut() = Some(Registry::new(definition));
        self.reload()
    }

    /// Rebuild the registry from its definition.
    ///
    /// Clears the object cache and every loaded layer. Persisted updates are
    /// carried over and replayed on next resolution unless
    /// `keep_updates_on_reload` is off. Dependency edges are kept.
    pub fn reload(&self) -> Result<()> {
        let definition = self.definition.borrow().clone().ok_or(Error::NotLoaded)?;
        *self.registry.borrow_mut() = Some(definition);
        self.cache.borrow_mut().clear();

        let layers = std::mem::take(&mut *self.layers.borrow_mut());
        let mut carried = self.carried.borrow_mut();
        if self.options.keep_updates_on_reload {
            for (path, layer) in layers {
                let record = layer.into_persisted();
                if !record.is_empty() {
                    carried.insert(path, record);
                }
            }
        } else {
            carried.clear();
        }
        tracing::info!(carried = carried.len(), "registry loaded");
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.registry.borrow().is_some()
    }

    /// Register `leaf` at `path`, creating missing intermediate sections.
    ///
    /// Replacing an existing node drops its cached object and loaded layers;
    /// persisted updates are kept for replay.
    pub fn register(&self, path: &SectionPath, leaf: Leaf) -> Result<()> {
        self.insert_node(path, Node::Leaf(leaf))
    }

    /// Declare a leaf at `path` to be supplied by the item loader.
    pub fn declare(&self, path: &SectionPath) -> Result<()> {
        self.insert_node(path, Node::Declared)
    }

    /// Create an empty section at `path` unless a section already exists.
    pub fn create_section(&self, path: &SectionPath) -> Result<()> {
        match self.kind(path) {
            Ok(NodeKind::Section) => Ok(()),
            Ok(NodeKind::Leaf) => Err(Error::NotASection { path: path.clone() }),
            Err(Error::NotLoaded) => Err(Error::NotLoaded),
            Err(_) => self.insert_node(path, Node::Section(Section::new())),
        }
    }

    fn insert_node(&self, path: &SectionPath, node: Node) -> Result<()> {
        self.registry
            .borrow_mut()
            .as_mut()
            .ok_or(Error::NotLoaded)?
            .insert(path, node.clone())?;
        if let Some(definition) = self.definition.borrow_mut().as_mut() {
            definition.insert(path, node)?;
        }

        self.cache.borrow_mut().remove_prefix(path);
        let mut layers = self.layers.borrow_mut();
        let stale: Vec<SectionPath> = layers
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();
        let mut carried = self.carried.borrow_mut();
        for p in stale {
            if let Some(layer) = layers.remove(&p) {
                let record = layer.into_persisted();
                if !record.is_empty() {
                    carried.insert(p, record);
                }
            }
        }
        tracing::debug!(path = %path, "registered node");
        Ok(())
    }

    /// Whether `path` names a section or a leaf.
    pub fn kind(&self, path: &SectionPath) -> Result<NodeKind> {
        self.with_registry(|registry| registry.kind(path))
    }

    pub fn contains(&self, path: &SectionPath) -> bool {
        self.with_registry(|registry| Ok(registry.contains(path)))
            .unwrap_or(false)
    }

    /// Direct children of the section at `path`, in declaration order.
    pub fn children(&self, path: &SectionPath) -> Result<Vec<SectionPath>> {
        self.with_registry(|registry| {
            registry
                .section(path)?
                .children()
                .map(|(name, _)| path.join(name))
                .collect()
        })
    }

    /// Record a dependency edge by hand.
    pub fn declare_dependency(&self, dependent: &SectionPath, target: &SectionPath, forced: bool) {
        if self.graph.borrow_mut().add_edge(dependent, target, forced) {
            tracing::debug!(%dependent, %target, forced, "declared dependency");
        }
    }

    /// Direct dependents of `target`.
    pub fn dependents_of(&self, target: &SectionPath, forced_only: bool) -> BTreeSet<SectionPath> {
        self.graph.borrow().dependents_of(target, forced_only)
    }

    /// Every dependent of `target`, forced or not: the items a caller may
    /// want to re-run after `target` changed.
    pub fn stale_dependents(&self, target: &SectionPath) -> BTreeSet<SectionPath> {
        self.dependents_of(target, false)
    }

    pub fn edge_count(&self) -> usize {
        self.graph.borrow().edge_count()
    }

    /// Drop every dependency edge.
    pub fn reset_graph(&self) {
        self.graph.borrow_mut().clear();
        tracing::info!("dependency graph reset");
    }

    /// The frame currently on top of the execution context.
    pub fn current_frame(&self) -> Option<Frame> {
        self.context.borrow().current().cloned()
    }

    /// Attribute a use of `target` to the frame on top of the context.
    pub(crate) fn capture(&self, target: &SectionPath) {
        let Some(dependent) = self.context.borrow().attribution().cloned() else {
            return;
        };
        if self.graph.borrow_mut().add_edge(&dependent, target, true) {
            tracing::debug!(%dependent, %target, "recorded dependency");
        }
    }

    fn enter(&self, frame: Frame) -> FrameGuard<'_> {
        FrameGuard::enter(&self.context, frame)
    }

    fn require_loaded(&self) -> Result<()> {
        if self.is_loaded() {
            Ok(())
        } else {
            Err(Error::NotLoaded)
        }
    }

    fn with_registry<R>(&self, f: impl FnOnce(&Registry) -> Result<R>) -> Result<R> {
        let registry = self.registry.borrow();
        let registry = registry.as_ref().ok_or(Error::NotLoaded)?;
        f(registry)
    }

    /// The leaf registered at `path`, asking the item loader for declared
    /// names and remembering its answer for the rest of the load cycle.
    pub(crate) fn leaf(&self, path: &SectionPath) -> Result<Leaf> {
        let found = self.with_registry(|registry| match registry.node(path)? {
            Node::Leaf(leaf) => Ok(Some(leaf.clone())),
            Node::Declared => Ok(None),
            Node::Section(_) => Err(Error::NotALeaf { path: path.clone() }),
        })?;
        if let Some(leaf) = found {
            return Ok(leaf);
        }

        tracing::debug!(path = %path, "loading declared item");
        let leaf = self.loader.resolve(path)?;
        self.registry
            .borrow_mut()
            .as_mut()
            .ok_or(Error::NotLoaded)?
            .insert(path, Node::Leaf(leaf.clone()))?;
        Ok(leaf)
    }
}

/// What an item sees while it is constructed, run or updated.
pub struct RunContext<'a> {
    engine: &'a Engine,
    path: &'a SectionPath,
}

impl<'a> RunContext<'a> {
    pub(crate) fn new(engine: &'a Engine, path: &'a SectionPath) -> Self {
        Self { engine, path }
    }

    pub fn engine(&self) -> &'a Engine {
        self.engine
    }

    /// Path of the item this context belongs to.
    pub fn path(&self) -> &'a SectionPath {
        self.path
    }

    /// Call a referenced item, recording the dependency.
    pub fn call(&self, reference: &Reference) -> Result<Value> {
        reference.call(self.engine)
    }

    /// Materialize a referenced item, recording the dependency.
    pub fn resolve(&self, reference: &Reference) -> Result<Object> {
        reference.resolve(self.engine)
    }

    /// Read a referenced value, recording the dependency.
    pub fn value(&self, reference: &Reference) -> Result<ConfigValue> {
        reference.value(self.engine)
    }

    /// Call the item referenced by `key` in `config`.
    pub fn call_key(&self, config: &Config, key: &str) -> Result<Value> {
        match config.get(key) {
            Some(ConfigValue::Reference(reference)) => self.call(reference),
            Some(other) => Err(Error::TypeMismatch {
                path: self.path.clone(),
                key: key.to_string(),
                expected: crate::layer::TypeHint::Reference,
                found: other.kind_name().to_string(),
            }),
            None => Err(Error::MissingKey {
                path: self.path.clone(),
                key: key.to_string(),
            }),
        }
    }
}
