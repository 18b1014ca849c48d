//! Runner and object cache
//!
//! Every leaf moves through `Unloaded -> Resolving -> Materialized` at most
//! once per load cycle. A materialized item is reused by every later `run`
//! and `get`, and configuration changes reach it through its live-update
//! hook instead of a rebuild.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::Value;

use crate::context::Frame;
use crate::error::{Error, Result};
use crate::item::{Applied, BoundFunction, LeafKind, Object};
use crate::layer::Config;
use crate::path::SectionPath;
use crate::registry::{Node, NodeKind};

use super::{Engine, RunContext};

/// Where a path is in its materialization lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Unloaded,
    Resolving,
    Materialized,
}

/// Result of running or getting a path.
///
/// A leaf yields `One`. A section whose children are all leaves yields a
/// `Sequence` in declaration order; a section with at least one sub-section
/// yields a `Mapping` keyed by child name.
#[derive(Debug, Clone, PartialEq)]
pub enum Fanout<T> {
    One(T),
    Sequence(Vec<T>),
    Mapping(BTreeMap<String, Fanout<T>>),
}

impl<T> Fanout<T> {
    /// The single value of a leaf result.
    pub fn into_one(self) -> Option<T> {
        match self {
            Self::One(value) => Some(value),
            _ => None,
        }
    }
}

impl Fanout<Value> {
    /// Collapse into one JSON value: sequences become arrays, mappings become
    /// objects.
    pub fn into_value(self) -> Value {
        match self {
            Self::One(value) => value,
            Self::Sequence(values) => Value::Array(values),
            Self::Mapping(entries) => Value::Object(
                entries
                    .into_iter()
                    .map(|(name, entry)| (name, entry.into_value()))
                    .collect(),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Sequence,
    Mapping,
}

struct CacheEntry {
    object: Object,
    /// Effective configuration the object was last built or updated with.
    applied: Config,
}

/// Materialized objects of one load cycle.
#[derive(Default)]
pub(crate) struct ObjectCache {
    entries: HashMap<SectionPath, CacheEntry>,
    resolving: HashSet<SectionPath>,
    /// Result shape of each section fanned out during this load cycle.
    shapes: HashMap<SectionPath, Shape>,
}

impl ObjectCache {
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.shapes.clear();
    }

    /// Drop every entry at or below `prefix`.
    pub(crate) fn remove_prefix(&mut self, prefix: &SectionPath) {
        self.entries.retain(|path, _| !path.starts_with(prefix));
        self.shapes.retain(|path, _| !path.starts_with(prefix));
    }
}

impl Engine {
    /// Run `path`.
    ///
    /// A leaf is materialized on first use and its entry point invoked under
    /// a running frame. A section runs every child; see [`Fanout`] for the
    /// shape of the result.
    ///
    /// # Errors
    ///
    /// Construction and execution failures propagate unchanged. A leaf whose
    /// first run fails is left unloaded so a later call can retry.
    pub fn run(&self, path: &SectionPath) -> Result<Value> {
        self.require_loaded()?;
        match self.kind(path)? {
            NodeKind::Leaf => self.run_leaf(path),
            NodeKind::Section => Ok(self.fan_out(path, &|leaf| self.run_leaf(leaf))?.into_value()),
        }
    }

    /// Materialize `path` without running it.
    pub fn get(&self, path: &SectionPath) -> Result<Fanout<Object>> {
        self.require_loaded()?;
        match self.kind(path)? {
            NodeKind::Leaf => self.materialize(path).map(Fanout::One),
            NodeKind::Section => self.fan_out(path, &|leaf| self.materialize(leaf)),
        }
    }

    /// The materialized object of the leaf at `path`.
    pub fn get_object(&self, path: &SectionPath) -> Result<Object> {
        self.require_loaded()?;
        match self.kind(path)? {
            NodeKind::Leaf => self.materialize(path),
            NodeKind::Section => Err(Error::NotALeaf { path: path.clone() }),
        }
    }

    pub fn cache_state(&self, path: &SectionPath) -> CacheState {
        let cache = self.cache.borrow();
        if cache.entries.contains_key(path) {
            CacheState::Materialized
        } else if cache.resolving.contains(path) {
            CacheState::Resolving
        } else {
            CacheState::Unloaded
        }
    }

    /// Paths with a materialized object, sorted.
    pub fn cached_paths(&self) -> Vec<SectionPath> {
        let mut paths: Vec<SectionPath> = self.cache.borrow().entries.keys().cloned().collect();
        paths.sort();
        paths
    }

    fn fan_out<T>(
        &self,
        path: &SectionPath,
        leaf: &dyn Fn(&SectionPath) -> Result<T>,
    ) -> Result<Fanout<T>> {
        let (children, shape) = self.with_registry(|registry| {
            let section = registry.section(path)?;
            let shape = if section.has_subsections() {
                Shape::Mapping
            } else {
                Shape::Sequence
            };
            let children = section
                .children()
                .map(|(name, node)| Ok((name.to_string(), path.join(name)?, node.kind())))
                .collect::<Result<Vec<_>>>()?;
            Ok((children, shape))
        })?;
        self.check_shape(path, shape)?;

        match shape {
            Shape::Sequence => children
                .iter()
                .map(|(_, child, _)| leaf(child))
                .collect::<Result<Vec<_>>>()
                .map(Fanout::Sequence),
            Shape::Mapping => {
                let mut entries = BTreeMap::new();
                for (name, child, kind) in children {
                    let entry = match kind {
                        NodeKind::Leaf => Fanout::One(leaf(&child)?),
                        NodeKind::Section => self.fan_out(&child, leaf)?,
                    };
                    entries.insert(name, entry);
                }
                Ok(Fanout::Mapping(entries))
            }
        }
    }

    /// Fix the result shape of `path` for this load cycle.
    fn check_shape(&self, path: &SectionPath, shape: Shape) -> Result<()> {
        let mut cache = self.cache.borrow_mut();
        match cache.shapes.get(path) {
            Some(recorded) if *recorded != shape => {
                Err(Error::StaleSection { path: path.clone() })
            }
            Some(_) => Ok(()),
            None => {
                cache.shapes.insert(path.clone(), shape);
                Ok(())
            }
        }
    }

    fn run_leaf(&self, path: &SectionPath) -> Result<Value> {
        let fresh = self.cache_state(path) == CacheState::Unloaded;
        let object = self.materialize(path)?;

        let _frame = self.enter(Frame::Running(path.clone()));
        if !fresh {
            self.live_update(path)?;
        }
        tracing::debug!(path = %path, "running item");
        let ctx = RunContext::new(self, path);
        let result = object.run(path, &ctx);
        if result.is_err() && fresh {
            self.cache.borrow_mut().entries.remove(path);
            tracing::debug!(path = %path, "first run failed, dropping materialization");
        }
        result
    }

    /// The cached object of `path`, materializing it on first use.
    pub(crate) fn materialize(&self, path: &SectionPath) -> Result<Object> {
        if let Some(entry) = self.cache.borrow().entries.get(path) {
            return Ok(entry.object.clone());
        }
        if !self.cache.borrow_mut().resolving.insert(path.clone()) {
            return Err(Error::ReentrantRun { path: path.clone() });
        }

        let built = {
            let _frame = self.enter(Frame::Running(path.clone()));
            self.resolve(path)
                .and_then(|config| self.construct(path, &config).map(|object| (object, config)))
        };
        self.cache.borrow_mut().resolving.remove(path);
        let (object, applied) = built?;

        tracing::info!(path = %path, "materialized item");
        self.cache.borrow_mut().entries.insert(
            path.clone(),
            CacheEntry {
                object: object.clone(),
                applied,
            },
        );
        Ok(object)
    }

    fn construct(&self, path: &SectionPath, config: &Config) -> Result<Object> {
        let leaf = self.leaf(path)?;
        let ctx = RunContext::new(self, path);
        match leaf.kind() {
            LeafKind::Function(func) => Ok(Object::new(BoundFunction::new(func.clone(), config.clone()))),
            LeafKind::Type(factory) => factory.construct(config, &ctx).map(Object::from_box),
            LeafKind::Instance(object) => {
                if object.apply_update(path, config, &ctx)? == Applied::Rebuild {
                    tracing::warn!(path = %path, "instance asked for a rebuild but has no factory; keeping it");
                }
                Ok(object.clone())
            }
        }
    }

    /// Live-update every materialized item at or below `prefix`.
    pub(crate) fn apply_live_updates(&self, prefix: &SectionPath) -> Result<usize> {
        let mut paths: Vec<SectionPath> = self
            .cache
            .borrow()
            .entries
            .keys()
            .filter(|path| path.starts_with(prefix))
            .cloned()
            .collect();
        paths.sort();

        let mut updated = 0;
        for path in paths {
            if self.live_update(&path)? {
                updated += 1;
            }
        }
        Ok(updated)
    }

    /// Hand the current effective configuration of `path` to its cached
    /// object if it differs from what the object last saw.
    fn live_update(&self, path: &SectionPath) -> Result<bool> {
        let Some((object, applied)) = self
            .cache
            .borrow()
            .entries
            .get(path)
            .map(|entry| (entry.object.clone(), entry.applied.clone()))
        else {
            return Ok(false);
        };

        let _frame = self.enter(Frame::Running(path.clone()));
        let config = self.resolve(path)?;
        if config == applied {
            return Ok(false);
        }

        let ctx = RunContext::new(self, path);
        match object.apply_update(path, &config, &ctx)? {
            Applied::InPlace => {
                tracing::info!(path = %path, "live-updated item in place");
            }
            Applied::Rebuild => match self.leaf(path)?.kind() {
                LeafKind::Function(func) => {
                    object.replace(path, Box::new(BoundFunction::new(func.clone(), config.clone())))?;
                    tracing::info!(path = %path, "rebuilt item");
                }
                LeafKind::Type(factory) => {
                    let item = factory.construct(&config, &ctx)?;
                    object.replace(path, item)?;
                    tracing::info!(path = %path, "rebuilt item");
                }
                LeafKind::Instance(_) => {
                    tracing::warn!(path = %path, "instance declined the update and cannot be rebuilt");
                }
            },
        }

        if let Some(entry) = self.cache.borrow_mut().entries.get_mut(path) {
            entry.applied = config;
        }
        Ok(true)
    }

    /// Whether the node at `path` is only declared and not loaded yet.
    pub fn is_declared(&self, path: &SectionPath) -> Result<bool> {
        self.with_registry(|registry| Ok(matches!(registry.node(path)?, Node::Declared)))
    }
}
