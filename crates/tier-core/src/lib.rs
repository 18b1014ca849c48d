//! Hierarchical configuration resolution and dependency propagation for Tier
//!
//! Items (callables, constructible types and pre-built instances) are
//! registered under dotted paths. The engine computes each item's effective
//! configuration from a stack of override layers, materializes items at most
//! once per load cycle, records which items depend on which by watching
//! lazy references being used, and pushes configuration changes through
//! those dependencies into the live objects.
//!
//! - **Resolution**: leaf defaults, section layers, leaf updates, local layers
//! - **Dependency graph**: edges captured from lazy references, forced
//!   propagation ordered dependencies first, cycle detection
//! - **Runner**: object cache, section fan-out, live updates in place
//! - **Entry points**: batch updates and combinatorial iteration
//!
//! # Architecture
//!
//! ```text
//!             Engine (one per session)
//!                       |
//!     +--------+--------+--------+---------+
//!     |        |        |        |         |
//! Registry  layers   graph   context   object cache
//!                       |
//!        ConfigStore / ItemLoader (collaborators)
//! ```
//!
//! File-backed storage lives in `tier-fs`.

pub mod context;
pub mod engine;
pub mod error;
pub mod graph;
pub mod item;
pub mod layer;
pub mod logging;
pub mod options;
pub mod path;
pub mod reference;
pub mod registry;
pub mod store;

pub use context::{ExecutionContext, Frame};
pub use engine::{
    BatchEntry, BatchMode, BatchReport, CacheState, ChangeSet, Engine, Fanout, Iteration,
    RefreshOutcome, RunContext, UpdateOutcome,
};
pub use error::{BoxError, Error, Result};
pub use graph::DependencyGraph;
pub use item::{Applied, Factory, Function, Item, Leaf, LeafKind, Object};
pub use layer::{Change, Config, ConfigLayer, ConfigValue, Defaults, Field, Schema, TypeHint, config, diff};
pub use options::EngineOptions;
pub use path::SectionPath;
pub use reference::Reference;
pub use registry::{Node, NodeKind, Registry, Section};
pub use store::{ConfigStore, ItemLoader, MemoryStore, NoLoader};
