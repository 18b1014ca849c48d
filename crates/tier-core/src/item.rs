//! Leaves and the items they materialize into
//!
//! A [`Leaf`] is what gets registered under a path. Materializing it yields
//! an [`Object`]: a shared, mutable handle to a boxed [`Item`] that the
//! runner caches and live-updates in place.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::engine::RunContext;
use crate::error::{Error, Result};
use crate::layer::{Config, Schema};
use crate::path::SectionPath;

/// Upcast helper so items can be inspected by concrete type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// What an item did with a configuration change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The item absorbed the new configuration itself.
    InPlace,
    /// The item cannot update in place; rebuild it from the new configuration.
    Rebuild,
}

/// A materialized item with a designated entry point.
pub trait Item: AsAny {
    /// The entry point invoked by `Engine::run` and `Reference::call`.
    fn run(&mut self, ctx: &RunContext<'_>) -> Result<Value>;

    /// Live-update hook, called when the effective configuration of an
    /// already materialized item changes.
    fn apply_update(&mut self, config: &Config, ctx: &RunContext<'_>) -> Result<Applied> {
        let _ = (config, ctx);
        Ok(Applied::Rebuild)
    }
}

/// Plain callable receiving its bound configuration.
pub type Function = Rc<dyn Fn(&Config, &RunContext<'_>) -> Result<Value>>;

/// Constructs an item from its effective configuration.
pub trait Factory {
    fn construct(&self, config: &Config, ctx: &RunContext<'_>) -> Result<Box<dyn Item>>;
}

impl<F> Factory for F
where
    F: Fn(&Config, &RunContext<'_>) -> Result<Box<dyn Item>>,
{
    fn construct(&self, config: &Config, ctx: &RunContext<'_>) -> Result<Box<dyn Item>> {
        self(config, ctx)
    }
}

/// The three things a leaf can refer to.
#[derive(Clone)]
pub enum LeafKind {
    /// A callable; materialization binds the configuration to it.
    Function(Function),
    /// A constructible type.
    Type(Rc<dyn Factory>),
    /// A pre-built domain instance.
    Instance(Object),
}

/// A registered callable, type or instance plus its parameter schema.
#[derive(Clone)]
pub struct Leaf {
    kind: LeafKind,
    schema: Schema,
}

impl Leaf {
    pub fn function<F>(func: F) -> Self
    where
        F: Fn(&Config, &RunContext<'_>) -> Result<Value> + 'static,
    {
        Self {
            kind: LeafKind::Function(Rc::new(func)),
            schema: Schema::default(),
        }
    }

    pub fn of_type<F>(construct: F) -> Self
    where
        F: Fn(&Config, &RunContext<'_>) -> Result<Box<dyn Item>> + 'static,
    {
        Self::from_factory(construct)
    }

    pub fn from_factory<F>(factory: F) -> Self
    where
        F: Factory + 'static,
    {
        Self {
            kind: LeafKind::Type(Rc::new(factory)),
            schema: Schema::default(),
        }
    }

    pub fn instance(item: impl Item) -> Self {
        Self {
            kind: LeafKind::Instance(Object::new(item)),
            schema: Schema::default(),
        }
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    pub fn kind(&self) -> &LeafKind {
        &self.kind
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

impl fmt::Debug for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            LeafKind::Function(_) => "function",
            LeafKind::Type(_) => "type",
            LeafKind::Instance(_) => "instance",
        };
        f.debug_struct("Leaf")
            .field("kind", &kind)
            .field("schema", &self.schema)
            .finish()
    }
}

/// Shared handle to a materialized item.
///
/// Clones share the same item; a rebuild replaces the item behind the
/// handle, so holders keep observing the live object.
#[derive(Clone)]
pub struct Object(Rc<RefCell<Box<dyn Item>>>);

impl Object {
    pub fn new(item: impl Item) -> Self {
        Self::from_box(Box::new(item))
    }

    pub fn from_box(item: Box<dyn Item>) -> Self {
        Self(Rc::new(RefCell::new(item)))
    }

    /// Whether both handles point at the same materialization.
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Whether the item is currently a `T`.
    pub fn is<T: Item>(&self) -> bool {
        self.0
            .try_borrow()
            .map(|item| (**item).as_any().is::<T>())
            .unwrap_or(false)
    }

    /// Inspect the item as a `T`. Returns `None` for another type or while
    /// the item is running.
    pub fn with<T: Item, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let item = self.0.try_borrow().ok()?;
        (**item).as_any().downcast_ref::<T>().map(f)
    }

    /// Mutably inspect the item as a `T`.
    pub fn with_mut<T: Item, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut item = self.0.try_borrow_mut().ok()?;
        (**item).as_any_mut().downcast_mut::<T>().map(f)
    }

    pub(crate) fn run(&self, path: &SectionPath, ctx: &RunContext<'_>) -> Result<Value> {
        let mut item = self.0.try_borrow_mut().map_err(|_| Error::ReentrantRun {
            path: path.clone(),
        })?;
        item.run(ctx)
    }

    pub(crate) fn apply_update(
        &self,
        path: &SectionPath,
        config: &Config,
        ctx: &RunContext<'_>,
    ) -> Result<Applied> {
        let mut item = self.0.try_borrow_mut().map_err(|_| Error::ReentrantRun {
            path: path.clone(),
        })?;
        item.apply_update(config, ctx)
    }

    pub(crate) fn replace(&self, path: &SectionPath, item: Box<dyn Item>) -> Result<()> {
        let mut slot = self.0.try_borrow_mut().map_err(|_| Error::ReentrantRun {
            path: path.clone(),
        })?;
        *slot = item;
        Ok(())
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object({:p})", Rc::as_ptr(&self.0))
    }
}

/// A function leaf with its configuration bound.
pub(crate) struct BoundFunction {
    func: Function,
    config: Config,
}

impl BoundFunction {
    pub(crate) fn new(func: Function, config: Config) -> Self {
        Self { func, config }
    }
}

impl Item for BoundFunction {
    fn run(&mut self, ctx: &RunContext<'_>) -> Result<Value> {
        (self.func)(&self.config, ctx)
    }

    fn apply_update(&mut self, config: &Config, _ctx: &RunContext<'_>) -> Result<Applied> {
        self.config = config.clone();
        Ok(Applied::InPlace)
    }
}
