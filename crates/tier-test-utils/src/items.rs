//! Items that record what the engine did to them.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;
use tier_core::{Applied, Config, ConfigValue, Error, Item, Leaf, RunContext, Schema};

/// What happened to the items built from one [`Recorder`].
#[derive(Debug, Default)]
pub struct RecorderLog {
    pub constructed: usize,
    pub runs: usize,
    /// Configurations handed to the live-update hook, in order.
    pub updates: Vec<Config>,
}

/// Factory for recording items.
///
/// Every item built from the same recorder (and every clone of the recorder)
/// shares one [`RecorderLog`]. Running an item returns its configuration as a
/// JSON object.
///
/// # Example
///
/// ```rust
/// use tier_test_utils::Recorder;
///
/// let recorder = Recorder::new();
/// let leaf = recorder.leaf();
/// assert_eq!(recorder.constructed(), 0);
/// # drop(leaf);
/// ```
#[derive(Clone, Default)]
pub struct Recorder {
    log: Rc<RefCell<RecorderLog>>,
    rebuild: bool,
}

impl Recorder {
    /// Items that absorb updates in place.
    pub fn new() -> Self {
        Self::default()
    }

    /// Items that decline in-place updates and ask to be rebuilt.
    pub fn rebuilding() -> Self {
        Self {
            rebuild: true,
            ..Self::default()
        }
    }

    /// A type leaf constructing a fresh item per materialization.
    pub fn leaf(&self) -> Leaf {
        let recorder = self.clone();
        Leaf::of_type(move |config, _| {
            recorder.log.borrow_mut().constructed += 1;
            Ok(Box::new(recorder.item(config.clone())) as Box<dyn Item>)
        })
    }

    /// A type leaf with `schema`.
    pub fn leaf_with(&self, schema: Schema) -> Leaf {
        self.leaf().with_schema(schema)
    }

    /// An instance leaf wrapping one pre-built item.
    pub fn instance(&self) -> Leaf {
        Leaf::instance(self.item(Config::new()))
    }

    fn item(&self, config: Config) -> RecordedItem {
        RecordedItem {
            config,
            log: Rc::clone(&self.log),
            rebuild: self.rebuild,
        }
    }

    pub fn constructed(&self) -> usize {
        self.log.borrow().constructed
    }

    pub fn runs(&self) -> usize {
        self.log.borrow().runs
    }

    /// How many times the live-update hook was called.
    pub fn updates(&self) -> usize {
        self.log.borrow().updates.len()
    }

    pub fn last_update(&self) -> Option<Config> {
        self.log.borrow().updates.last().cloned()
    }
}

/// Item built by a [`Recorder`].
pub struct RecordedItem {
    pub config: Config,
    log: Rc<RefCell<RecorderLog>>,
    rebuild: bool,
}

impl Item for RecordedItem {
    fn run(&mut self, _ctx: &RunContext<'_>) -> tier_core::Result<Value> {
        self.log.borrow_mut().runs += 1;
        Ok(to_json(&self.config))
    }

    fn apply_update(&mut self, config: &Config, _ctx: &RunContext<'_>) -> tier_core::Result<Applied> {
        self.log.borrow_mut().updates.push(config.clone());
        if self.rebuild {
            return Ok(Applied::Rebuild);
        }
        self.config = config.clone();
        Ok(Applied::InPlace)
    }
}

/// A configuration as a JSON object; references become `@path` strings.
pub fn to_json(config: &Config) -> Value {
    Value::Object(
        config
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    ConfigValue::Value(value) => value.clone(),
                    ConfigValue::Reference(reference) => Value::String(reference.to_string()),
                };
                (key.clone(), value)
            })
            .collect(),
    )
}

/// A function leaf that always returns `value`.
pub fn constant(value: Value) -> Leaf {
    Leaf::function(move |_, _| Ok(value.clone()))
}

/// A function leaf returning the value of `key` in its configuration.
///
/// A whole-item reference under `key` is called instead.
pub fn echo(key: &str) -> Leaf {
    let key = key.to_string();
    Leaf::function(move |config, ctx| match config.get(&key) {
        Some(ConfigValue::Reference(reference)) => ctx.call(reference),
        Some(ConfigValue::Value(value)) => Ok(value.clone()),
        None => Ok(Value::Null),
    })
}

/// A function leaf that fails with `message`.
pub fn failing(message: &str) -> Leaf {
    let message = message.to_string();
    Leaf::function(move |_, _| Err(Error::item(message.clone())))
}
