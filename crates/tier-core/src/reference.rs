//! Lazy references to other items
//!
//! A [`Reference`] names another registry path and defers materializing it
//! until it is used. Using it ([`Reference::resolve`], [`Reference::call`],
//! [`Reference::value`]) records a forced dependency edge from whatever frame
//! is on top of the engine's execution context to the referenced path. That
//! is how the engine learns, without static analysis, that one item depends
//! on another.
//!
//! A reference may also name a single configuration key of the target
//! (`models.encoder:width`). Such field references are dereferenced when the
//! configuration holding them is materialized.

use std::fmt;

use serde_json::Value;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::item::Object;
use crate::layer::ConfigValue;
use crate::path::SectionPath;

/// Deferred handle to a registry path, optionally narrowed to one key.
///
/// Equality and hashing are structural, so two references to the same path
/// are interchangeable as map keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
    path: SectionPath,
    field: Option<String>,
}

impl Reference {
    /// Reference to a whole item.
    pub fn to(path: SectionPath) -> Self {
        Self { path, field: None }
    }

    /// Reference to one configuration key of an item.
    pub fn field(path: SectionPath, field: impl Into<String>) -> Self {
        Self {
            path,
            field: Some(field.into()),
        }
    }

    /// Parse `a.b` or `a.b:key`.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.split_once(':') {
            Some((path, field)) if !field.is_empty() => {
                Ok(Self::field(SectionPath::parse(path)?, field))
            }
            Some(_) => Err(Error::InvalidPath {
                path: raw.to_string(),
                reason: "empty field after ':'".to_string(),
            }),
            None => Ok(Self::to(SectionPath::parse(raw)?)),
        }
    }

    pub fn path(&self) -> &SectionPath {
        &self.path
    }

    pub fn field_name(&self) -> Option<&str> {
        self.field.as_deref()
    }

    pub fn is_field(&self) -> bool {
        self.field.is_some()
    }

    /// Materialize the referenced item through the engine's object cache.
    ///
    /// Identity is stable within a load cycle: resolving twice yields handles
    /// for which [`Object::ptr_eq`] holds.
    pub fn resolve(&self, engine: &Engine) -> Result<Object> {
        engine.capture(&self.path);
        engine.get_object(&self.path)
    }

    /// Resolve and invoke the item's entry point.
    pub fn call(&self, engine: &Engine) -> Result<Value> {
        engine.capture(&self.path);
        engine.run(&self.path)
    }

    /// The referenced value: the named key of the target's effective
    /// configuration, or the whole effective configuration as a JSON map for
    /// a whole-item reference.
    pub fn value(&self, engine: &Engine) -> Result<ConfigValue> {
        engine.capture(&self.path);
        let config = engine.resolve(&self.path)?;
        match &self.field {
            Some(key) => config.get(key).cloned().ok_or_else(|| Error::MissingKey {
                path: self.path.clone(),
                key: key.clone(),
            }),
            None => {
                let map = config
                    .into_iter()
                    .map(|(k, v)| {
                        let v = match v {
                            ConfigValue::Value(value) => value,
                            ConfigValue::Reference(r) => Value::String(r.to_string()),
                        };
                        (k, v)
                    })
                    .collect();
                Ok(ConfigValue::Value(Value::Object(map)))
            }
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "@{}:{}", self.path, field),
            None => write!(f, "@{}", self.path),
        }
    }
}
