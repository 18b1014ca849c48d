//! Configuration values, schemas and per-node config layers
//!
//! A [`ConfigLayer`] is the configuration owned by one registry node. It is
//! built from the node's defaults (schema defaults overlaid by whatever the
//! config store returned) and then receives updates:
//!
//! - **persisted** updates are kept in an ordered record and replayed when the
//!   layer is reloaded from the store
//! - **transient** updates only live until the next refresh or reset
//!
//! The effective configuration of a path is composed from several layers by
//! the engine; see `Engine::resolve`. A leaf's defaults sit below every
//! section layer while its updates sit above them, so an explicit update to a
//! leaf is never shadowed by a section default.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::reference::Reference;

/// A single configuration value: either a concrete JSON value or a lazy
/// reference to another item.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Value(Value),
    Reference(Reference),
}

impl ConfigValue {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Reference(_) => None,
        }
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            Self::Reference(reference) => Some(reference),
            Self::Value(_) => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Value(Value::Null))
    }

    /// Short name of the value's kind, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Reference(_) => "reference",
            Self::Value(Value::Null) => "null",
            Self::Value(Value::Bool(_)) => "bool",
            Self::Value(Value::Number(n)) if n.is_f64() => "float",
            Self::Value(Value::Number(_)) => "integer",
            Self::Value(Value::String(_)) => "string",
            Self::Value(Value::Array(_)) => "list",
            Self::Value(Value::Object(_)) => "map",
        }
    }
}

impl From<Value> for ConfigValue {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Reference> for ConfigValue {
    fn from(reference: Reference) -> Self {
        Self::Reference(reference)
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => write!(f, "{value}"),
            Self::Reference(reference) => write!(f, "{reference}"),
        }
    }
}

/// Parameter name to value mapping.
pub type Config = BTreeMap<String, ConfigValue>;

/// Build a [`Config`] from key/value pairs.
///
/// ```
/// use serde_json::json;
/// use tier_core::config;
///
/// let cfg = config([("width", json!(128)), ("name", json!("enc"))]);
/// assert_eq!(cfg.len(), 2);
/// ```
pub fn config<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Config
where
    K: Into<String>,
    V: Into<ConfigValue>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Overlay `top` onto `base`, key by key.
pub fn merge_into(base: &mut Config, top: &Config) {
    for (key, value) in top {
        base.insert(key.clone(), value.clone());
    }
}

/// Declared type of a configuration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeHint {
    Any,
    Bool,
    Integer,
    Float,
    String,
    List,
    Map,
    Reference,
}

impl TypeHint {
    /// Whether `value` is acceptable for a key carrying this hint.
    ///
    /// `null` is accepted everywhere; integers are accepted as floats.
    pub fn accepts(&self, value: &ConfigValue) -> bool {
        match (self, value) {
            (Self::Any, _) => true,
            (_, ConfigValue::Value(Value::Null)) => true,
            (Self::Reference, ConfigValue::Reference(_)) => true,
            (_, ConfigValue::Reference(_)) => false,
            (Self::Reference, ConfigValue::Value(_)) => false,
            (Self::Bool, ConfigValue::Value(v)) => v.is_boolean(),
            (Self::Integer, ConfigValue::Value(v)) => v.is_i64() || v.is_u64(),
            (Self::Float, ConfigValue::Value(v)) => v.is_number(),
            (Self::String, ConfigValue::Value(v)) => v.is_string(),
            (Self::List, ConfigValue::Value(v)) => v.is_array(),
            (Self::Map, ConfigValue::Value(v)) => v.is_object(),
        }
    }

    /// Best-effort hint for an untyped default.
    pub fn infer(value: &ConfigValue) -> Self {
        match value {
            ConfigValue::Reference(_) => Self::Reference,
            ConfigValue::Value(Value::Null) => Self::Any,
            ConfigValue::Value(Value::Bool(_)) => Self::Bool,
            ConfigValue::Value(Value::Number(n)) if n.is_f64() => Self::Float,
            ConfigValue::Value(Value::Number(_)) => Self::Integer,
            ConfigValue::Value(Value::String(_)) => Self::String,
            ConfigValue::Value(Value::Array(_)) => Self::List,
            ConfigValue::Value(Value::Object(_)) => Self::Map,
        }
    }
}

impl fmt::Display for TypeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Any => "any",
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::List => "list",
            Self::Map => "map",
            Self::Reference => "reference",
        };
        f.write_str(name)
    }
}

/// One declared parameter of a leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub default: ConfigValue,
    pub hint: TypeHint,
}

/// Parameter descriptor supplied when a leaf is registered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field. A later field with the same name replaces the earlier one.
    pub fn field(
        mut self,
        name: impl Into<String>,
        default: impl Into<ConfigValue>,
        hint: TypeHint,
    ) -> Self {
        let name = name.into();
        self.fields.retain(|f| f.name != name);
        self.fields.push(Field {
            name,
            default: default.into(),
            hint,
        });
        self
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn defaults(&self) -> Config {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.default.clone()))
            .collect()
    }

    pub fn hints(&self) -> BTreeMap<String, TypeHint> {
        self.fields.iter().map(|f| (f.name.clone(), f.hint)).collect()
    }
}

/// What a config store returns for a path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Defaults {
    pub values: Config,
    pub type_hints: BTreeMap<String, TypeHint>,
}

impl Defaults {
    /// Defaults with hints inferred from the values.
    pub fn inferred(values: Config) -> Self {
        let type_hints = values
            .iter()
            .map(|(k, v)| (k.clone(), TypeHint::infer(v)))
            .collect();
        Self { values, type_hints }
    }
}

/// One key whose effective value differs between two configurations.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub key: String,
    pub before: Option<ConfigValue>,
    pub after: Option<ConfigValue>,
}

/// Keys that differ between `before` and `after`, in key order.
pub fn diff(before: &Config, after: &Config) -> Vec<Change> {
    let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    keys.into_iter()
        .filter_map(|key| {
            let old = before.get(key);
            let new = after.get(key);
            (old != new).then(|| Change {
                key: key.clone(),
                before: old.cloned(),
                after: new.cloned(),
            })
        })
        .collect()
}

/// Configuration owned by a single registry node.
#[derive(Debug, Clone, Default)]
pub struct ConfigLayer {
    defaults: Config,
    /// Defaults plus persisted updates as written, references unresolved.
    raw: Config,
    file_keys: BTreeSet<String>,
    type_hints: BTreeMap<String, TypeHint>,
    /// Ordered record of persisted updates, as given (references unresolved).
    persisted: Vec<Config>,
    /// Materialized values of the persisted record.
    persisted_values: Config,
    transient: Config,
    /// Transient updates as given.
    transient_raw: Config,
}

impl ConfigLayer {
    /// A layer over materialized `defaults`, remembering their `raw` form.
    pub fn new(
        defaults: Config,
        raw: Config,
        file_keys: BTreeSet<String>,
        type_hints: BTreeMap<String, TypeHint>,
    ) -> Self {
        Self {
            defaults,
            raw,
            file_keys,
            type_hints,
            ..Self::default()
        }
    }

    /// Effective values of this layer alone.
    pub fn values(&self) -> Config {
        let mut values = self.defaults.clone();
        merge_into(&mut values, &self.persisted_values);
        merge_into(&mut values, &self.transient);
        values
    }

    /// Persisted and transient updates only, transient last.
    pub fn overrides(&self) -> Config {
        let mut values = self.persisted_values.clone();
        merge_into(&mut values, &self.transient);
        values
    }

    /// Defaults plus persisted updates in their written form, without
    /// transient ones. This is what gets saved back to the store.
    pub fn persistable(&self) -> Config {
        self.raw.clone()
    }

    pub fn defaults(&self) -> &Config {
        &self.defaults
    }

    /// Keys that came from the file-backed store rather than the schema.
    pub fn file_keys(&self) -> &BTreeSet<String> {
        &self.file_keys
    }

    pub fn type_hint(&self, key: &str) -> Option<TypeHint> {
        self.type_hints.get(key).copied()
    }

    pub fn persisted(&self) -> &[Config] {
        &self.persisted
    }

    pub fn has_transient(&self) -> bool {
        !self.transient.is_empty()
    }

    /// The value of `key` in the form it was last written, references
    /// unresolved. Transient updates count.
    pub fn written(&self, key: &str) -> Option<&ConfigValue> {
        self.transient_raw.get(key).or_else(|| self.raw.get(key))
    }

    /// Apply already-materialized `values` whose written form is `raw`.
    ///
    /// With `persist` set, the raw changes are appended to the persisted
    /// record and survive a reload; otherwise the values are transient.
    pub fn apply(&mut self, values: Config, raw: Config, persist: bool) {
        if persist {
            for key in values.keys() {
                self.transient.remove(key);
                self.transient_raw.remove(key);
            }
            merge_into(&mut self.persisted_values, &values);
            self.record(raw);
        } else {
            merge_into(&mut self.transient, &values);
            merge_into(&mut self.transient_raw, &raw);
        }
    }

    /// Re-attach a persisted record replayed onto fresh defaults.
    pub fn replay(&mut self, raw: Config, values: Config) {
        merge_into(&mut self.persisted_values, &values);
        self.record(raw);
    }

    /// Append `raw` to the persisted record. Keys it sets are dropped from
    /// earlier records, and records left empty go away.
    fn record(&mut self, raw: Config) {
        merge_into(&mut self.raw, &raw);
        for earlier in &mut self.persisted {
            earlier.retain(|key, _| !raw.contains_key(key));
        }
        self.persisted.retain(|earlier| !earlier.is_empty());
        self.persisted.push(raw);
    }

    /// Consume the layer, keeping only its persisted record.
    pub fn into_persisted(self) -> Vec<Config> {
        self.persisted
    }
}
