//! Conversion between TOML items and configuration values
//!
//! References are stored as inline tables: `{ ref = "a.b" }` for a whole
//! item, `{ ref = "a.b", field = "x" }` for one key of it. TOML has no null,
//! so a null value is written by leaving its key out. A plain map shaped like
//! a reference, or a float that is not finite, has no faithful form on one
//! side and is rejected.

use std::path::Path;

use serde_json::{Map, Number, Value as Json};
use tier_core::{ConfigValue, Reference, SectionPath};
use toml_edit::{Array, InlineTable, Item, Table, Value};

use crate::{Error, Result};

const REF_KEY: &str = "ref";
const FIELD_KEY: &str = "field";

/// The configuration value stored under `key` in `file`.
pub fn read_item(file: &Path, key: &str, item: &Item) -> Result<Option<ConfigValue>> {
    let Some(json) = item_to_json(file, key, item)? else {
        return Ok(None);
    };
    match as_reference(file, key, &json)? {
        Some(reference) => Ok(Some(ConfigValue::Reference(reference))),
        None => Ok(Some(ConfigValue::Value(json))),
    }
}

/// The TOML value to write for `value`, `None` for null.
pub fn to_toml(key: &str, value: &ConfigValue) -> Result<Option<Value>> {
    match value {
        ConfigValue::Reference(reference) => {
            let mut table = InlineTable::new();
            table.insert(REF_KEY, Value::from(reference.path().to_string()));
            if let Some(field) = reference.field_name() {
                table.insert(FIELD_KEY, Value::from(field));
            }
            Ok(Some(Value::InlineTable(table)))
        }
        ConfigValue::Value(Json::Null) => Ok(None),
        ConfigValue::Value(Json::Object(map)) if looks_like_reference(map) => {
            Err(Error::Unrepresentable {
                key: key.to_string(),
                reason: "a map with only 'ref' and 'field' keys reads back as a reference"
                    .to_string(),
            })
        }
        ConfigValue::Value(json) => json_to_toml(key, json).map(Some),
    }
}

fn item_to_json(file: &Path, key: &str, item: &Item) -> Result<Option<Json>> {
    match item {
        Item::None => Ok(None),
        Item::Value(value) => value_to_json(file, key, value).map(Some),
        Item::Table(table) => table_to_json(file, key, table).map(Some),
        Item::ArrayOfTables(tables) => tables
            .iter()
            .map(|table| table_to_json(file, key, table))
            .collect::<Result<Vec<_>>>()
            .map(|tables| Some(Json::Array(tables))),
    }
}

fn table_to_json(file: &Path, key: &str, table: &Table) -> Result<Json> {
    let mut map = Map::new();
    for (name, item) in table.iter() {
        if let Some(json) = item_to_json(file, key, item)? {
            map.insert(name.to_string(), json);
        }
    }
    Ok(Json::Object(map))
}

/// `key` names the top-level entry being read, for error messages.
fn value_to_json(file: &Path, key: &str, value: &Value) -> Result<Json> {
    Ok(match value {
        Value::String(s) => Json::String(s.value().clone()),
        Value::Integer(i) => Json::Number((*i.value()).into()),
        Value::Float(f) => Json::Number(Number::from_f64(*f.value()).ok_or_else(|| {
            Error::NonFinite {
                path: file.to_path_buf(),
                key: key.to_string(),
            }
        })?),
        Value::Boolean(b) => Json::Bool(*b.value()),
        Value::Datetime(d) => Json::String(d.value().to_string()),
        Value::Array(array) => Json::Array(
            array
                .iter()
                .map(|value| value_to_json(file, key, value))
                .collect::<Result<Vec<_>>>()?,
        ),
        Value::InlineTable(table) => {
            let mut map = Map::new();
            for (name, value) in table.iter() {
                map.insert(name.to_string(), value_to_json(file, key, value)?);
            }
            Json::Object(map)
        }
    })
}

fn looks_like_reference(map: &Map<String, Json>) -> bool {
    map.contains_key(REF_KEY) && map.keys().all(|k| k == REF_KEY || k == FIELD_KEY)
}

fn as_reference(file: &Path, key: &str, json: &Json) -> Result<Option<Reference>> {
    let Json::Object(map) = json else {
        return Ok(None);
    };
    if !looks_like_reference(map) {
        return Ok(None);
    }
    let Some(target) = map.get(REF_KEY) else {
        return Ok(None);
    };

    let invalid = |reason: String| Error::InvalidReference {
        path: file.to_path_buf(),
        key: key.to_string(),
        reason,
    };
    let Json::String(target) = target else {
        return Err(invalid("'ref' must be a string".to_string()));
    };
    let path = SectionPath::parse(target).map_err(|e| invalid(e.to_string()))?;
    match map.get(FIELD_KEY) {
        None => Ok(Some(Reference::to(path))),
        Some(Json::String(field)) if !field.is_empty() => {
            Ok(Some(Reference::field(path, field.clone())))
        }
        Some(_) => Err(invalid("'field' must be a non-empty string".to_string())),
    }
}

fn json_to_toml(key: &str, json: &Json) -> Result<Value> {
    let unrepresentable = |reason: &str| Error::Unrepresentable {
        key: key.to_string(),
        reason: reason.to_string(),
    };
    match json {
        Json::Null => Err(unrepresentable("null inside a list or map")),
        Json::Bool(b) => Ok(Value::from(*b)),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::from(i))
            } else if n.is_u64() {
                Err(unrepresentable("integer exceeds the TOML range"))
            } else {
                n.as_f64()
                    .map(Value::from)
                    .ok_or_else(|| unrepresentable("not a finite number"))
            }
        }
        Json::String(s) => Ok(Value::from(s.as_str())),
        Json::Array(items) => {
            let mut array = Array::new();
            for item in items {
                array.push(json_to_toml(key, item)?);
            }
            Ok(Value::Array(array))
        }
        Json::Object(map) => {
            let mut table = InlineTable::new();
            for (k, v) in map {
                table.insert(k.as_str(), json_to_toml(key, v)?);
            }
            Ok(Value::InlineTable(table))
        }
    }
}
