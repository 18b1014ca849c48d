//! One TOML file per registry path

use std::path::{Path, PathBuf};

use tier_core::{Config, ConfigStore, Defaults, SectionPath};
use toml_edit::{DocumentMut, Item, Value};

use crate::{Error, Result, convert, io};

/// Config store keeping `a.b.c` in `<root>/a/b/c.toml`.
///
/// Loading infers type hints from the stored values. Saving edits the
/// existing document: keys missing from the saved configuration stay as
/// they are, and a key is rewritten only when its value differs, keeping
/// its comments. A save that changes nothing does not touch the file.
///
/// # Example
///
/// ```rust,no_run
/// use tier_core::{ConfigStore, SectionPath};
/// use tier_fs::TomlStore;
///
/// let store = TomlStore::new("config");
/// let path = SectionPath::parse("models.encoder").unwrap();
/// assert!(store.file_for(&path).unwrap().ends_with("models/encoder.toml"));
/// let defaults = store.load(&path).unwrap();
/// # drop(defaults);
/// ```
#[derive(Debug, Clone)]
pub struct TomlStore {
    root: PathBuf,
}

impl TomlStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The file backing `path`.
    pub fn file_for(&self, path: &SectionPath) -> Result<PathBuf> {
        let mut segments: Vec<&str> = path.segments().collect();
        let Some(last) = segments.pop() else {
            return Err(Error::RootPath);
        };
        let mut file = self.root.clone();
        file.extend(segments);
        file.push(format!("{last}.toml"));
        Ok(file)
    }

    /// Stored values of `path` with inferred type hints.
    pub fn read(&self, path: &SectionPath) -> Result<Defaults> {
        let file = self.file_for(path)?;
        let Some(source) = io::read_optional(&file)? else {
            tracing::debug!(path = %path, file = %file.display(), "no config file");
            return Ok(Defaults::default());
        };
        let doc = parse(&file, &source)?;

        let mut values = Config::new();
        for (key, item) in doc.iter() {
            if let Some(value) = convert::read_item(&file, key, item)? {
                values.insert(key.to_string(), value);
            }
        }
        tracing::debug!(path = %path, keys = values.len(), "config file loaded");
        Ok(Defaults::inferred(values))
    }

    /// Merge `config` into the file of `path`. Returns whether the file
    /// changed.
    pub fn write(&self, path: &SectionPath, config: &Config) -> Result<bool> {
        let file = self.file_for(path)?;
        let source = io::read_optional(&file)?;
        let mut doc = match &source {
            Some(source) => parse(&file, source)?,
            None => DocumentMut::new(),
        };

        let mut dirty = false;
        for (key, value) in config {
            let current = match doc.get(key) {
                Some(item) => convert::read_item(&file, key, item)?,
                None => None,
            };
            if current.as_ref() == Some(value) {
                continue;
            }
            match convert::to_toml(key, value)? {
                Some(new) => {
                    replace_value(&mut doc, key, new);
                    dirty = true;
                }
                None => dirty |= doc.remove(key).is_some(),
            }
        }

        if !dirty {
            tracing::debug!(path = %path, "config file unchanged");
            return Ok(false);
        }
        let rendered = doc.to_string();
        if source.as_deref() == Some(rendered.as_str()) {
            return Ok(false);
        }
        io::write_atomic(&file, rendered.as_bytes())?;
        tracing::info!(path = %path, file = %file.display(), "config file written");
        Ok(true)
    }
}

impl ConfigStore for TomlStore {
    fn load(&self, path: &SectionPath) -> tier_core::Result<Defaults> {
        if path.is_root() {
            return Ok(Defaults::default());
        }
        self.read(path).map_err(|e| e.into_store_error(path))
    }

    fn save(&self, path: &SectionPath, config: &Config) -> tier_core::Result<()> {
        self.write(path, config)
            .map(|_| ())
            .map_err(|e| e.into_store_error(path))
    }
}

fn parse(file: &Path, source: &str) -> Result<DocumentMut> {
    source
        .parse::<DocumentMut>()
        .map_err(|e| Error::ConfigParse {
            path: file.to_path_buf(),
            message: e.to_string(),
        })
}

/// Put `value` under `key`, keeping the decoration (spacing and trailing
/// comment) of the value it replaces.
fn replace_value(doc: &mut DocumentMut, key: &str, mut value: Value) {
    if let Some(Item::Value(slot)) = doc.get_mut(key) {
        *value.decor_mut() = slot.decor().clone();
        *slot = value;
        return;
    }
    doc.insert(key, Item::Value(value));
}
