//! Layered resolution and the update, refresh and reset protocols
//!
//! The effective configuration of a leaf `a.b.c` is merged key by key from,
//! in order:
//!
//! 1. the leaf's defaults (schema defaults overlaid by the config store)
//! 2. the layers of `a` and `a.b`, outermost first
//! 3. the persisted and transient updates applied to the leaf
//! 4. the session-local layers of the root, `a`, `a.b` and `a.b.c`
//!
//! For a section path the section's own layer is the last entry of step 2.

use std::collections::{BTreeMap, BTreeSet};

use crate::context::Frame;
use crate::error::{Error, Result};
use crate::layer::{Change, Config, ConfigLayer, ConfigValue, TypeHint, diff, merge_into};
use crate::path::SectionPath;
use crate::registry::{Node, NodeKind};

use super::Engine;

/// Result of [`Engine::update`] and [`Engine::update_local`].
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    /// Effective configuration after the update.
    pub config: Config,
    /// Whether anything was applied.
    pub changed: bool,
}

/// Result of [`Engine::refresh`].
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshOutcome {
    pub config: Config,
    pub changed: bool,
    /// Keys whose effective value moved, empty when nothing changed.
    pub diff: Vec<Change>,
}

impl Engine {
    /// The effective configuration of `path`.
    ///
    /// Loads any layer on the way that is not loaded yet.
    ///
    /// # Errors
    ///
    /// `Error::NotLoaded` before [`Engine::load`], the lookup errors of the
    /// registry for unknown paths, and `Error::DependencyCycle` when loading a
    /// layer requires that same layer through field references.
    pub fn resolve(&self, path: &SectionPath) -> Result<Config> {
        self.require_loaded()?;
        let kind = self.kind(path)?;

        let mut merged = Config::new();
        let sections: Vec<SectionPath> = match kind {
            NodeKind::Leaf => {
                self.ensure_layer(path)?;
                if let Some(layer) = self.layers.borrow().get(path) {
                    merge_into(&mut merged, layer.defaults());
                }
                path.parent().map(|p| p.prefixes().collect()).unwrap_or_default()
            }
            NodeKind::Section => path.prefixes().collect(),
        };
        for section in &sections {
            self.ensure_layer(section)?;
            if let Some(layer) = self.layers.borrow().get(section) {
                merge_into(&mut merged, &layer.values());
            }
        }
        if kind == NodeKind::Leaf {
            if let Some(layer) = self.layers.borrow().get(path) {
                merge_into(&mut merged, &layer.overrides());
            }
        }

        let scopes = std::iter::once(SectionPath::root()).chain(path.prefixes());
        for scope in scopes {
            let raw = self.local.borrow().get(&scope).cloned();
            if let Some(raw) = raw {
                let values = self.materialize_values(path, &raw)?;
                merge_into(&mut merged, &values);
            }
        }
        Ok(merged)
    }

    /// Effective values of the node's own layer alone.
    pub fn layer_values(&self, path: &SectionPath) -> Result<Config> {
        self.require_loaded()?;
        self.kind(path)?;
        self.ensure_layer(path)?;
        Ok(self
            .layers
            .borrow()
            .get(path)
            .map(ConfigLayer::values)
            .unwrap_or_default())
    }

    /// The persisted-updates record of `path`, oldest first.
    pub fn persisted_updates(&self, path: &SectionPath) -> Vec<Config> {
        if let Some(layer) = self.layers.borrow().get(path) {
            return layer.persisted().to_vec();
        }
        self.carried.borrow().get(path).cloned().unwrap_or_default()
    }

    /// Apply `changes` to the own layer of `path`.
    ///
    /// Keys whose value equals the current effective value are dropped first.
    /// When nothing is left the call reports `changed: false` and has no
    /// other effect. Otherwise the changes are applied (and recorded for
    /// replay when `persist` is set), materialized items below `path` are
    /// live-updated and forced dependents are refreshed.
    ///
    /// The root path addresses the session-local layer.
    ///
    /// # Errors
    ///
    /// Propagation failures surface here. Changes applied before the failure
    /// stay applied.
    pub fn update(
        &self,
        path: &SectionPath,
        changes: Config,
        persist: bool,
    ) -> Result<UpdateOutcome> {
        if path.is_root() {
            return self.update_local(path, changes);
        }
        let current = self.resolve(path)?;
        let written: Config = {
            let layers = self.layers.borrow();
            let layer = layers.get(path);
            changes
                .keys()
                .filter_map(|key| {
                    let value = layer.and_then(|layer| layer.written(key))?;
                    Some((key.clone(), value.clone()))
                })
                .collect()
        };
        let effective = effective_changes(&current, &written, changes);
        if effective.is_empty() {
            tracing::debug!(path = %path, "update suppressed, nothing changes");
            return Ok(UpdateOutcome {
                config: current,
                changed: false,
            });
        }

        let values = self.materialize_values(path, &effective)?;
        self.validate(path, &values)?;
        self.ensure_layer(path)?;
        if let Some(layer) = self.layers.borrow_mut().get_mut(path) {
            layer.apply(values, effective.clone(), persist);
        }
        tracing::info!(path = %path, persist, keys = ?effective.keys().collect::<Vec<_>>(), "update applied");

        self.after_change(path)?;
        Ok(UpdateOutcome {
            config: self.resolve(path)?,
            changed: true,
        })
    }

    /// Overlay `changes` on the session-local layer of `path`.
    ///
    /// The local layer of a section applies to every descendant; the local
    /// layer of the root applies everywhere.
    pub fn update_local(&self, path: &SectionPath, changes: Config) -> Result<UpdateOutcome> {
        let current = self.resolve(path)?;
        let written = self.local.borrow().get(path).cloned().unwrap_or_default();
        let effective = effective_changes(&current, &written, changes);
        if effective.is_empty() {
            tracing::debug!(path = %path, "local update suppressed, nothing changes");
            return Ok(UpdateOutcome {
                config: current,
                changed: false,
            });
        }
        let values = self.materialize_values(path, &effective)?;
        self.validate(path, &values)?;

        let mut next = self.local.borrow().get(path).cloned().unwrap_or_default();
        merge_into(&mut next, &effective);
        let changed = self.set_local(path, Some(next))?;
        Ok(UpdateOutcome {
            config: self.resolve(path)?,
            changed,
        })
    }

    /// Drop the session-local layer of `path`.
    pub fn clear_local(&self, path: &SectionPath) -> Result<UpdateOutcome> {
        self.require_loaded()?;
        let changed = self.set_local(path, None)?;
        Ok(UpdateOutcome {
            config: self.resolve(path)?,
            changed,
        })
    }

    /// Replace the local layer of `path`, live-updating and propagating when
    /// the effective configuration moved.
    pub(crate) fn set_local(&self, path: &SectionPath, local: Option<Config>) -> Result<bool> {
        let before = self.resolve(path)?;
        let previous = {
            let mut layers = self.local.borrow_mut();
            match local {
                Some(config) if !config.is_empty() => layers.insert(path.clone(), config),
                _ => layers.remove(path),
            }
        };
        let after = match self.resolve(path) {
            Ok(after) => after,
            Err(err) => {
                self.restore_local(path, previous);
                return Err(err);
            }
        };
        if before == after {
            return Ok(false);
        }
        tracing::debug!(path = %path, changes = ?diff(&before, &after), "local layer changed");
        self.after_change(path)?;
        Ok(true)
    }

    fn restore_local(&self, path: &SectionPath, previous: Option<Config>) {
        let mut layers = self.local.borrow_mut();
        match previous {
            Some(config) => layers.insert(path.clone(), config),
            None => layers.remove(path),
        };
    }

    /// Reload the own layer of `path` from the store and replay its
    /// persisted updates.
    ///
    /// Transient updates are dropped. When the effective configuration moved,
    /// the change is applied like an update; otherwise nothing happens.
    pub fn refresh(&self, path: &SectionPath) -> Result<RefreshOutcome> {
        let outcome = self.refresh_node(path)?;
        if outcome.changed {
            tracing::info!(path = %path, changes = outcome.diff.len(), "refresh changed configuration");
            self.after_change(path)?;
        }
        Ok(outcome)
    }

    /// Refresh without live updates or propagation.
    pub(crate) fn refresh_node(&self, path: &SectionPath) -> Result<RefreshOutcome> {
        let before = self.resolve(path)?;
        if path.is_root() {
            return Ok(RefreshOutcome {
                config: before,
                changed: false,
                diff: Vec::new(),
            });
        }

        let previous = self.layers.borrow_mut().remove(path);
        let replay = previous
            .as_ref()
            .map(|layer| layer.persisted().to_vec())
            .unwrap_or_default();
        let reloaded = self
            .load_layer(path, replay)
            .map(|layer| {
                self.layers.borrow_mut().insert(path.clone(), layer);
            })
            .and_then(|()| self.resolve(path));
        let after = match reloaded {
            Ok(after) => after,
            Err(err) => {
                if let Some(layer) = previous {
                    self.layers.borrow_mut().insert(path.clone(), layer);
                }
                return Err(err);
            }
        };

        let changes = diff(&before, &after);
        if changes.is_empty() {
            if let Some(layer) = previous {
                self.layers.borrow_mut().insert(path.clone(), layer);
            }
            tracing::debug!(path = %path, "refresh found no change");
        }
        Ok(RefreshOutcome {
            config: after,
            changed: !changes.is_empty(),
            diff: changes,
        })
    }

    /// Discard persisted updates and the local layer of `path`, reverting to
    /// the store-backed defaults.
    ///
    /// With `allow_create`, a missing `path` is created as an empty section
    /// instead of failing.
    pub fn reset(&self, path: &SectionPath, allow_create: bool) -> Result<Config> {
        self.require_loaded()?;
        if !self.contains(path) {
            if !allow_create {
                self.kind(path)?;
            }
            self.create_section(path)?;
        }

        let before = self.resolve(path)?;
        self.layers.borrow_mut().remove(path);
        self.carried.borrow_mut().remove(path);
        self.local.borrow_mut().remove(path);
        let after = self.resolve(path)?;
        tracing::info!(path = %path, "reset to defaults");

        if before != after {
            self.after_change(path)?;
        }
        Ok(after)
    }

    /// Write the own layer of `path` through the config store.
    ///
    /// Only defaults and persisted updates are written; references are kept
    /// as references.
    pub fn save(&self, path: &SectionPath) -> Result<()> {
        if path.is_root() {
            return Err(Error::InvalidPath {
                path: path.to_string(),
                reason: "the registry root has no layer to save".to_string(),
            });
        }
        self.require_loaded()?;
        self.kind(path)?;
        self.ensure_layer(path)?;
        let config = self
            .layers
            .borrow()
            .get(path)
            .map(ConfigLayer::persistable)
            .unwrap_or_default();
        self.store.save(path, &config)?;
        tracing::debug!(path = %path, keys = config.len(), "saved layer");
        Ok(())
    }

    /// Load the own layer of `path` unless it is loaded already.
    fn ensure_layer(&self, path: &SectionPath) -> Result<()> {
        if self.layers.borrow().contains_key(path) {
            return Ok(());
        }
        let replay = self.carried.borrow_mut().remove(path).unwrap_or_default();
        match self.load_layer(path, replay.clone()) {
            Ok(layer) => {
                self.layers.borrow_mut().insert(path.clone(), layer);
                Ok(())
            }
            Err(err) => {
                if !replay.is_empty() {
                    self.carried.borrow_mut().insert(path.clone(), replay);
                }
                Err(err)
            }
        }
    }

    /// Build a fresh layer for `path` from its declared defaults and the
    /// store, then replay `records` on top.
    fn load_layer(&self, path: &SectionPath, records: Vec<Config>) -> Result<ConfigLayer> {
        self.check_not_loading(path)?;

        let (base, declared_hints) = self.node_base(path)?;
        let stored = self.store.load(path)?;
        tracing::debug!(path = %path, stored = stored.values.len(), "loading layer");

        let _frame = self.enter(Frame::LoadingConfig(path.clone()));
        let mut raw = base;
        merge_into(&mut raw, &stored.values);
        let defaults = self.deref_fields(path, &Config::new(), &raw)?;

        let file_keys: BTreeSet<String> = stored.values.keys().cloned().collect();
        let mut hints = stored.type_hints;
        hints.extend(declared_hints);

        let mut layer = ConfigLayer::new(defaults, raw, file_keys, hints);
        for record in records {
            let values = self.deref_fields(path, &layer.values(), &record)?;
            layer.replay(record, values);
        }
        Ok(layer)
    }

    /// Declared defaults and hints of the node at `path`.
    fn node_base(&self, path: &SectionPath) -> Result<(Config, BTreeMap<String, TypeHint>)> {
        let section = self.with_registry(|registry| match registry.node(path)? {
            Node::Section(section) => Ok(Some(section.config().clone())),
            Node::Leaf(_) | Node::Declared => Ok(None),
        })?;
        match section {
            Some(config) => Ok((config, BTreeMap::new())),
            None => {
                let leaf = self.leaf(path)?;
                Ok((leaf.schema().defaults(), leaf.schema().hints()))
            }
        }
    }

    /// Dereference the field references in `raw` on behalf of `path`.
    pub(crate) fn materialize_values(&self, path: &SectionPath, raw: &Config) -> Result<Config> {
        if !has_field_refs(raw) {
            return Ok(raw.clone());
        }
        self.check_not_loading(path)?;
        let own = self
            .layers
            .borrow()
            .get(path)
            .map(ConfigLayer::values)
            .unwrap_or_default();
        let _frame = self.enter(Frame::LoadingConfig(path.clone()));
        self.deref_fields(path, &own, raw)
    }

    /// Check `changes` for `path` the way an update would, without applying
    /// them.
    pub(crate) fn check_changes(&self, path: &SectionPath, changes: &Config) -> Result<()> {
        self.resolve(path)?;
        let values = self.materialize_values(path, changes)?;
        self.validate(path, &values)
    }

    /// Fail when the configuration of `path` is already loading further down
    /// the stack.
    fn check_not_loading(&self, path: &SectionPath) -> Result<()> {
        let context = self.context.borrow();
        if !context.is_loading(path) {
            return Ok(());
        }
        let mut participants = context.loading_chain();
        participants.sort();
        participants.dedup();
        Err(Error::DependencyCycle {
            target: path.clone(),
            participants,
        })
    }

    /// Replace field references in `raw`, written for `owner`, by the
    /// referenced values. Expects the loading frame to be on the stack
    /// already.
    ///
    /// References to `owner` itself read the keys of `raw` first and then
    /// the already materialized `own` values, so they record no edge.
    fn deref_fields(&self, owner: &SectionPath, own: &Config, raw: &Config) -> Result<Config> {
        raw.iter()
            .map(|(key, value)| {
                let value = match value {
                    ConfigValue::Reference(reference) => match reference.field_name() {
                        Some(field) if reference.path() == owner => {
                            self.own_field(owner, own, raw, field)?
                        }
                        Some(_) => reference.value(self)?,
                        None => value.clone(),
                    },
                    other => other.clone(),
                };
                Ok((key.clone(), value))
            })
            .collect()
    }

    fn own_field(
        &self,
        owner: &SectionPath,
        own: &Config,
        raw: &Config,
        field: &str,
    ) -> Result<ConfigValue> {
        let mut key = field.to_string();
        let mut seen = BTreeSet::new();
        loop {
            if !seen.insert(key.clone()) {
                return Err(Error::DependencyCycle {
                    target: owner.clone(),
                    participants: vec![owner.clone()],
                });
            }
            let Some(value) = raw.get(&key) else {
                return own.get(&key).cloned().ok_or_else(|| Error::MissingKey {
                    path: owner.clone(),
                    key,
                });
            };
            match value {
                ConfigValue::Reference(reference) => match reference.field_name() {
                    Some(next) if reference.path() == owner => key = next.to_string(),
                    Some(_) => return reference.value(self),
                    None => return Ok(value.clone()),
                },
                other => return Ok(other.clone()),
            }
        }
    }

    /// Check materialized `values` against the type hints of every layer on
    /// the path, innermost hint first.
    fn validate(&self, path: &SectionPath, values: &Config) -> Result<()> {
        if !self.options.validate_types {
            return Ok(());
        }
        let layers = self.layers.borrow();
        let scopes: Vec<SectionPath> = path.prefixes().collect();
        for (key, value) in values {
            let hint = scopes
                .iter()
                .rev()
                .find_map(|scope| layers.get(scope).and_then(|layer| layer.type_hint(key)));
            if let Some(hint) = hint {
                if !hint.accepts(value) {
                    return Err(Error::TypeMismatch {
                        path: path.clone(),
                        key: key.clone(),
                        expected: hint,
                        found: value.kind_name().to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// The subset of `changes` that would change something.
///
/// A field reference is compared with the `written` form of its key, since
/// the effective value holds what it resolved to. A plain value is compared
/// with the effective value, unless it replaces a field reference.
fn effective_changes(current: &Config, written: &Config, changes: Config) -> Config {
    changes
        .into_iter()
        .filter(|(key, value)| {
            if is_field_ref(value) {
                written.get(key) != Some(value)
            } else {
                current.get(key) != Some(value) || written.get(key).is_some_and(is_field_ref)
            }
        })
        .collect()
}

fn is_field_ref(value: &ConfigValue) -> bool {
    matches!(value, ConfigValue::Reference(reference) if reference.is_field())
}

fn has_field_refs(config: &Config) -> bool {
    config.values().any(is_field_ref)
}
