//! Combinatorial runs over change sets
//!
//! Change sets are grouped by target path. Every combination that takes one
//! change set from each group is applied through the session-local layer,
//! the bases are run, and the local layers are put back afterwards.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::Result;
use crate::layer::{Config, merge_into};
use crate::path::SectionPath;

use super::Engine;

/// Changes to apply to one path for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    pub path: SectionPath,
    pub changes: Config,
}

impl ChangeSet {
    pub fn new(path: SectionPath, changes: Config) -> Self {
        Self { path, changes }
    }
}

/// One combination and what running the bases with it returned.
#[derive(Debug, Clone, PartialEq)]
pub struct Iteration {
    /// Effective configuration of every varied path for this run.
    pub inputs: BTreeMap<SectionPath, Config>,
    pub result: Value,
}

impl Engine {
    /// Run `bases` once per combination of `change_sets`.
    ///
    /// Groups keep the order in which their path first appears; within the
    /// product the last group varies fastest. A single base yields its result
    /// directly, several bases yield an array of results in base order.
    ///
    /// Every change set is type-checked before the first run, so a set that
    /// contradicts a type hint fails the call with nothing applied. The local
    /// layers touched here are restored before returning, also when a run
    /// fails.
    pub fn iterate(
        &self,
        bases: &[SectionPath],
        change_sets: impl IntoIterator<Item = ChangeSet>,
    ) -> Result<Vec<Iteration>> {
        self.require_loaded()?;
        let mut groups: Vec<(SectionPath, Vec<Config>)> = Vec::new();
        for set in change_sets {
            match groups.iter_mut().find(|(path, _)| *path == set.path) {
                Some((_, sets)) => sets.push(set.changes),
                None => groups.push((set.path, vec![set.changes])),
            }
        }

        for (path, sets) in &groups {
            for changes in sets {
                self.check_changes(path, changes)?;
            }
        }

        let saved: Vec<(SectionPath, Option<Config>)> = groups
            .iter()
            .map(|(path, _)| (path.clone(), self.local.borrow().get(path).cloned()))
            .collect();
        tracing::debug!(groups = groups.len(), bases = bases.len(), "iterating");

        let result = self.iterate_groups(bases, &groups, &saved);

        let mut restored = Ok(());
        for (path, local) in saved {
            if let Err(err) = self.set_local(&path, local) {
                tracing::warn!(path = %path, error = %err, "failed to restore local layer");
                if restored.is_ok() {
                    restored = Err(err);
                }
            }
        }
        let iterations = result?;
        restored?;
        Ok(iterations)
    }

    fn iterate_groups(
        &self,
        bases: &[SectionPath],
        groups: &[(SectionPath, Vec<Config>)],
        saved: &[(SectionPath, Option<Config>)],
    ) -> Result<Vec<Iteration>> {
        let mut iterations = Vec::new();
        let mut indices = vec![0usize; groups.len()];
        loop {
            for (((path, sets), (_, base)), &choice) in groups.iter().zip(saved).zip(&indices) {
                let mut local = base.clone().unwrap_or_default();
                merge_into(&mut local, &sets[choice]);
                self.set_local(path, Some(local))?;
            }

            let inputs = groups
                .iter()
                .map(|(path, _)| Ok((path.clone(), self.resolve(path)?)))
                .collect::<Result<BTreeMap<_, _>>>()?;
            let result = match bases {
                [single] => self.run(single)?,
                _ => Value::Array(
                    bases
                        .iter()
                        .map(|base| self.run(base))
                        .collect::<Result<Vec<_>>>()?,
                ),
            };
            iterations.push(Iteration { inputs, result });

            if !advance(&mut indices, groups) {
                break;
            }
        }
        Ok(iterations)
    }
}

/// Step the odometer, last position fastest. Returns `false` after the last
/// combination.
fn advance(indices: &mut [usize], groups: &[(SectionPath, Vec<Config>)]) -> bool {
    for position in (0..indices.len()).rev() {
        indices[position] += 1;
        if indices[position] < groups[position].1.len() {
            return true;
        }
        indices[position] = 0;
    }
    false
}
