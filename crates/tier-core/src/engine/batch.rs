//! Multi-item updates
//!
//! A batch applies each entry through [`Engine::update`] in order. It is not
//! transactional: entries applied before a failure stay applied, in either
//! mode.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::layer::Config;
use crate::path::SectionPath;

use super::Engine;

/// What a batch does after a failed entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchMode {
    /// Keep applying the remaining entries.
    #[default]
    BestEffort,
    /// Skip every entry after the first failure.
    StopOnError,
}

/// One `{path, changes}` pair of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    pub path: SectionPath,
    pub changes: Config,
    pub persist: bool,
}

impl BatchEntry {
    /// A persisted update of `path`.
    pub fn new(path: SectionPath, changes: Config) -> Self {
        Self {
            path,
            changes,
            persist: true,
        }
    }

    pub fn transient(mut self) -> Self {
        self.persist = false;
        self
    }
}

/// Per-entry outcome of a batch, in entry order within each list.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub changed: Vec<SectionPath>,
    pub unchanged: Vec<SectionPath>,
    pub failed: Vec<(SectionPath, Error)>,
    /// Entries not attempted because an earlier one failed.
    pub skipped: Vec<SectionPath>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

impl Engine {
    /// Apply `entries` in the mode configured in the engine options.
    pub fn batch_update(&self, entries: impl IntoIterator<Item = BatchEntry>) -> BatchReport {
        self.batch_update_with(entries, self.options.batch_mode)
    }

    /// Apply `entries` in order with an explicit `mode`.
    pub fn batch_update_with(
        &self,
        entries: impl IntoIterator<Item = BatchEntry>,
        mode: BatchMode,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        for entry in entries {
            if mode == BatchMode::StopOnError && !report.failed.is_empty() {
                report.skipped.push(entry.path);
                continue;
            }
            match self.update(&entry.path, entry.changes, entry.persist) {
                Ok(outcome) if outcome.changed => report.changed.push(entry.path),
                Ok(_) => report.unchanged.push(entry.path),
                Err(err) => {
                    tracing::warn!(path = %entry.path, error = %err, "batch entry failed");
                    report.failed.push((entry.path, err));
                }
            }
        }
        tracing::info!(
            changed = report.changed.len(),
            unchanged = report.unchanged.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "batch update finished"
        );
        report
    }
}
