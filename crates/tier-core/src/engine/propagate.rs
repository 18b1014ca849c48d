//! Forced-update propagation
//!
//! After the effective configuration of a node changed, every materialized
//! item below it is live-updated and every forced dependent of the node (or
//! of anything below it) is refreshed, dependencies first.

use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::path::SectionPath;

use super::Engine;

impl Engine {
    /// Live-update items below `origin`, then refresh its dependents.
    pub(crate) fn after_change(&self, origin: &SectionPath) -> Result<()> {
        self.apply_live_updates(origin)?;
        self.propagate(origin)
    }

    fn propagate(&self, origin: &SectionPath) -> Result<()> {
        let mut targets: BTreeSet<SectionPath> = BTreeSet::new();
        targets.insert(origin.clone());
        let below = self.with_registry(|registry| registry.descendants(origin))?;
        targets.extend(below);
        self.refresh_dependents(origin, &targets).map(|_| ())
    }

    /// Refresh every forced dependent of `targets`, transitively.
    ///
    /// Each round orders the reachable forced dependents so a node is
    /// refreshed after everything it depends on, refreshes the ones not
    /// visited yet and live-updates what is materialized below them.
    /// Refreshing may record new edges; the next round picks those up.
    /// Every round visits at least one new path, so the loop ends once the
    /// reachable dependents are exhausted.
    ///
    /// Returns the refreshed paths in refresh order.
    ///
    /// # Errors
    ///
    /// - `Error::DependencyCycle` when the reachable dependents form a cycle
    /// - `Error::PropagationStalled` when the round limit is exceeded
    ///
    /// Refreshes completed before the error are not rolled back.
    pub fn refresh_dependents(
        &self,
        origin: &SectionPath,
        targets: &BTreeSet<SectionPath>,
    ) -> Result<Vec<SectionPath>> {
        let mut visited: BTreeSet<SectionPath> = BTreeSet::new();
        let mut refreshed = Vec::new();
        let mut round = 0;

        loop {
            let order = self.graph.borrow().propagation_order(origin, targets)?;
            let pending: Vec<SectionPath> = order
                .into_iter()
                .filter(|path| !visited.contains(path))
                .collect();
            if pending.is_empty() {
                break;
            }

            round += 1;
            if round > self.options.max_propagation_rounds {
                tracing::warn!(origin = %origin, round, "propagation stalled");
                return Err(Error::PropagationStalled {
                    target: origin.clone(),
                    pending,
                });
            }
            tracing::debug!(origin = %origin, round, pending = ?pending, "propagation round");

            for dependent in &pending {
                visited.insert(dependent.clone());
                if !self.contains(dependent) {
                    tracing::debug!(path = %dependent, "skipping dependent that is no longer registered");
                    continue;
                }
                let outcome = self.refresh_node(dependent)?;
                if outcome.changed {
                    tracing::debug!(path = %dependent, changes = outcome.diff.len(), "dependent refreshed");
                }
                self.apply_live_updates(dependent)?;
                refreshed.push(dependent.clone());
            }
        }
        Ok(refreshed)
    }
}
