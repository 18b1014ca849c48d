//! Dependency graph between registry paths
//!
//! Edges point from a *target* to its *dependents*: if item `A`'s effective
//! state depends on item `B`, then `A` is a dependent of `B`. A subset of
//! edges is flagged *forced*; only forced edges drive propagation when a
//! target changes.
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeSet;
//! use tier_core::{DependencyGraph, SectionPath};
//!
//! let a = SectionPath::parse("jobs.a").unwrap();
//! let b = SectionPath::parse("jobs.b").unwrap();
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_edge(&a, &b, true);
//! graph.add_edge(&a, &a, true); // self-edges are dropped
//!
//! assert_eq!(graph.edge_count(), 1);
//! let order = graph.propagation_order(&b, &BTreeSet::from([b.clone()])).unwrap();
//! assert_eq!(order, vec![a]);
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::error::{Error, Result};
use crate::path::SectionPath;

/// Directed dependency edges, with a forced subset.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// target -> every dependent
    dependents: HashMap<SectionPath, HashSet<SectionPath>>,
    /// target -> forced dependents only
    forced: HashMap<SectionPath, HashSet<SectionPath>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `dependent` depends on `target`.
    ///
    /// Self-edges are ignored. Recording an existing edge as forced upgrades
    /// it; a forced edge is never downgraded. Returns whether anything changed.
    pub fn add_edge(&mut self, dependent: &SectionPath, target: &SectionPath, forced: bool) -> bool {
        if dependent == target {
            return false;
        }
        let mut changed = self
            .dependents
            .entry(target.clone())
            .or_default()
            .insert(dependent.clone());
        if forced {
            changed |= self
                .forced
                .entry(target.clone())
                .or_default()
                .insert(dependent.clone());
        }
        changed
    }

    /// Direct dependents of `target`, sorted.
    pub fn dependents_of(&self, target: &SectionPath, forced_only: bool) -> BTreeSet<SectionPath> {
        let map = if forced_only { &self.forced } else { &self.dependents };
        map.get(target)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `dependent -> target` exists (optionally as a forced edge).
    pub fn has_edge(&self, dependent: &SectionPath, target: &SectionPath, forced_only: bool) -> bool {
        let map = if forced_only { &self.forced } else { &self.dependents };
        map.get(target).is_some_and(|deps| deps.contains(dependent))
    }

    pub fn edge_count(&self) -> usize {
        self.dependents.values().map(HashSet::len).sum()
    }

    pub fn forced_edge_count(&self) -> usize {
        self.forced.values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.edge_count() == 0
    }

    /// Drop every edge.
    pub fn clear(&mut self) {
        self.dependents.clear();
        self.forced.clear();
    }

    /// Order in which forced dependents of `targets` must be refreshed.
    ///
    /// Collects every node reachable from `targets` through forced edges and
    /// sorts that subgraph with Kahn's algorithm, so a node comes after every
    /// node it depends on. Only nodes with at least one incoming edge inside
    /// the subgraph are returned; pure targets are not.
    ///
    /// # Errors
    ///
    /// Returns `Error::DependencyCycle` (reported against `origin`) if the
    /// reachable subgraph contains a cycle, including one that leads back to
    /// a target.
    pub fn propagation_order(
        &self,
        origin: &SectionPath,
        targets: &BTreeSet<SectionPath>,
    ) -> Result<Vec<SectionPath>> {
        let mut nodes: BTreeSet<SectionPath> = targets.clone();
        let mut stack: Vec<&SectionPath> = targets.iter().collect();
        while let Some(current) = stack.pop() {
            if let Some(deps) = self.forced.get(current) {
                for dep in deps {
                    if nodes.insert(dep.clone()) {
                        stack.push(dep);
                    }
                }
            }
        }

        // In-degree: number of targets inside the subgraph each node depends on
        let mut in_degree: BTreeMap<&SectionPath, usize> = nodes.iter().map(|n| (n, 0)).collect();
        for target in &nodes {
            if let Some(deps) = self.forced.get(target) {
                for dep in deps {
                    if let Some(deg) = in_degree.get_mut(dep) {
                        *deg += 1;
                    }
                }
            }
        }
        let has_incoming: BTreeSet<&SectionPath> = in_degree
            .iter()
            .filter(|&(_, &deg)| deg > 0)
            .map(|(&node, _)| node)
            .collect();

        // Seed with zero in-degree nodes; BTreeSet keeps the order deterministic
        let mut ready: BTreeSet<&SectionPath> = in_degree
            .iter()
            .filter(|&(_, &deg)| deg == 0)
            .map(|(&node, _)| node)
            .collect();

        let mut sorted: Vec<&SectionPath> = Vec::with_capacity(nodes.len());
        while let Some(current) = ready.pop_first() {
            sorted.push(current);
            if let Some(deps) = self.forced.get(current) {
                for dep in deps {
                    if let Some(deg) = in_degree.get_mut(dep) {
                        *deg = deg.saturating_sub(1);
                        if *deg == 0 {
                            ready.insert(dep);
                        }
                    }
                }
            }
        }

        if sorted.len() != nodes.len() {
            let sorted_set: HashSet<&SectionPath> = sorted.iter().copied().collect();
            let participants = nodes
                .iter()
                .filter(|n| !sorted_set.contains(n))
                .cloned()
                .collect();
            return Err(Error::DependencyCycle {
                target: origin.clone(),
                participants,
            });
        }

        Ok(sorted
            .into_iter()
            .filter(|n| has_incoming.contains(n))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn p(s: &str) -> SectionPath {
        SectionPath::parse(s).unwrap()
    }

    fn set(paths: &[&str]) -> BTreeSet<SectionPath> {
        paths.iter().map(|s| p(s)).collect()
    }

    #[test]
    fn empty_graph() {
        let graph = DependencyGraph::new();
        assert!(graph.is_empty());
        assert!(graph.dependents_of(&p("a"), false).is_empty());
        assert!(graph.propagation_order(&p("a"), &set(&["a"])).unwrap().is_empty());
    }

    #[test]
    fn self_edges_are_dropped() {
        let mut graph = DependencyGraph::new();
        assert!(!graph.add_edge(&p("a"), &p("a"), true));
        assert!(graph.is_empty());
    }

    #[test]
    fn edges_are_set_based() {
        let mut graph = DependencyGraph::new();
        assert!(graph.add_edge(&p("a"), &p("b"), true));
        assert!(!graph.add_edge(&p("a"), &p("b"), true));
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn forced_subset_is_tracked_separately() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&p("a"), &p("t"), false);
        graph.add_edge(&p("b"), &p("t"), true);

        assert_eq!(graph.dependents_of(&p("t"), false), set(&["a", "b"]));
        assert_eq!(graph.dependents_of(&p("t"), true), set(&["b"]));

        // Upgrading to forced reports a change, downgrading does not
        assert!(graph.add_edge(&p("a"), &p("t"), true));
        assert!(!graph.add_edge(&p("a"), &p("t"), false));
        assert!(graph.has_edge(&p("a"), &p("t"), true));
    }

    #[test]
    fn linear_chain_is_dependency_first() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&p("b"), &p("a"), true);
        graph.add_edge(&p("c"), &p("b"), true);

        let order = graph.propagation_order(&p("a"), &set(&["a"])).unwrap();
        assert_eq!(order, vec![p("b"), p("c")]);
    }

    #[test]
    fn diamond_visits_each_node_once() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&p("l"), &p("root"), true);
        graph.add_edge(&p("r"), &p("root"), true);
        graph.add_edge(&p("top"), &p("l"), true);
        graph.add_edge(&p("top"), &p("r"), true);

        let order = graph.propagation_order(&p("root"), &set(&["root"])).unwrap();
        assert_eq!(order.len(), 3);
        assert_eq!(order.last(), Some(&p("top")));
    }

    #[test]
    fn non_forced_edges_do_not_propagate() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&p("b"), &p("a"), false);
        assert!(graph.propagation_order(&p("a"), &set(&["a"])).unwrap().is_empty());
    }

    #[test]
    fn cycle_back_to_target_is_detected() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&p("a"), &p("b"), true);
        graph.add_edge(&p("b"), &p("a"), true);

        let err = graph.propagation_order(&p("a"), &set(&["a"])).unwrap_err();
        match err {
            Error::DependencyCycle { target, participants } => {
                assert_eq!(target, p("a"));
                assert_eq!(participants, vec![p("a"), p("b")]);
            }
            other => panic!("expected DependencyCycle, got {other:?}"),
        }
    }

    #[test]
    fn target_depending_on_another_target_is_ordered() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&p("s.x"), &p("s.y"), true);

        let order = graph
            .propagation_order(&p("s"), &set(&["s", "s.x", "s.y"]))
            .unwrap();
        assert_eq!(order, vec![p("s.x")]);
    }

    #[test]
    fn clear_drops_everything() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&p("a"), &p("b"), true);
        graph.clear();
        assert!(graph.is_empty());
        assert_eq!(graph.forced_edge_count(), 0);
    }
}
