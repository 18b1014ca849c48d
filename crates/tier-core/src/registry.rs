//! Item registry: a tree of sections and leaves addressed by [`SectionPath`]
//!
//! The registry is built from a declarative nested [`Section`] definition and
//! afterwards only grows through explicit inserts, which create any missing
//! intermediate sections.
//!
//! ```
//! use serde_json::{Value, json};
//! use tier_core::{Leaf, Registry, Section, SectionPath, config};
//!
//! let definition = Section::new()
//!     .section(
//!         "models",
//!         Section::new()
//!             .with_config(config([("seed", json!(7))]))
//!             .leaf("encoder", Leaf::function(|_, _| Ok(Value::Null))),
//!     );
//! let registry = Registry::new(definition);
//! assert!(registry.node(&SectionPath::parse("models.encoder").unwrap()).is_ok());
//! ```

use std::fmt;

use crate::error::{Error, Result};
use crate::item::Leaf;
use crate::layer::Config;
use crate::path::SectionPath;

/// A node of the registry tree.
#[derive(Debug, Clone)]
pub enum Node {
    Section(Section),
    Leaf(Leaf),
    /// A leaf declared by name only; the item loader supplies it on first use.
    Declared,
}

/// Whether a path names a section or a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Section,
    Leaf,
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Section(_) => NodeKind::Section,
            Self::Leaf(_) | Self::Declared => NodeKind::Leaf,
        }
    }
}

/// Internal node: named children plus its own inline configuration.
#[derive(Debug, Clone, Default)]
pub struct Section {
    config: Config,
    children: Vec<(String, Node)>,
}

impl Section {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inline configuration applying to every descendant. Values the config
    /// store returns for this section are layered on top.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn section(mut self, name: impl Into<String>, section: Section) -> Self {
        self.put(name.into(), Node::Section(section));
        self
    }

    pub fn leaf(mut self, name: impl Into<String>, leaf: Leaf) -> Self {
        self.put(name.into(), Node::Leaf(leaf));
        self
    }

    /// Declare a leaf whose definition comes from the item loader.
    pub fn declare(mut self, name: impl Into<String>) -> Self {
        self.put(name.into(), Node::Declared);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Children in declaration order.
    pub fn children(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.children.iter().map(|(name, node)| (name.as_str(), node))
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|(n, _)| n == name).map(|(_, node)| node)
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.children
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, node)| node)
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Whether any child is a section.
    pub fn has_subsections(&self) -> bool {
        self.children
            .iter()
            .any(|(_, node)| node.kind() == NodeKind::Section)
    }

    /// Insert or replace a child, keeping the original position on replace.
    fn put(&mut self, name: String, node: Node) {
        match self.child_mut(&name) {
            Some(slot) => *slot = node,
            None => self.children.push((name, node)),
        }
    }
}

/// The live item tree.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    root: Section,
}

impl Registry {
    pub fn new(root: Section) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Section {
        &self.root
    }

    /// Look up the node at `path`.
    ///
    /// # Errors
    ///
    /// `Error::UnknownRoot` when the first segment is not a top-level
    /// namespace, `Error::NameNotFound` when a later segment is missing or
    /// the walk runs into a leaf.
    pub fn node(&self, path: &SectionPath) -> Result<&Node> {
        let (Some(parent), Some(name)) = (path.parent(), path.last()) else {
            return Err(Error::InvalidPath {
                path: path.to_string(),
                reason: "the registry root is not a node".to_string(),
            });
        };
        let section = self.section(&parent).map_err(|err| match err {
            // The walk ran into a leaf before reaching the end of the path
            Error::NotASection { path: leaf } => {
                let missing = path.segments().nth(leaf.len()).unwrap_or_default();
                not_found(path, leaf.len(), missing)
            }
            Error::NameNotFound { known, missing, .. } => Error::NameNotFound {
                path: path.clone(),
                known,
                missing,
            },
            other => other,
        })?;
        section
            .child(name)
            .ok_or_else(|| not_found(path, path.len() - 1, name))
    }

    /// The section at `path` (the root for the empty path).
    pub fn section(&self, path: &SectionPath) -> Result<&Section> {
        let mut current = &self.root;
        for (depth, name) in path.segments().enumerate() {
            match current.child(name) {
                Some(Node::Section(section)) => current = section,
                Some(_) => {
                    return Err(Error::NotASection {
                        path: path.truncate(depth + 1),
                    });
                }
                None => return Err(not_found(path, depth, name)),
            }
        }
        Ok(current)
    }

    pub fn kind(&self, path: &SectionPath) -> Result<NodeKind> {
        if path.is_root() {
            return Ok(NodeKind::Section);
        }
        self.node(path).map(Node::kind)
    }

    pub fn contains(&self, path: &SectionPath) -> bool {
        path.is_root() || self.node(path).is_ok()
    }

    /// Insert `node` at `path`, creating missing intermediate sections and
    /// replacing whatever was there.
    pub fn insert(&mut self, path: &SectionPath, node: Node) -> Result<()> {
        let parent = path.parent().ok_or_else(|| Error::InvalidPath {
            path: path.to_string(),
            reason: "cannot replace the registry root".to_string(),
        })?;
        let mut current = &mut self.root;
        for (depth, name) in parent.segments().enumerate() {
            if current.child(name).is_none() {
                current.put(name.to_string(), Node::Section(Section::new()));
            }
            current = match current.child_mut(name) {
                Some(Node::Section(section)) => section,
                _ => {
                    return Err(Error::NotASection {
                        path: parent.truncate(depth + 1),
                    });
                }
            };
        }
        let name = path.last().unwrap_or_default().to_string();
        current.put(name, node);
        Ok(())
    }

    /// Every path below `path`, in declaration order (pre-order).
    pub fn descendants(&self, path: &SectionPath) -> Result<Vec<SectionPath>> {
        let mut out = Vec::new();
        if self.kind(path)? == NodeKind::Section {
            collect(self.section(path)?, path, &mut out);
        }
        Ok(out)
    }
}

fn collect(section: &Section, base: &SectionPath, out: &mut Vec<SectionPath>) {
    for (name, node) in section.children() {
        // Child names were validated when their paths were built
        let Ok(path) = base.join(name) else { continue };
        if let Node::Section(inner) = node {
            out.push(path.clone());
            collect(inner, &path, out);
        } else {
            out.push(path);
        }
    }
}

fn not_found(path: &SectionPath, depth: usize, missing: &str) -> Error {
    if depth == 0 {
        Error::UnknownRoot {
            root: missing.to_string(),
        }
    } else {
        Error::NameNotFound {
            path: path.clone(),
            known: path.truncate(depth),
            missing: missing.to_string(),
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Section => f.write_str("section"),
            Self::Leaf => f.write_str("leaf"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    fn p(s: &str) -> SectionPath {
        SectionPath::parse(s).unwrap()
    }

    fn noop() -> Leaf {
        Leaf::function(|_, _| Ok(Value::Null))
    }

    fn sample() -> Registry {
        Registry::new(
            Section::new().section(
                "models",
                Section::new()
                    .leaf("encoder", noop())
                    .declare("decoder")
                    .section("heads", Section::new().leaf("cls", noop())),
            ),
        )
    }

    #[test]
    fn lookup_leaf_and_section() {
        let registry = sample();
        assert_eq!(registry.kind(&p("models")).unwrap(), NodeKind::Section);
        assert_eq!(registry.kind(&p("models.encoder")).unwrap(), NodeKind::Leaf);
        assert_eq!(registry.kind(&p("models.decoder")).unwrap(), NodeKind::Leaf);
        assert_eq!(registry.kind(&p("models.heads.cls")).unwrap(), NodeKind::Leaf);
        assert_eq!(registry.kind(&SectionPath::root()).unwrap(), NodeKind::Section);
    }

    #[test]
    fn unknown_root_is_distinguished_from_typo() {
        let registry = sample();

        let err = registry.node(&p("modles.encoder")).unwrap_err();
        assert!(matches!(err, Error::UnknownRoot { ref root } if root == "modles"));

        let err = registry.node(&p("models.encodr")).unwrap_err();
        match err {
            Error::NameNotFound { known, missing, .. } => {
                assert_eq!(known, p("models"));
                assert_eq!(missing, "encodr");
            }
            other => panic!("expected NameNotFound, got {other:?}"),
        }
    }

    #[test]
    fn walking_through_a_leaf_is_not_found() {
        let registry = sample();
        let err = registry.node(&p("models.encoder.extra")).unwrap_err();
        match err {
            Error::NameNotFound { known, missing, .. } => {
                assert_eq!(known, p("models.encoder"));
                assert_eq!(missing, "extra");
            }
            other => panic!("expected NameNotFound, got {other:?}"),
        }
    }

    #[test]
    fn insert_creates_intermediate_sections() {
        let mut registry = sample();
        registry.insert(&p("jobs.nightly.train"), Node::Leaf(noop())).unwrap();
        assert_eq!(registry.kind(&p("jobs")).unwrap(), NodeKind::Section);
        assert_eq!(registry.kind(&p("jobs.nightly")).unwrap(), NodeKind::Section);
        assert_eq!(registry.kind(&p("jobs.nightly.train")).unwrap(), NodeKind::Leaf);
    }

    #[test]
    fn insert_below_leaf_fails() {
        let mut registry = sample();
        let err = registry
            .insert(&p("models.encoder.inner"), Node::Leaf(noop()))
            .unwrap_err();
        assert!(matches!(err, Error::NotASection { ref path } if *path == p("models.encoder")));
    }

    #[test]
    fn replace_keeps_declaration_order() {
        let mut registry = sample();
        registry.insert(&p("models.encoder"), Node::Declared).unwrap();
        let names: Vec<_> = registry
            .section(&p("models"))
            .unwrap()
            .children()
            .map(|(n, _)| n.to_string())
            .collect();
        assert_eq!(names, vec!["encoder", "decoder", "heads"]);
    }

    #[test]
    fn descendants_are_preorder() {
        let registry = sample();
        assert_eq!(
            registry.descendants(&p("models")).unwrap(),
            vec![
                p("models.encoder"),
                p("models.decoder"),
                p("models.heads"),
                p("models.heads.cls"),
            ]
        );
        assert!(registry.descendants(&p("models.encoder")).unwrap().is_empty());
    }
}
