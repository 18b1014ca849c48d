//! Dotted hierarchical addresses
//!
//! A [`SectionPath`] names a node in the item registry: `models.encoder`
//! addresses the `encoder` child of the top-level `models` namespace.
//!
//! # Examples
//!
//! ```
//! use tier_core::SectionPath;
//!
//! let path = SectionPath::parse("models.encoder").unwrap();
//! assert_eq!(path.len(), 2);
//! assert_eq!(path.first(), Some("models"));
//! assert!(path.starts_with(&SectionPath::parse("models").unwrap()));
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, Result};

/// Immutable dotted address into the item hierarchy.
///
/// Equality, ordering and hashing are structural over the segment sequence.
/// The empty path addresses the registry root.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionPath {
    segments: Vec<String>,
}

impl SectionPath {
    /// The registry root (no segments).
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a dotted path such as `models.encoder`.
    ///
    /// Empty segments (`a..b`, leading or trailing dots) are rejected. The
    /// empty string parses to the root.
    pub fn parse(path: &str) -> Result<Self> {
        if path.is_empty() {
            return Ok(Self::root());
        }
        Self::from_segments(path.split('.'))
    }

    /// Build a path from individual segments.
    pub fn from_segments<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        for segment in &segments {
            validate_segment(&segments, segment)?;
        }
        Ok(Self { segments })
    }

    /// Iterate over the segments, outermost first.
    pub fn segments(&self) -> impl DoubleEndedIterator<Item = &str> + ExactSizeIterator {
        self.segments.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// The top-level namespace this path lives under.
    pub fn first(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    /// The final segment (the node's own name).
    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// The enclosing path, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Append a single segment.
    pub fn join(&self, segment: &str) -> Result<Self> {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        validate_segment(&segments, segment)?;
        Ok(Self { segments })
    }

    /// Append every segment of `other`.
    pub fn concat(&self, other: &SectionPath) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }

    /// The first `len` segments.
    pub fn truncate(&self, len: usize) -> Self {
        Self {
            segments: self.segments[..len.min(self.segments.len())].to_vec(),
        }
    }

    pub fn starts_with(&self, prefix: &SectionPath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    pub fn ends_with(&self, suffix: &SectionPath) -> bool {
        self.segments.ends_with(&suffix.segments)
    }

    /// Every non-root prefix, outermost first, ending with `self`.
    ///
    /// `a.b.c` yields `a`, `a.b`, `a.b.c`.
    pub fn prefixes(&self) -> impl Iterator<Item = SectionPath> + '_ {
        (1..=self.segments.len()).map(|len| self.truncate(len))
    }
}

fn validate_segment(segments: &[String], segment: &str) -> Result<()> {
    let reason = if segment.is_empty() {
        "empty segment"
    } else if segment.contains('.') {
        "segment contains '.'"
    } else if segment.trim() != segment {
        "segment has surrounding whitespace"
    } else {
        return Ok(());
    };
    Err(Error::InvalidPath {
        path: segments.join("."),
        reason: reason.to_string(),
    })
}

impl fmt::Display for SectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str("<root>");
        }
        f.write_str(&self.segments.join("."))
    }
}

impl fmt::Debug for SectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SectionPath({})", self)
    }
}

impl FromStr for SectionPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for SectionPath {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

impl Serialize for SectionPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.segments.join("."))
    }
}

impl<'de> Deserialize<'de> for SectionPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
