//! Dot-separated state paths and listener patterns.
//!
//! Paths address nodes inside a store's JSON tree (`user.profile.name`).
//! They are parsed into segments up front so that malformed input fails
//! fast instead of creating odd keys in the tree.
//!
//! Patterns select listeners: an exact path, or a subtree written with a
//! trailing wildcard (`user.*`, or `*` for the whole tree).

use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, StateError};

/// Maximum path length in bytes.
pub const MAX_PATH_LENGTH: usize = 1024;

/// Wildcard suffix marking a subtree pattern.
pub const WILDCARD: &str = "*";

/// A parsed, validated path into a state tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    /// The root of the tree.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a dot-separated path such as `user.name`.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(StateError::InvalidPath("path cannot be empty".to_string()));
        }
        if raw.len() > MAX_PATH_LENGTH {
            return Err(StateError::InvalidPath(format!(
                "path exceeds maximum length of {} bytes",
                MAX_PATH_LENGTH
            )));
        }

        let segments = raw
            .split('.')
            .map(|segment| validate_segment(raw, segment).map(|_| segment.to_string()))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Strict ancestors of this path, root first.
    pub fn ancestors(&self) -> impl Iterator<Item = Path> + '_ {
        (0..self.segments.len()).map(move |depth| Path {
            segments: self.segments[..depth].to_vec(),
        })
    }

    /// True if `self` equals `prefix` or lies beneath it.
    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Walk the tree and return the node at this path, if present.
    ///
    /// Arrays are indexed by numeric segments.
    pub fn resolve<'a>(&self, tree: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(tree, |node, segment| match node {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
    }

    /// Write `value` at this path, creating intermediate objects as needed.
    ///
    /// Returns the value previously stored there. Missing or `null`
    /// intermediates become empty objects; descending through any other
    /// scalar is a [`StateError::PathConflict`].
    pub fn assign(&self, tree: &mut Value, value: Value) -> Result<Option<Value>> {
        let Some((last, parents)) = self.segments.split_last() else {
            return Ok(Some(std::mem::replace(tree, value)));
        };

        let mut node = tree;
        for segment in parents {
            node = self.child_mut(node, segment)?;
        }

        if node.is_null() {
            *node = Value::Object(Map::new());
        }
        match node {
            Value::Object(map) => Ok(map.insert(last.clone(), value)),
            Value::Array(items) => match segment_index(last, items.len()) {
                Some(i) => Ok(Some(std::mem::replace(&mut items[i], value))),
                None => Err(self.conflict(last)),
            },
            _ => Err(self.conflict(last)),
        }
    }

    fn child_mut<'a>(&self, node: &'a mut Value, segment: &str) -> Result<&'a mut Value> {
        if node.is_null() {
            *node = Value::Object(Map::new());
        }
        match node {
            Value::Object(map) => Ok(map.entry(segment.to_string()).or_insert(Value::Null)),
            Value::Array(items) => match segment_index(segment, items.len()) {
                Some(i) => Ok(&mut items[i]),
                None => Err(self.conflict(segment)),
            },
            _ => Err(self.conflict(segment)),
        }
    }

    fn conflict(&self, segment: &str) -> StateError {
        StateError::PathConflict {
            path: self.to_string(),
            segment: segment.to_string(),
        }
    }
}

fn segment_index(segment: &str, len: usize) -> Option<usize> {
    segment.parse::<usize>().ok().filter(|i| *i < len)
}

fn validate_segment(raw: &str, segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(StateError::InvalidPath(format!(
            "'{}' contains an empty segment",
            raw
        )));
    }
    if segment == WILDCARD {
        return Err(StateError::InvalidPath(format!(
            "'{}' uses a wildcard outside the final segment",
            raw
        )));
    }
    if segment.chars().any(char::is_whitespace) {
        return Err(StateError::InvalidPath(format!(
            "'{}' contains whitespace",
            raw
        )));
    }
    Ok(())
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl FromStr for Path {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Listener selector: one exact path, or everything beneath a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Pattern {
    /// Notified when exactly this path is written.
    Exact(Path),
    /// Notified when any strict descendant of this path is written.
    Subtree(Path),
}

impl Pattern {
    /// Parse `a.b` (exact), `a.b.*` (subtree) or `*` (whole tree).
    pub fn parse(raw: &str) -> Result<Self> {
        if raw == WILDCARD {
            return Ok(Pattern::Subtree(Path::root()));
        }
        match raw.strip_suffix(".*") {
            Some(base) => Ok(Pattern::Subtree(Path::parse(base)?)),
            None => Ok(Pattern::Exact(Path::parse(raw)?)),
        }
    }

    /// The path whose value a listener on this pattern receives.
    pub fn base(&self) -> &Path {
        match self {
            Pattern::Exact(path) | Pattern::Subtree(path) => path,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Pattern::Subtree(_))
    }

    /// Check whether a write at `changed` concerns this pattern.
    pub fn matches(&self, changed: &Path) -> bool {
        match self {
            Pattern::Exact(path) => path == changed,
            Pattern::Subtree(path) => changed.len() > path.len() && changed.starts_with(path),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Exact(path) => write!(f, "{}", path),
            Pattern::Subtree(path) if path.is_root() => f.write_str(WILDCARD),
            Pattern::Subtree(path) => write!(f, "{}.{}", path, WILDCARD),
        }
    }
}

impl FromStr for Pattern {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
