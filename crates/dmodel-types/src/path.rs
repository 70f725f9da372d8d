use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::key::SearchKey;

/// Address of a node in the remote hierarchy.
///
/// A `PathAddress` is the ordered list of segments leading from the tree root
/// to a node. The root is the empty path. Equality is plain sequence
/// equality, so addresses are usable as map keys.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathAddress(Vec<String>);

impl PathAddress {
    /// The root address (no segments).
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Build an address from its segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Parse a `/`-separated address. The empty string and `/` are the root.
    ///
    /// Leading and trailing separators are ignored; empty inner segments are
    /// rejected.
    pub fn parse(input: &str) -> Result<Self, TypeError> {
        let trimmed = input.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        let mut segments = Vec::new();
        for (position, segment) in trimmed.split('/').enumerate() {
            if segment.is_empty() {
                return Err(TypeError::EmptySegment {
                    input: input.to_string(),
                    position,
                });
            }
            segments.push(segment.to_string());
        }
        Ok(Self(segments))
    }

    /// The address of the child with the given key.
    pub fn child(&self, key: &SearchKey) -> Self {
        let mut segments = self.0.clone();
        segments.push(key.as_str().to_string());
        Self(segments)
    }

    /// The address of the parent, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// The last segment as a search key, or `None` for the root.
    pub fn last(&self) -> Option<SearchKey> {
        self.0.last().map(|s| SearchKey::new(s.as_str()))
    }

    /// The segments of this address.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` for the root address.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `true` if `self` is empty; alias of [`Self::is_root`].
    pub fn is_empty(&self) -> bool {
        self.is_root()
    }

    /// Returns `true` if `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &PathAddress) -> bool {
        self.0.len() < other.0.len() && other.0.starts_with(&self.0)
    }

    /// Returns `true` if `self` equals `other` or is an ancestor of it.
    pub fn contains(&self, other: &PathAddress) -> bool {
        other.0.starts_with(&self.0)
    }
}

impl fmt::Debug for PathAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathAddress({self})")
    }
}

impl fmt::Display for PathAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        write!(f, "{}", self.0.join("/"))
    }
}

impl FromStr for PathAddress {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
