use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a child within its parent.
///
/// Keys are unique among the siblings of one listing and stable across
/// refreshes for the same remote entity, so they are what reconciliation
/// matches on.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SearchKey(String);

impl SearchKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for SearchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SearchKey({})", self.0)
    }
}

impl fmt::Display for SearchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SearchKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for SearchKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl Borrow<str> for SearchKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SearchKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
