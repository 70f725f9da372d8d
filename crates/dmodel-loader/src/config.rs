use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LoaderError, LoaderResult};

/// What a failed child listing yields to its callers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Report the classified error.
    #[default]
    Surface,
    /// Log the error and report an empty listing. The cache keeps its last
    /// good snapshot either way.
    DegradeToEmpty,
}

/// Configuration for the [`LazyTreeLoader`](crate::LazyTreeLoader).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub failure_policy: FailurePolicy,
    /// Capacity of per-subscriber tree event channels.
    pub event_capacity: usize,
    /// Depth bound for [`load_all`](crate::LazyTreeLoader::load_all).
    pub load_all_max_depth: usize,
    /// Refresh visible nodes when the engine reports a change under them.
    pub refresh_visible_on_change: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::Surface,
            event_capacity: 1024,
            load_all_max_depth: 8,
            refresh_visible_on_change: true,
        }
    }
}

impl LoaderConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> LoaderResult<Self> {
        toml::from_str(s).map_err(|e| LoaderError::Config(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> LoaderResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| LoaderError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> LoaderResult<String> {
        toml::to_string(self).map_err(|e| LoaderError::Config(e.to_string()))
    }
}
