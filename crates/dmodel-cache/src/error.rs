//! Error types for cache operations.

use thiserror::Error;

use dmodel_types::PathAddress;

/// Errors that can occur while reading or committing cache state.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    /// The node, or one of its ancestors, has been removed from the tree.
    #[error("invalidated target: {path}")]
    InvalidatedTarget { path: PathAddress },

    /// A reconciliation was planned against a cache that has since changed.
    #[error("stale reconciliation for {path}: planned at generation {planned}, cache is at {current}")]
    StaleGeneration {
        path: PathAddress,
        planned: u64,
        current: u64,
    },

    /// A lock guarding cache state was poisoned by a panicking writer.
    #[error("lock poisoned: {0}")]
    Poisoned(String),
}

/// Convenience type alias for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;
