use thiserror::Error;

use dmodel_cache::CacheError;
use dmodel_client::ClientError;
use dmodel_types::PathAddress;

/// Errors surfaced by the tree loader.
///
/// Cloneable so one failed load can be delivered to every caller that
/// joined it.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LoaderError {
    /// The node, or one of its ancestors, has been removed from the tree.
    #[error("invalidated target: {path}")]
    InvalidatedTarget { path: PathAddress },

    /// No child with the requested key after a fresh listing.
    #[error("not found: {path}")]
    NotFound { path: PathAddress },

    #[error("client error: {0}")]
    Client(ClientError),

    #[error("cache error: {0}")]
    Cache(CacheError),

    /// The load task ended without producing a result.
    #[error("load of {path} aborted")]
    Aborted { path: PathAddress },

    #[error("config error: {0}")]
    Config(String),
}

impl LoaderError {
    /// Returns `true` if the connection behind the loader is gone.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Client(e) if e.is_fatal())
    }
}

impl From<ClientError> for LoaderError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::InvalidatedTarget { path } => Self::InvalidatedTarget { path },
            other => Self::Client(other),
        }
    }
}

impl From<CacheError> for LoaderError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::InvalidatedTarget { path } => Self::InvalidatedTarget { path },
            other => Self::Cache(other),
        }
    }
}

pub type LoaderResult<T> = Result<T, LoaderError>;
