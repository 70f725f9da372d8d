//! Lazy tree loader for dmodel.
//!
//! The loader sits between a consumer (a tree widget, a CLI, a script) and
//! the protocol client. It expands nodes on demand, coalesces overlapping
//! requests for the same node into a single `ListElements` round trip,
//! commits listings through the proxy cache, and reports what changed.
//!
//! # Modules
//!
//! - [`loader`] — [`LazyTreeLoader`]
//! - [`events`] — [`TreeEvent`] and subscription filters
//! - [`config`] — [`LoaderConfig`] and [`FailurePolicy`]
//! - [`error`] — Error types for loader operations

pub mod config;
pub mod error;
pub mod events;
pub mod loader;

pub use config::{FailurePolicy, LoaderConfig};
pub use error::{LoaderError, LoaderResult};
pub use events::{EventFilter, EventStream, TreeEvent, TreeEventKind};
pub use loader::LazyTreeLoader;
