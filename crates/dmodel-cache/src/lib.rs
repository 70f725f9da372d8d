//! Proxy cache for dmodel.
//!
//! A debugger front-end sees the remote engine's hierarchy (sessions,
//! processes, threads, modules, registers, frames) through a local mirror of
//! proxy nodes. This crate keeps that mirror correct across refreshes.
//!
//! # Architecture
//!
//! - **Proxy nodes** are identity-stable: a node keeps its identity for as
//!   long as its key keeps appearing in its parent's listings, and its remote
//!   object is swapped in place on every refresh.
//! - **Reconciliation** is a pure planning step that matches a fresh listing
//!   against the cached children, preserving the engine's order and
//!   reporting stale keys.
//! - **Object caches** own the children of one parent and apply a plan
//!   atomically, so readers never see a half-applied refresh.
//! - **The object tree** is the arena owning every cache of one hierarchy and
//!   detaches whole subtrees when a node disappears.
//!
//! # Modules
//!
//! - [`error`] — Error types for cache operations
//! - [`node`] — [`ProxyNode`] and its [`LoadState`]
//! - [`reconcile`] — The [`reconcile`](reconcile::reconcile) planner
//! - [`cache`] — [`ObjectCache`] and [`Snapshot`]
//! - [`tree`] — [`ObjectTree`]

pub mod cache;
pub mod error;
pub mod node;
pub mod reconcile;
pub mod tree;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CommitOutcome, ObjectCache, Snapshot};
pub use error::{CacheError, CacheResult};
pub use node::{LoadState, ProxyNode};
pub use reconcile::{reconcile, Reconciliation};
pub use tree::{ObjectTree, TreeUpdate};
