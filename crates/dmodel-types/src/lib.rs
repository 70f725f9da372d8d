//! Foundation types for dmodel.
//!
//! This crate provides the addressing, attribute, and capability types shared
//! by the protocol, cache, client, and loader crates. It has no logic beyond
//! construction, parsing, and formatting.
//!
//! # Key Types
//!
//! - [`PathAddress`] — Ordered segments identifying a node from the tree root
//! - [`SearchKey`] — Per-listing-unique identifier of a child within its parent
//! - [`AttributeValue`] — Values reported by `ListAttributes`
//! - [`ExecutionState`] — Run state of processes and threads
//! - [`Capability`] / [`CapabilitySet`] — Commands a remote object accepts
//! - [`StepKind`] — Granularity of a `Step` command
//! - [`RemoteModelObject`] — Opaque provider handle exposing a search key

pub mod attribute;
pub mod capability;
pub mod error;
pub mod key;
pub mod object;
pub mod path;

pub use attribute::{attributes, AttributeMap, AttributeValue, ExecutionState};
pub use capability::{Capability, CapabilitySet, StepKind};
pub use error::TypeError;
pub use key::SearchKey;
pub use object::RemoteModelObject;
pub use path::PathAddress;
