//! Protocol client for dmodel.
//!
//! This crate talks to a debugging engine over the dmodel protocol: it
//! correlates requests with replies, addresses remote objects through
//! [`ProxyNode`](dmodel_cache::ProxyNode)s, and refuses to address a node that
//! has been invalidated. The engine side is pluggable through
//! [`ModelProvider`], served in-process by [`LocalEngine`] or over any byte
//! stream with [`spawn_stream_transport`].
//!
//! # Key Types
//!
//! - [`ProtocolClient`] — Issues `ListElements`, `ListAttributes`, `Interrupt`, `Step`
//! - [`ElementSource`] — The listing seam the tree loader depends on
//! - [`ModelProvider`] — Engine-side model implementation
//! - [`InMemoryProvider`] — Editable in-memory model, for tests and demos

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod memory;
pub mod provider;
pub mod transport;

pub use client::{ElementSource, ProtocolClient};
pub use config::ClientConfig;
pub use engine::{connect_local, EngineHandle, LocalEngine};
pub use error::{ClientError, ClientResult, ProviderError, ProviderResult};
pub use memory::InMemoryProvider;
pub use provider::ModelProvider;
pub use transport::spawn_stream_transport;
