use thiserror::Error;

use dmodel_types::{Capability, PathAddress};

/// Failure of a protocol operation.
///
/// Cloneable so a single failure can be delivered to every caller waiting on
/// the same round trip.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The addressed node, or one of its ancestors, was removed from the tree.
    #[error("invalidated target: {path}")]
    InvalidatedTarget { path: PathAddress },

    /// The transport is gone. Fatal for the connection.
    #[error("channel closed")]
    ChannelClosed,

    /// The reply did not have the shape the request expects.
    #[error("decode error: {0}")]
    DecodeError(String),

    /// The engine reported an application-level failure.
    #[error("engine error: code={code}, message={message}")]
    EngineError { code: u32, message: String },

    /// The node does not advertise the capability the command needs.
    #[error("{path} is not {capability}")]
    Unsupported {
        path: PathAddress,
        capability: Capability,
    },
}

impl ClientError {
    /// Returns `true` if the connection can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ChannelClosed)
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Failure reported by a [`ModelProvider`](crate::ModelProvider); travels to
/// the client as an `ErrorReply`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("provider error {code}: {message}")]
pub struct ProviderError {
    pub code: u32,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(path: &PathAddress) -> Self {
        Self::new(
            dmodel_protocol::error_codes::NO_SUCH_OBJECT,
            format!("no such object: {path}"),
        )
    }

    pub fn unsupported(path: &PathAddress, capability: Capability) -> Self {
        Self::new(
            dmodel_protocol::error_codes::UNSUPPORTED,
            format!("{path} is not {capability}"),
        )
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(dmodel_protocol::error_codes::BAD_REQUEST, message)
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
