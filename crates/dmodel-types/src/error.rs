use thiserror::Error;

/// Errors produced by type parsing.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("empty path segment at position {position} in {input:?}")]
    EmptySegment { input: String, position: usize },

    #[error("unknown step kind: {0}")]
    UnknownStepKind(String),

    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    #[error("unknown execution state: {0}")]
    UnknownExecutionState(String),
}
