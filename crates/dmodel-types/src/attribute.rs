use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::path::PathAddress;

/// Attributes of a remote object, keyed by name.
pub type AttributeMap = BTreeMap<String, AttributeValue>;

/// Well-known attribute names.
///
/// Names starting with [`INVISIBLE_PREFIX`](attributes::INVISIBLE_PREFIX)
/// are bookkeeping attributes a front-end hides by default.
pub mod attributes {
    pub const INVISIBLE_PREFIX: &str = "_";

    pub const DISPLAY: &str = "_display";
    pub const KIND: &str = "_kind";
    pub const PID: &str = "_pid";
    pub const TID: &str = "_tid";
    pub const STATE: &str = "_state";
    pub const EVENT_PROCESS: &str = "_event_process";
    pub const EVENT_THREAD: &str = "_event_thread";

    /// Returns `true` if the attribute is hidden by default.
    pub fn is_invisible(name: &str) -> bool {
        name.starts_with(INVISIBLE_PREFIX)
    }
}

/// A single attribute value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Str(String),
    /// Raw bytes, such as a register's contents.
    Bytes(Vec<u8>),
    /// A reference to another node in the tree.
    Path(PathAddress),
    List(Vec<AttributeValue>),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Convert to a JSON value for machine-readable output.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(v) => serde_json::Value::Bool(*v),
            Self::Int(v) => serde_json::Value::from(*v),
            Self::Str(s) => serde_json::Value::String(s.clone()),
            Self::Bytes(b) => serde_json::Value::String(format!("0x{}", hex::encode(b))),
            Self::Path(p) => serde_json::Value::String(p.to_string()),
            Self::List(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json).collect())
            }
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
            Self::Path(p) => write!(f, "@{p}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Vec<u8>> for AttributeValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<PathAddress> for AttributeValue {
    fn from(path: PathAddress) -> Self {
        Self::Path(path)
    }
}

/// Execution state of a process or thread, reported in the `_state`
/// attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionState {
    /// Not yet started.
    Inactive,
    /// Alive, but the engine cannot tell whether it is running.
    Alive,
    Stopped,
    Running,
    Terminated,
}

impl ExecutionState {
    /// Read the state from an attribute map, if present and well-formed.
    pub fn from_attributes(attrs: &AttributeMap) -> Option<Self> {
        attrs
            .get(attributes::STATE)
            .and_then(AttributeValue::as_str)
            .and_then(|s| s.parse().ok())
    }

    pub fn is_alive(&self) -> bool {
        matches!(self, Self::Alive | Self::Stopped | Self::Running)
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Inactive => "inactive",
            Self::Alive => "alive",
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

impl FromStr for ExecutionState {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inactive" => Ok(Self::Inactive),
            "alive" => Ok(Self::Alive),
            "stopped" => Ok(Self::Stopped),
            "running" => Ok(Self::Running),
            "terminated" => Ok(Self::Terminated),
            other => Err(TypeError::UnknownExecutionState(other.to_string())),
        }
    }
}

impl From<ExecutionState> for AttributeValue {
    fn from(state: ExecutionState) -> Self {
        Self::Str(state.to_string())
    }
}
