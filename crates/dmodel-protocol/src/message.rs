use std::any::Any;

use serde::{Deserialize, Serialize};

use dmodel_types::{
    attributes, AttributeMap, CapabilitySet, PathAddress, RemoteModelObject, SearchKey, StepKind,
};

pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Request id carried by unsolicited engine notifications.
pub const NOTIFICATION_ID: u64 = 0;

/// Error codes an engine reports in [`DbgMessage::ErrorReply`].
pub mod error_codes {
    pub const NO_SUCH_OBJECT: u32 = 404;
    pub const UNSUPPORTED: u32 = 405;
    pub const BAD_REQUEST: u32 = 400;
    pub const ENGINE_FAILURE: u32 = 500;
}

/// Wire form of one remote object, as returned by `ListElements`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    pub key: SearchKey,
    /// Schema name of the object, such as `Process` or `Thread`.
    pub kind: String,
    pub display: String,
    pub capabilities: CapabilitySet,
    pub immutable: bool,
    pub attributes: AttributeMap,
}

impl ObjectDescriptor {
    pub fn new(key: impl Into<SearchKey>, kind: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            display: key.to_string(),
            key,
            kind: kind.into(),
            capabilities: CapabilitySet::new(),
            immutable: false,
            attributes: AttributeMap::new(),
        }
    }

    /// Descriptor standing in for the tree root.
    pub fn root() -> Self {
        Self::new("", "Root")
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = display.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        value: impl Into<dmodel_types::AttributeValue>,
    ) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    /// Recover the descriptor behind a type-erased remote object.
    pub fn downcast(object: &dyn RemoteModelObject) -> Option<&ObjectDescriptor> {
        object.as_any().downcast_ref::<ObjectDescriptor>()
    }

    /// The value of the `_display` attribute, falling back to `display`.
    pub fn decorated_name(&self) -> String {
        self.attributes
            .get(attributes::DISPLAY)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| self.display.clone())
    }
}

impl RemoteModelObject for ObjectDescriptor {
    fn search_key(&self) -> SearchKey {
        self.key.clone()
    }

    fn display_name(&self) -> String {
        self.decorated_name()
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities.clone()
    }

    fn is_immutable(&self) -> bool {
        self.immutable
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// All message types in the dmodel protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DbgMessage {
    ListElementsRequest { path: PathAddress },
    ListElementsReply { elements: Vec<ObjectDescriptor> },
    ListAttributesRequest { path: PathAddress },
    ListAttributesReply { attributes: AttributeMap },
    InterruptRequest { path: PathAddress },
    InterruptReply,
    StepRequest { path: PathAddress, kind: StepKind },
    StepReply,
    /// Unsolicited: the children or attributes under `path` changed.
    ModelChanged { path: PathAddress },
    ErrorReply { code: u32, message: String },
}

impl DbgMessage {
    pub fn type_tag(&self) -> u8 {
        match self {
            Self::ListElementsRequest { .. } => 1,
            Self::ListElementsReply { .. } => 2,
            Self::ListAttributesRequest { .. } => 3,
            Self::ListAttributesReply { .. } => 4,
            Self::InterruptRequest { .. } => 5,
            Self::InterruptReply => 6,
            Self::StepRequest { .. } => 7,
            Self::StepReply => 8,
            Self::ModelChanged { .. } => 9,
            Self::ErrorReply { .. } => 255,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::ListElementsRequest { .. } => "ListElementsRequest",
            Self::ListElementsReply { .. } => "ListElementsReply",
            Self::ListAttributesRequest { .. } => "ListAttributesRequest",
            Self::ListAttributesReply { .. } => "ListAttributesReply",
            Self::InterruptRequest { .. } => "InterruptRequest",
            Self::InterruptReply => "InterruptReply",
            Self::StepRequest { .. } => "StepRequest",
            Self::StepReply => "StepReply",
            Self::ModelChanged { .. } => "ModelChanged",
            Self::ErrorReply { .. } => "Error",
        }
    }

    /// Returns `true` for messages a client sends.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Self::ListElementsRequest { .. }
                | Self::ListAttributesRequest { .. }
                | Self::InterruptRequest { .. }
                | Self::StepRequest { .. }
        )
    }

    /// The path a request addresses, if any.
    pub fn target(&self) -> Option<&PathAddress> {
        match self {
            Self::ListElementsRequest { path }
            | Self::ListAttributesRequest { path }
            | Self::InterruptRequest { path }
            | Self::StepRequest { path, .. }
            | Self::ModelChanged { path } => Some(path),
            _ => None,
        }
    }
}

/// A message tagged with the id of the request it belongs to.
///
/// Replies echo the id of their request. Notifications use
/// [`NOTIFICATION_ID`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub request_id: u64,
    pub message: DbgMessage,
}

impl Envelope {
    pub fn new(request_id: u64, message: DbgMessage) -> Self {
        Self {
            request_id,
            message,
        }
    }

    pub fn notification(message: DbgMessage) -> Self {
        Self::new(NOTIFICATION_ID, message)
    }

    pub fn is_notification(&self) -> bool {
        self.request_id == NOTIFICATION_ID
    }
}
