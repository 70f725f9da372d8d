use async_trait::async_trait;

use dmodel_protocol::ObjectDescriptor;
use dmodel_types::{AttributeMap, PathAddress, StepKind};

use crate::error::ProviderResult;

/// Engine-side source of the object model.
///
/// A [`LocalEngine`](crate::LocalEngine) answers protocol requests by calling
/// into a provider. Implementations decide what the hierarchy looks like;
/// errors travel back to the client as `ErrorReply` messages.
#[async_trait]
pub trait ModelProvider: Send + Sync + 'static {
    /// Children of the object at `path`, in display order.
    async fn get_elements(&self, path: &PathAddress) -> ProviderResult<Vec<ObjectDescriptor>>;

    /// Attributes of the object at `path`.
    async fn get_attributes(&self, path: &PathAddress) -> ProviderResult<AttributeMap>;

    /// Interrupt the target at `path`.
    async fn interrupt(&self, path: &PathAddress) -> ProviderResult<()>;

    /// Step the target at `path`.
    async fn step(&self, path: &PathAddress, kind: StepKind) -> ProviderResult<()>;
}
