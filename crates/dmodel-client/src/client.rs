//! Correlated request/reply client for a remote debugging engine.
//!
//! A [`ProtocolClient`] puts [`Envelope`]s on an outbound queue and matches
//! inbound replies to their requests by id. Any number of requests may be
//! outstanding; each resolves exactly once, with its reply or a classified
//! failure. When the inbound queue ends, every pending and later request
//! fails with [`ClientError::ChannelClosed`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use dmodel_cache::ProxyNode;
use dmodel_protocol::{DbgMessage, Envelope, ObjectDescriptor};
use dmodel_types::{AttributeMap, Capability, PathAddress, RemoteModelObject, StepKind};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

type Waiter = oneshot::Sender<ClientResult<DbgMessage>>;

#[derive(Default)]
struct Pending {
    closed: bool,
    waiters: HashMap<u64, Waiter>,
}

struct Shared {
    next_id: AtomicU64,
    pending: Mutex<Pending>,
    outbound: mpsc::Sender<Envelope>,
    changes: broadcast::Sender<PathAddress>,
}

impl Shared {
    fn pending(&self) -> std::sync::MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the connection closed and fail every outstanding request.
    fn close(&self) {
        let drained: Vec<Waiter> = {
            let mut pending = self.pending();
            if pending.closed {
                return;
            }
            pending.closed = true;
            pending.waiters.drain().map(|(_, w)| w).collect()
        };
        info!(failed = drained.len(), "channel closed");
        for waiter in drained {
            let _ = waiter.send(Err(ClientError::ChannelClosed));
        }
    }
}

/// Client side of the dmodel protocol.
///
/// Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct ProtocolClient {
    shared: Arc<Shared>,
}

impl ProtocolClient {
    /// Start a client over a pair of envelope queues.
    ///
    /// Spawns the dispatcher task that routes inbound replies, so this must
    /// be called inside a Tokio runtime.
    pub fn connect(
        outbound: mpsc::Sender<Envelope>,
        inbound: mpsc::Receiver<Envelope>,
        config: &ClientConfig,
    ) -> Self {
        let (changes, _) = broadcast::channel(config.notification_capacity.max(1));
        let shared = Arc::new(Shared {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(Pending::default()),
            outbound,
            changes,
        });
        tokio::spawn(dispatch(Arc::clone(&shared), inbound));
        Self { shared }
    }

    /// Receive paths the engine reports as changed.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<PathAddress> {
        self.shared.changes.subscribe()
    }

    /// Returns `true` once the connection has closed.
    pub fn is_closed(&self) -> bool {
        self.shared.pending().closed
    }

    /// Number of requests awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.shared.pending().waiters.len()
    }

    /// List the children of `node`, in the engine's order.
    pub async fn list_elements(&self, node: &ProxyNode) -> ClientResult<Vec<ObjectDescriptor>> {
        let path = checked_path(node)?;
        match self.request(DbgMessage::ListElementsRequest { path }).await? {
            DbgMessage::ListElementsReply { elements } => Ok(elements),
            other => Err(unexpected("ListElementsReply", &other)),
        }
    }

    /// List the attributes of `node`.
    pub async fn list_attributes(&self, node: &ProxyNode) -> ClientResult<AttributeMap> {
        let path = checked_path(node)?;
        match self.request(DbgMessage::ListAttributesRequest { path }).await? {
            DbgMessage::ListAttributesReply { attributes } => Ok(attributes),
            other => Err(unexpected("ListAttributesReply", &other)),
        }
    }

    /// Interrupt the target represented by `node`.
    pub async fn interrupt(&self, node: &ProxyNode) -> ClientResult<()> {
        let path = checked_path(node)?;
        require(node, Capability::Interruptible)?;
        match self.request(DbgMessage::InterruptRequest { path }).await? {
            DbgMessage::InterruptReply => Ok(()),
            other => Err(unexpected("InterruptReply", &other)),
        }
    }

    /// Step the target represented by `node`.
    pub async fn step(&self, node: &ProxyNode, kind: StepKind) -> ClientResult<()> {
        let path = checked_path(node)?;
        require(node, Capability::Steppable)?;
        match self.request(DbgMessage::StepRequest { path, kind }).await? {
            DbgMessage::StepReply => Ok(()),
            other => Err(unexpected("StepReply", &other)),
        }
    }

    async fn request(&self, message: DbgMessage) -> ClientResult<DbgMessage> {
        let request_id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending();
            if pending.closed {
                return Err(ClientError::ChannelClosed);
            }
            pending.waiters.insert(request_id, tx);
        }
        let _registered = Registered {
            shared: &self.shared,
            request_id,
        };

        debug!(request_id, kind = message.type_name(), "request issued");
        if self
            .shared
            .outbound
            .send(Envelope::new(request_id, message))
            .await
            .is_err()
        {
            self.shared.close();
            return Err(ClientError::ChannelClosed);
        }

        rx.await.unwrap_or(Err(ClientError::ChannelClosed))
    }
}

/// Drops a request's waiter when its caller goes away before the reply,
/// including while the send is still blocked on a full queue.
struct Registered<'a> {
    shared: &'a Shared,
    request_id: u64,
}

impl Drop for Registered<'_> {
    fn drop(&mut self) {
        self.shared.pending().waiters.remove(&self.request_id);
    }
}

impl std::fmt::Debug for ProtocolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClient")
            .field("closed", &self.is_closed())
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// Route inbound envelopes to their waiters until the queue ends.
async fn dispatch(shared: Arc<Shared>, mut inbound: mpsc::Receiver<Envelope>) {
    while let Some(envelope) = inbound.recv().await {
        if envelope.is_notification() {
            match envelope.message {
                DbgMessage::ModelChanged { path } => {
                    debug!(path = %path, "model changed");
                    let _ = shared.changes.send(path);
                }
                other => warn!(kind = other.type_name(), "unexpected notification"),
            }
            continue;
        }

        let waiter = shared.pending().waiters.remove(&envelope.request_id);
        match waiter {
            Some(waiter) => {
                debug!(
                    request_id = envelope.request_id,
                    kind = envelope.message.type_name(),
                    "reply received"
                );
                let _ = waiter.send(classify(envelope.message));
            }
            None => warn!(request_id = envelope.request_id, "reply for unknown request"),
        }
    }
    shared.close();
}

fn classify(message: DbgMessage) -> ClientResult<DbgMessage> {
    match message {
        DbgMessage::ErrorReply { code, message } => Err(ClientError::EngineError { code, message }),
        other => Ok(other),
    }
}

fn checked_path(node: &ProxyNode) -> ClientResult<PathAddress> {
    node.check_valid()
        .map_err(|_| ClientError::InvalidatedTarget {
            path: node.path().clone(),
        })?;
    Ok(node.path().clone())
}

fn require(node: &ProxyNode, capability: Capability) -> ClientResult<()> {
    if node.capabilities().supports(capability) {
        Ok(())
    } else {
        Err(ClientError::Unsupported {
            path: node.path().clone(),
            capability,
        })
    }
}

fn unexpected(expected: &str, got: &DbgMessage) -> ClientError {
    ClientError::DecodeError(format!("expected {expected}, got {}", got.type_name()))
}

/// Anything that can list a node's children as remote objects.
///
/// The tree loader depends on this rather than on [`ProtocolClient`]
/// directly.
#[async_trait]
pub trait ElementSource: Send + Sync + 'static {
    async fn list_elements(&self, node: &Arc<ProxyNode>) -> ClientResult<Vec<Arc<dyn RemoteModelObject>>>;
}

#[async_trait]
impl ElementSource for ProtocolClient {
    async fn list_elements(&self, node: &Arc<ProxyNode>) -> ClientResult<Vec<Arc<dyn RemoteModelObject>>> {
        let elements = ProtocolClient::list_elements(self, node).await?;
        Ok(elements
            .into_iter()
            .map(|d| Arc::new(d) as Arc<dyn RemoteModelObject>)
            .collect())
    }
}
