//! An in-process engine that serves protocol requests from a [`ModelProvider`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use dmodel_protocol::{error_codes, DbgMessage, Envelope};
use dmodel_types::PathAddress;

use crate::client::ProtocolClient;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult, ProviderError};
use crate::provider::ModelProvider;

/// Serves requests read from one envelope queue, replying on another.
pub struct LocalEngine;

impl LocalEngine {
    /// Start serving. Each request runs in its own task, so replies may be
    /// sent in a different order than requests arrived.
    pub fn spawn(
        provider: Arc<dyn ModelProvider>,
        inbound: mpsc::Receiver<Envelope>,
        outbound: mpsc::Sender<Envelope>,
    ) -> EngineHandle {
        let notify = outbound.clone();
        let task = tokio::spawn(serve(provider, inbound, outbound));
        EngineHandle { notify, task }
    }
}

/// Control handle for a running [`LocalEngine`].
#[derive(Debug)]
pub struct EngineHandle {
    notify: mpsc::Sender<Envelope>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// Tell the client that something under `path` changed.
    pub async fn notify_changed(&self, path: PathAddress) -> ClientResult<()> {
        self.notify
            .send(Envelope::notification(DbgMessage::ModelChanged { path }))
            .await
            .map_err(|_| ClientError::ChannelClosed)
    }

    /// Stop serving. Requests still in flight on the client side fail with
    /// `ChannelClosed` once the reply queue is dropped.
    pub fn shutdown(self) {
        self.task.abort();
        info!("engine shut down");
    }
}

async fn serve(
    provider: Arc<dyn ModelProvider>,
    mut inbound: mpsc::Receiver<Envelope>,
    outbound: mpsc::Sender<Envelope>,
) {
    while let Some(envelope) = inbound.recv().await {
        let provider = Arc::clone(&provider);
        let outbound = outbound.clone();
        tokio::spawn(async move {
            let request_id = envelope.request_id;
            let reply = handle(provider.as_ref(), envelope.message).await;
            if outbound.send(Envelope::new(request_id, reply)).await.is_err() {
                debug!(request_id, "client gone; reply dropped");
            }
        });
    }
    debug!("request queue closed");
}

async fn handle(provider: &dyn ModelProvider, message: DbgMessage) -> DbgMessage {
    let result = match message {
        DbgMessage::ListElementsRequest { path } => provider
            .get_elements(&path)
            .await
            .map(|elements| DbgMessage::ListElementsReply { elements }),
        DbgMessage::ListAttributesRequest { path } => provider
            .get_attributes(&path)
            .await
            .map(|attributes| DbgMessage::ListAttributesReply { attributes }),
        DbgMessage::InterruptRequest { path } => {
            provider.interrupt(&path).await.map(|()| DbgMessage::InterruptReply)
        }
        DbgMessage::StepRequest { path, kind } => {
            provider.step(&path, kind).await.map(|()| DbgMessage::StepReply)
        }
        other => {
            warn!(kind = other.type_name(), "engine received a non-request message");
            Err(ProviderError::new(
                error_codes::BAD_REQUEST,
                format!("not a request: {}", other.type_name()),
            ))
        }
    };
    result.unwrap_or_else(|e| DbgMessage::ErrorReply {
        code: e.code,
        message: e.message,
    })
}

/// Wire a [`ProtocolClient`] to a [`LocalEngine`] over in-memory queues.
pub fn connect_local(
    provider: Arc<dyn ModelProvider>,
    config: &ClientConfig,
) -> (ProtocolClient, EngineHandle) {
    let capacity = config.outbound_capacity.max(1);
    let (to_engine, engine_rx) = mpsc::channel(capacity);
    let (to_client, client_rx) = mpsc::channel(capacity);
    let engine = LocalEngine::spawn(provider, engine_rx, to_client);
    let client = ProtocolClient::connect(to_engine, client_rx, config);
    (client, engine)
}
