//! Background listener applying incoming bus messages to local state.

use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use warden_core::{AppId, NodeId};

use crate::message::{
    CacheMessage, ChannelKind, Envelope, Message, RequestSyncMessage, VersionMessage,
};
use crate::transport::{BusError, PubSub};

/// Receives decoded messages from remote nodes.
///
/// Handlers run on the listener's background tasks, never on
/// request-handling threads, and must stay fast and non-blocking (pure
/// local-state mutation) so the subscription never builds a backlog.
pub trait BusHandler: Send + Sync {
    fn on_cache(&self, origin: NodeId, message: &CacheMessage);

    fn on_version(&self, origin: NodeId, message: &VersionMessage) {
        let _ = (origin, message);
    }

    fn on_request_sync(&self, origin: NodeId, message: &RequestSyncMessage) {
        let _ = (origin, message);
    }
}

/// Subscribes to all three channels and dispatches to a [`BusHandler`].
///
/// Messages originating from the local node are dropped: the publishing
/// node already applied the change before broadcasting it.
pub struct BusListener {
    tasks: Vec<JoinHandle<()>>,
}

impl BusListener {
    /// Subscribe and start one background task per channel.
    pub async fn start(
        bus: Arc<dyn PubSub>,
        app_id: AppId,
        node_id: NodeId,
        handler: Arc<dyn BusHandler>,
    ) -> Result<Self, BusError> {
        let mut tasks = Vec::with_capacity(ChannelKind::all().len());
        for kind in ChannelKind::all() {
            let channel = kind.channel_name(&app_id);
            let mut rx = bus.subscribe(&channel).await?;
            let handler = handler.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(bytes) => dispatch(&bytes, node_id, handler.as_ref()),
                        Err(RecvError::Lagged(missed)) => {
                            // Dropped messages are recovered by entry TTLs.
                            warn!(channel = %channel, missed, "Bus subscriber lagged");
                        }
                        Err(RecvError::Closed) => {
                            debug!(channel = %channel, "Bus channel closed, listener exiting");
                            break;
                        }
                    }
                }
            }));
        }
        Ok(Self { tasks })
    }

    /// Stop all listener tasks.
    pub fn shutdown(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for BusListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatch(bytes: &[u8], local: NodeId, handler: &dyn BusHandler) {
    let envelope = match Envelope::decode(bytes) {
        Ok(envelope) => envelope,
        Err(error) => {
            warn!(%error, "Dropping undecodable bus message");
            return;
        }
    };
    if envelope.origin == local {
        return;
    }
    match &envelope.payload {
        Message::Cache(message) => handler.on_cache(envelope.origin, message),
        Message::Version(message) => handler.on_version(envelope.origin, message),
        Message::RequestSync(message) => handler.on_request_sync(envelope.origin, message),
    }
}
