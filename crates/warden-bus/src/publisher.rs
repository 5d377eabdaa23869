//! Node-bound publisher handle.

use std::sync::Arc;
use tracing::warn;
use warden_core::{AppId, NodeId};

use crate::message::{
    CacheMessage, ChannelKind, Envelope, Message, RequestSyncMessage, VersionMessage,
};
use crate::transport::{BusError, PubSub};

/// Binds a transport to one node's identity.
///
/// Typed publish methods build the envelope, stamp it with the local node
/// id, and fire it at the right channel. Delivery failures are logged and
/// dropped; the entry TTL bounds the staleness a lost message can cause.
#[derive(Clone)]
pub struct BusPublisher {
    bus: Arc<dyn PubSub>,
    app_id: AppId,
    node_id: NodeId,
}

impl BusPublisher {
    pub fn new(bus: Arc<dyn PubSub>, app_id: AppId, node_id: NodeId) -> Self {
        Self {
            bus,
            app_id,
            node_id,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }

    /// Publish a typed message, returning how many subscribers saw it.
    pub async fn publish(&self, payload: Message) -> Result<usize, BusError> {
        let envelope = Envelope::new(self.app_id.clone(), self.node_id, payload);
        let channel = envelope.channel.channel_name(&self.app_id);
        self.bus.publish(&channel, envelope.encode()?).await
    }

    /// Publish a cache invalidation; failures are logged and dropped.
    pub async fn publish_cache(&self, message: CacheMessage) {
        self.publish_best_effort(Message::Cache(message)).await;
    }

    /// Publish an administrative version change; failures are logged and dropped.
    pub async fn publish_version(&self, message: VersionMessage) {
        self.publish_best_effort(Message::Version(message)).await;
    }

    /// Publish a ban-sync event; failures are logged and dropped.
    pub async fn publish_request_sync(&self, message: RequestSyncMessage) {
        self.publish_best_effort(Message::RequestSync(message)).await;
    }

    async fn publish_best_effort(&self, payload: Message) {
        let channel = payload.channel();
        if let Err(error) = self.publish(payload).await {
            warn!(%channel, %error, "Dropping undeliverable bus message");
        }
    }

    /// Subscribe to one of this application's channels.
    pub async fn subscribe(&self, kind: ChannelKind) -> Result<crate::BusReceiver, BusError> {
        self.bus.subscribe(&kind.channel_name(&self.app_id)).await
    }
}

impl std::fmt::Debug for BusPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusPublisher")
            .field("app_id", &self.app_id)
            .field("node_id", &self.node_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InProcessBus;

    #[tokio::test]
    async fn test_publisher_stamps_origin() {
        let bus = Arc::new(InProcessBus::new());
        let publisher = BusPublisher::new(bus.clone(), AppId::new("app"), NodeId::generate());
        let mut rx = publisher.subscribe(ChannelKind::Cache).await.unwrap();

        publisher
            .publish_cache(CacheMessage::invalidate("k"))
            .await;

        let envelope = Envelope::decode(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(envelope.origin, publisher.node_id());
        assert_eq!(envelope.app_id, AppId::new("app"));
    }
}
