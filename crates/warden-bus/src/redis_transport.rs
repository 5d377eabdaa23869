//! Redis-backed transport for clustered deployments.
//!
//! Publishing goes through a shared connection manager; each subscribed
//! channel gets a dedicated pub/sub connection whose messages are bridged
//! into a local broadcast channel, so [`crate::BusReceiver`] looks the same
//! regardless of transport.

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::transport::{BusError, BusReceiver, PubSub};

const BRIDGE_CAPACITY: usize = 1024;

impl From<redis::RedisError> for BusError {
    fn from(error: redis::RedisError) -> Self {
        BusError::Transport(error.to_string())
    }
}

/// Redis pub/sub transport.
pub struct RedisBus {
    client: redis::Client,
    manager: ConnectionManager,
    bridges: Arc<DashMap<String, broadcast::Sender<Vec<u8>>>>,
}

impl RedisBus {
    /// Connect to a Redis instance, e.g. `redis://127.0.0.1/`.
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self {
            client,
            manager,
            bridges: Arc::new(DashMap::new()),
        })
    }

    async fn bridge(&self, channel: &str) -> Result<broadcast::Sender<Vec<u8>>, BusError> {
        if let Some(sender) = self.bridges.get(channel) {
            return Ok(sender.clone());
        }

        let (sender, _) = broadcast::channel(BRIDGE_CAPACITY);
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let forward = sender.clone();
        let name = channel.to_string();
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(message) = stream.next().await {
                match message.get_payload::<Vec<u8>>() {
                    Ok(payload) => {
                        let _ = forward.send(payload);
                    }
                    Err(error) => {
                        warn!(channel = %name, %error, "Dropping unreadable redis message");
                    }
                }
            }
            debug!(channel = %name, "Redis subscription ended");
        });

        self.bridges.insert(channel.to_string(), sender.clone());
        Ok(sender)
    }
}

#[async_trait]
impl PubSub for RedisBus {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<usize, BusError> {
        let mut conn = self.manager.clone();
        let receivers: i64 = conn.publish(channel, payload).await?;
        Ok(receivers.max(0) as usize)
    }

    async fn subscribe(&self, channel: &str) -> Result<BusReceiver, BusError> {
        Ok(self.bridge(channel).await?.subscribe())
    }
}

impl std::fmt::Debug for RedisBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBus")
            .field("bridges", &self.bridges.len())
            .finish()
    }
}
