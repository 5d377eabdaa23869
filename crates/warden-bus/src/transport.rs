//! Transport abstraction and the in-process implementation.
//!
//! The core depends only on the [`PubSub`] capability; the in-process
//! transport backs single-node deployments and tests, and a broker-backed
//! transport (see `redis_transport`) backs real clusters.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

/// Default per-channel buffer. Slow subscribers beyond this lag drop the
/// oldest messages; the entry TTL bounds the resulting staleness.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Errors raised by bus transports.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Bus serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Bus transport error: {0}")]
    Transport(String),

    #[error("Channel closed: {0}")]
    Closed(String),
}

impl BusError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}

/// Receiving half of a channel subscription.
pub type BusReceiver = broadcast::Receiver<Vec<u8>>;

/// Publish/subscribe capability by channel name.
///
/// Payloads are opaque bytes; the envelope codec lives above the transport.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publish a payload to a channel.
    ///
    /// Returns the number of subscribers that received it (0 is not an
    /// error: invalidation is best-effort by design).
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<usize, BusError>;

    /// Subscribe to a channel.
    ///
    /// Only messages published after subscription are received.
    async fn subscribe(&self, channel: &str) -> Result<BusReceiver, BusError>;
}

/// In-process transport on tokio broadcast channels.
///
/// Per-publisher FIFO ordering, at-most-once delivery. Cloning shares the
/// underlying channels, so handing clones to several "nodes" in a test
/// simulates a cluster sharing one broker.
#[derive(Clone)]
pub struct InProcessBus {
    channels: Arc<DashMap<String, broadcast::Sender<Vec<u8>>>>,
    capacity: usize,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity,
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Number of active subscribers on a channel.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for InProcessBus {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<usize, BusError> {
        // send only fails when there are no receivers; that is a no-op here.
        Ok(self.sender(channel).send(payload).unwrap_or_default())
    }

    async fn subscribe(&self, channel: &str) -> Result<BusReceiver, BusError> {
        Ok(self.sender(channel).subscribe())
    }
}

impl std::fmt::Debug for InProcessBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessBus")
            .field("channels", &self.channels.len())
            .finish()
    }
}
