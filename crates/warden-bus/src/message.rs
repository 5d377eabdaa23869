//! Message envelope and typed bus messages.

use serde::{Deserialize, Serialize};
use warden_core::{AppId, NodeId, now_millis};

use crate::transport::BusError;

/// The three logical channels every node publishes and subscribes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelKind {
    /// Cache invalidation events.
    Cache,
    /// Administrative "version changed" events.
    Version,
    /// Rate-limit ban synchronization events.
    RequestSync,
}

impl ChannelKind {
    /// All channels, in the order nodes subscribe to them.
    pub fn all() -> &'static [ChannelKind] {
        &[Self::Cache, Self::Version, Self::RequestSync]
    }

    /// Suffix used in the channel name.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Version => "version",
            Self::RequestSync => "request-sync",
        }
    }

    /// Fully-qualified channel name for an application.
    pub fn channel_name(&self, app_id: &AppId) -> String {
        format!("{}:{}", app_id, self.suffix())
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Operation carried by a cache invalidation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOp {
    /// Drop the local entry for `key`.
    Invalidate,
    /// Drop all local entries whose key starts with `key`.
    ClearPrefix,
}

/// Broadcast whenever a node mutates the remote store.
///
/// Instructs every *other* node to drop its local copy. The new value is
/// never pushed; peers refetch on demand, so no merge logic is needed and
/// at-least-once delivery plus idempotent eviction suffices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMessage {
    pub key: String,
    pub op: CacheOp,
}

impl CacheMessage {
    pub fn invalidate(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            op: CacheOp::Invalidate,
        }
    }

    pub fn clear_prefix(prefix: impl Into<String>) -> Self {
        Self {
            key: prefix.into(),
            op: CacheOp::ClearPrefix,
        }
    }
}

/// Administrative change descriptor.
///
/// The payload is opaque to the bus; consumers rebuild derived in-memory
/// state (permission indexes, rate-rule tables) from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionMessage {
    pub payload: serde_json::Value,
}

/// Cluster ban synchronization event (opt-in).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSyncMessage {
    pub route: String,
    pub method: String,
    pub subject: String,
    /// Ban deadline in unix epoch milliseconds; `None` clears the ban.
    pub ban_until_millis: Option<u64>,
}

/// Typed message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Cache(CacheMessage),
    Version(VersionMessage),
    RequestSync(RequestSyncMessage),
}

impl Message {
    /// Channel this message belongs on.
    pub fn channel(&self) -> ChannelKind {
        match self {
            Self::Cache(_) => ChannelKind::Cache,
            Self::Version(_) => ChannelKind::Version,
            Self::RequestSync(_) => ChannelKind::RequestSync,
        }
    }
}

/// Wire envelope for every bus message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub app_id: AppId,
    pub channel: ChannelKind,
    pub origin: NodeId,
    /// Publish time in unix epoch milliseconds.
    pub timestamp: u64,
    pub payload: Message,
}

impl Envelope {
    /// Build an envelope stamped with the local node identity and clock.
    pub fn new(app_id: AppId, origin: NodeId, payload: Message) -> Self {
        Self {
            channel: payload.channel(),
            app_id,
            origin,
            timestamp: now_millis(),
            payload,
        }
    }

    /// Serialize for the wire.
    pub fn encode(&self) -> Result<Vec<u8>, BusError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from the wire.
    pub fn decode(bytes: &[u8]) -> Result<Self, BusError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
