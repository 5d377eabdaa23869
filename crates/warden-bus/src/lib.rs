//! # warden-bus
//!
//! Publish/subscribe fan-out of typed invalidation messages across cluster
//! nodes.
//!
//! Every node publishes on three channels, namespaced by application
//! identity (`{app_id}:cache`, `{app_id}:version`, `{app_id}:request-sync`),
//! and subscribes to all three at startup. Messages carry the origin node's
//! id; a subscriber that receives its own message must drop it, because the
//! originating node already applied the change before publishing.
//!
//! Delivery is at-most-once and unordered across publishers. A node that
//! misses a message serves stale local data until the entry's own TTL
//! expires; the TTL is the staleness bound, the bus is only the fast path.
//!
//! Transports implement the [`PubSub`] trait. [`InProcessBus`] backs
//! single-node deployments and tests; a Redis-backed transport is available
//! behind the `redis-bus` feature for real clusters.

pub mod listener;
pub mod message;
pub mod publisher;
#[cfg(feature = "redis-bus")]
pub mod redis_transport;
pub mod transport;

pub use listener::{BusHandler, BusListener};
pub use message::{
    CacheMessage, CacheOp, ChannelKind, Envelope, Message, RequestSyncMessage, VersionMessage,
};
pub use publisher::BusPublisher;
#[cfg(feature = "redis-bus")]
pub use redis_transport::RedisBus;
pub use transport::{BusError, BusReceiver, InProcessBus, PubSub};
