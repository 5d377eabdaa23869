//! L2: tiered cache composing the local store with a remote shared store.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use warden_bus::{BusHandler, BusPublisher, CacheMessage, CacheOp};
use warden_core::NodeId;

use crate::entry::TtlPolicy;
use crate::error::CacheError;
use crate::local::LocalStore;
use crate::remote::RemoteStore;

const DEFAULT_MAX_ENTRIES: usize = 10_000;
const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(2);

/// Two-level cache: cache-aside reads, write-through writes.
///
/// Reads check the local store first and fall back to the remote store,
/// populating the local store with the configured default TTL. Writes go to
/// the remote store first; only on remote success is the local store
/// mutated and an invalidation published, so a write that could not reach
/// the remote is never perceived as durable.
///
/// Peers receive the invalidation and evict; they never receive the value.
/// Propagating values would need total ordering across nodes, whereas
/// invalidations only need at-least-once delivery and idempotent eviction.
pub struct TieredCache {
    local: Arc<LocalStore>,
    remote: Arc<dyn RemoteStore>,
    remote_timeout: Duration,
    remote_ttl: Option<Duration>,
    default_ttl: TtlPolicy,
    publisher: Option<BusPublisher>,
}

impl TieredCache {
    pub fn builder(remote: Arc<dyn RemoteStore>) -> TieredCacheBuilder {
        TieredCacheBuilder::new(remote)
    }

    /// The L1 store, e.g. for spawning its expiry sweeper.
    pub fn local(&self) -> &Arc<LocalStore> {
        &self.local
    }

    /// Cache-aside read.
    ///
    /// A remote failure is an error, not a miss: the caller must treat it
    /// as "unknown".
    pub async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        if let Some(value) = self.local.get(key) {
            return Ok(Some(value));
        }
        let remote = self.remote.clone();
        let fetched = self
            .with_timeout(async move { remote.get(key).await })
            .await?;
        if let Some(value) = &fetched {
            self.local.set(key, value.clone(), self.default_ttl);
            debug!(key, "Populated local store from remote");
        }
        Ok(fetched)
    }

    /// Write-through set with the configured default TTL.
    pub async fn set(&self, key: &str, value: Value) -> Result<(), CacheError> {
        self.set_with_ttl(key, value, self.default_ttl).await
    }

    /// Write-through set with an explicit TTL policy for the local copy.
    pub async fn set_with_ttl(
        &self,
        key: &str,
        value: Value,
        ttl: TtlPolicy,
    ) -> Result<(), CacheError> {
        let remote = self.remote.clone();
        let remote_value = value.clone();
        let remote_ttl = self.remote_ttl;
        self.with_timeout(async move { remote.set(key, remote_value, remote_ttl).await })
            .await?;
        self.local.set(key, value, ttl);
        self.publish(CacheMessage::invalidate(key)).await;
        Ok(())
    }

    /// Write-through delete.
    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let remote = self.remote.clone();
        let removed = self
            .with_timeout(async move { remote.delete(key).await })
            .await?;
        self.local.delete(key);
        self.publish(CacheMessage::invalidate(key)).await;
        Ok(removed)
    }

    /// Write-through prefix delete.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let remote = self.remote.clone();
        let removed = self
            .with_timeout(async move { remote.delete_prefix(prefix).await })
            .await?;
        self.local.delete_prefix(prefix);
        self.publish(CacheMessage::clear_prefix(prefix)).await;
        Ok(removed)
    }

    /// Existence check: local first, then remote.
    pub async fn contains_key(&self, key: &str) -> Result<bool, CacheError> {
        if self.local.contains_key(key) {
            return Ok(true);
        }
        let remote = self.remote.clone();
        self.with_timeout(async move { remote.contains_key(key).await })
            .await
    }

    /// Typed cache-aside read.
    pub async fn get_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Typed write-through set.
    pub async fn set_value<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        self.set(key, serde_json::to_value(value)?).await
    }

    /// Apply an invalidation received from a peer node.
    ///
    /// Idempotent pure-local eviction; safe to call from the bus listener's
    /// background task.
    pub fn apply_message(&self, message: &CacheMessage) {
        match message.op {
            CacheOp::Invalidate => {
                self.local.delete(&message.key);
            }
            CacheOp::ClearPrefix => {
                self.local.delete_prefix(&message.key);
            }
        }
    }

    async fn publish(&self, message: CacheMessage) {
        if let Some(publisher) = &self.publisher {
            publisher.publish_cache(message).await;
        }
    }

    async fn with_timeout<T>(
        &self,
        operation: impl Future<Output = Result<T, CacheError>> + Send,
    ) -> Result<T, CacheError> {
        match tokio::time::timeout(self.remote_timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::store_unavailable(format!(
                "remote store timed out after {:?}",
                self.remote_timeout
            ))),
        }
    }
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("local", &self.local)
            .field("remote_timeout", &self.remote_timeout)
            .finish()
    }
}

/// Builder for [`TieredCache`].
pub struct TieredCacheBuilder {
    remote: Arc<dyn RemoteStore>,
    max_entries: usize,
    remote_timeout: Duration,
    remote_ttl: Option<Duration>,
    default_ttl: TtlPolicy,
    publisher: Option<BusPublisher>,
}

impl TieredCacheBuilder {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            remote,
            max_entries: DEFAULT_MAX_ENTRIES,
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
            remote_ttl: None,
            default_ttl: TtlPolicy::INFINITE,
            publisher: None,
        }
    }

    /// Capacity of the local store.
    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Timeout applied to every remote-store call.
    pub fn remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    /// Backend-side expiry hint passed to the remote store on writes.
    pub fn remote_ttl(mut self, ttl: Duration) -> Self {
        self.remote_ttl = Some(ttl);
        self
    }

    /// TTL policy applied to local copies (reads and default writes).
    pub fn default_ttl(mut self, ttl: TtlPolicy) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Publisher for cross-node invalidations. Without one the cache runs
    /// single-node and publishes nothing.
    pub fn publisher(mut self, publisher: BusPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn build(self) -> TieredCache {
        TieredCache {
            local: Arc::new(LocalStore::new(self.max_entries)),
            remote: self.remote,
            remote_timeout: self.remote_timeout,
            remote_ttl: self.remote_ttl,
            default_ttl: self.default_ttl,
            publisher: self.publisher,
        }
    }
}

/// Bus handler that evicts local copies on peer invalidations.
pub struct CacheInvalidationHandler {
    cache: Arc<TieredCache>,
}

impl CacheInvalidationHandler {
    pub fn new(cache: Arc<TieredCache>) -> Self {
        Self { cache }
    }
}

impl BusHandler for CacheInvalidationHandler {
    fn on_cache(&self, origin: NodeId, message: &CacheMessage) {
        debug!(%origin, key = %message.key, op = ?message.op, "Applying peer invalidation");
        self.cache.apply_message(message);
    }
}
