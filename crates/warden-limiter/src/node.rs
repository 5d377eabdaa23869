//! One node of the runtime: cache, limiter, and bus wiring assembled from
//! settings.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;
use warden_bus::{
    BusError, BusHandler, BusListener, BusPublisher, CacheMessage, PubSub, RequestSyncMessage,
    VersionMessage,
};
use warden_cache::{RemoteStore, TieredCache, TtlPolicy};
use warden_config::WardenSettings;
use warden_core::{AppId, CoreError, NodeId};

use crate::admin::RateLimitAdmin;
use crate::limiter::RateLimiter;
use crate::rules::RouteTable;

/// Subjects idle this long past the last sweep are dropped from the pools.
const POOL_IDLE_GRACE: Duration = Duration::from_secs(600);

/// Startup failure of a node.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid configuration: {0}")]
    Configuration(#[from] CoreError),
    #[error("bus subscription failed: {0}")]
    Bus(#[from] BusError),
}

/// A fully wired runtime node.
///
/// Owns the tiered cache, the rate limiter, the admin handle, the bus
/// listener, and the background sweepers. Dropping the node stops all of
/// its background tasks.
pub struct WardenNode {
    node_id: NodeId,
    cache: Arc<TieredCache>,
    limiter: Arc<RateLimiter>,
    admin: Arc<RateLimitAdmin>,
    listener: BusListener,
    sweepers: Vec<JoinHandle<()>>,
}

impl WardenNode {
    /// Build every component from settings, subscribe to the bus, and
    /// start the background sweepers.
    pub async fn start(
        settings: &WardenSettings,
        bus: Arc<dyn PubSub>,
        remote: Arc<dyn RemoteStore>,
    ) -> Result<Self, NodeError> {
        let app_id = AppId::new(&settings.app.app_id);
        let node_id = settings
            .app
            .node_id
            .map(NodeId::from_uuid)
            .unwrap_or_else(NodeId::generate);
        let publisher = BusPublisher::new(bus.clone(), app_id.clone(), node_id);

        let cache = Arc::new(
            TieredCache::builder(remote)
                .max_entries(settings.cache.max_entries)
                .remote_timeout(settings.cache.remote_timeout)
                .remote_ttl(settings.cache.default_ttl)
                .default_ttl(TtlPolicy::after_create(settings.cache.default_ttl))
                .publisher(publisher.clone())
                .build(),
        );

        let table = RouteTable::from_settings(&settings.limiter)?;
        let limiter = Arc::new(
            RateLimiter::builder(table)
                .publisher(publisher.clone())
                .cluster_ban_sync(settings.limiter.cluster_ban_sync)
                .build(),
        );
        let admin = Arc::new(RateLimitAdmin::new(limiter.clone(), Some(publisher)));

        let handler = Arc::new(NodeHandler {
            cache: cache.clone(),
            limiter: limiter.clone(),
            admin: admin.clone(),
        });
        let listener = BusListener::start(bus, app_id.clone(), node_id, handler).await?;

        let sweepers = vec![
            cache.local().spawn_sweeper(settings.cache.sweep_interval),
            limiter.spawn_pool_sweeper(settings.limiter.pool_sweep_interval, POOL_IDLE_GRACE),
        ];
        info!(%app_id, %node_id, "Warden node started");

        Ok(Self {
            node_id,
            cache,
            limiter,
            admin,
            listener,
            sweepers,
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn admin(&self) -> &Arc<RateLimitAdmin> {
        &self.admin
    }

    /// Stop the listener and the background sweepers.
    pub fn shutdown(&self) {
        self.listener.shutdown();
        for sweeper in &self.sweepers {
            sweeper.abort();
        }
    }
}

impl Drop for WardenNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WardenNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WardenNode")
            .field("node_id", &self.node_id)
            .finish()
    }
}

/// Routes incoming bus messages to the owning component.
struct NodeHandler {
    cache: Arc<TieredCache>,
    limiter: Arc<RateLimiter>,
    admin: Arc<RateLimitAdmin>,
}

impl BusHandler for NodeHandler {
    fn on_cache(&self, _origin: NodeId, message: &CacheMessage) {
        self.cache.apply_message(message);
    }

    fn on_version(&self, _origin: NodeId, message: &VersionMessage) {
        self.admin.apply_remote(message);
    }

    fn on_request_sync(&self, _origin: NodeId, message: &RequestSyncMessage) {
        self.limiter.apply_sync(message);
    }
}
