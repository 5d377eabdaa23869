//! Two-node cluster simulation over the in-process bus.
//!
//! Both "nodes" share one remote store and one transport, the way real
//! nodes share a backend and a broker, but each has its own local store,
//! node id, and listener.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use warden_bus::{BusListener, BusPublisher, InProcessBus};
use warden_cache::{CacheInvalidationHandler, MemoryRemoteStore, TieredCache};
use warden_core::{AppId, NodeId};

struct Node {
    cache: Arc<TieredCache>,
    _listener: BusListener,
}

async fn start_node(bus: Arc<InProcessBus>, remote: MemoryRemoteStore, app: &AppId) -> Node {
    let node_id = NodeId::generate();
    let publisher = BusPublisher::new(bus.clone(), app.clone(), node_id);
    let cache = Arc::new(
        TieredCache::builder(Arc::new(remote))
            .max_entries(64)
            .publisher(publisher)
            .build(),
    );
    let listener = BusListener::start(
        bus,
        app.clone(),
        node_id,
        Arc::new(CacheInvalidationHandler::new(cache.clone())),
    )
    .await
    .unwrap();
    Node {
        cache,
        _listener: listener,
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

#[tokio::test]
async fn delete_on_one_node_evicts_the_other() {
    let bus = Arc::new(InProcessBus::new());
    let remote = MemoryRemoteStore::new();
    let app = AppId::new("cluster-test");

    let node_a = start_node(bus.clone(), remote.clone(), &app).await;
    let node_b = start_node(bus, remote, &app).await;
    settle().await;

    node_a.cache.set("k", json!("v")).await.unwrap();
    // Node B pulls the value into its local store.
    assert_eq!(node_b.cache.get("k").await.unwrap(), Some(json!("v")));
    assert_eq!(node_b.cache.local().get("k"), Some(json!("v")));

    node_a.cache.delete("k").await.unwrap();
    settle().await;

    // B's local copy is gone without B ever receiving a replacement value.
    assert_eq!(node_b.cache.local().get("k"), None);
    assert_eq!(node_b.cache.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn update_invalidates_peers_who_then_refetch() {
    let bus = Arc::new(InProcessBus::new());
    let remote = MemoryRemoteStore::new();
    let app = AppId::new("cluster-test");

    let node_a = start_node(bus.clone(), remote.clone(), &app).await;
    let node_b = start_node(bus, remote, &app).await;
    settle().await;

    node_a.cache.set("perm:u1", json!(["read"])).await.unwrap();
    assert_eq!(
        node_b.cache.get("perm:u1").await.unwrap(),
        Some(json!(["read"]))
    );

    node_a
        .cache
        .set("perm:u1", json!(["read", "write"]))
        .await
        .unwrap();
    settle().await;

    // The invalidation evicted B's copy; the next read goes to the remote.
    assert_eq!(node_b.cache.local().get("perm:u1"), None);
    assert_eq!(
        node_b.cache.get("perm:u1").await.unwrap(),
        Some(json!(["read", "write"]))
    );
}

#[tokio::test]
async fn prefix_clear_crosses_nodes() {
    let bus = Arc::new(InProcessBus::new());
    let remote = MemoryRemoteStore::new();
    let app = AppId::new("cluster-test");

    let node_a = start_node(bus.clone(), remote.clone(), &app).await;
    let node_b = start_node(bus, remote, &app).await;
    settle().await;

    node_a.cache.set("session:1", json!(1)).await.unwrap();
    node_a.cache.set("session:2", json!(2)).await.unwrap();
    node_b.cache.get("session:1").await.unwrap();
    node_b.cache.get("session:2").await.unwrap();

    node_a.cache.delete_prefix("session:").await.unwrap();
    settle().await;

    assert_eq!(node_b.cache.local().get("session:1"), None);
    assert_eq!(node_b.cache.local().get("session:2"), None);
    assert_eq!(node_b.cache.get("session:1").await.unwrap(), None);
}

#[tokio::test]
async fn originating_node_does_not_double_apply() {
    let bus = Arc::new(InProcessBus::new());
    let remote = MemoryRemoteStore::new();
    let app = AppId::new("cluster-test");

    let node_a = start_node(bus, remote, &app).await;
    settle().await;

    // A's own invalidation must not evict the copy it just wrote.
    node_a.cache.set("k", json!("v")).await.unwrap();
    settle().await;
    assert_eq!(node_a.cache.local().get("k"), Some(json!("v")));
}
