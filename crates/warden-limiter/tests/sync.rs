//! Two-node ban synchronization over the in-process bus.

use std::sync::Arc;
use std::time::Duration;
use warden_bus::{InProcessBus, PubSub};
use warden_cache::MemoryRemoteStore;
use warden_config::WardenSettings;
use warden_core::now_millis;
use warden_limiter::{Verdict, WardenNode};

fn settings(cluster_ban_sync: bool) -> WardenSettings {
    WardenSettings::from_toml_str(&format!(
        r#"
        [app]
        app_id = "sync-test"

        [limiter]
        cluster_ban_sync = {cluster_ban_sync}

        [[limiter.routes]]
        route = "/api/login"
        method = "POST"
        rules = [{{ window = "1s", max = 1 }}]
        ban = "1m"
        check = "ip"
        "#
    ))
    .unwrap()
}

async fn start_pair(cluster_ban_sync: bool) -> (WardenNode, WardenNode) {
    let bus: Arc<dyn PubSub> = Arc::new(InProcessBus::new());
    let remote = Arc::new(MemoryRemoteStore::new());
    let settings = settings(cluster_ban_sync);
    let a = WardenNode::start(&settings, bus.clone(), remote.clone())
        .await
        .unwrap();
    let b = WardenNode::start(&settings, bus, remote).await.unwrap();
    (a, b)
}

fn ban_on(node: &WardenNode) {
    let now = now_millis();
    assert!(
        node.limiter()
            .check("POST", "/api/login", Some("10.0.0.1"), None, now)
            .is_allowed()
    );
    assert!(matches!(
        node.limiter()
            .check("POST", "/api/login", Some("10.0.0.1"), None, now + 10),
        Verdict::Limited { .. }
    ));
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

#[tokio::test]
async fn test_bans_propagate_when_sync_enabled() {
    let (a, b) = start_pair(true).await;

    ban_on(&a);
    settle().await;

    // The peer rejects the subject's first request without counting it.
    assert!(matches!(
        b.limiter()
            .check("POST", "/api/login", Some("10.0.0.1"), None, now_millis()),
        Verdict::Limited { .. }
    ));
    // Other subjects on the peer are unaffected.
    assert!(
        b.limiter()
            .check("POST", "/api/login", Some("10.0.0.2"), None, now_millis())
            .is_allowed()
    );
}

#[tokio::test]
async fn test_bans_stay_local_when_sync_disabled() {
    let (a, b) = start_pair(false).await;

    ban_on(&a);
    settle().await;

    assert!(
        b.limiter()
            .check("POST", "/api/login", Some("10.0.0.1"), None, now_millis())
            .is_allowed()
    );
}

#[tokio::test]
async fn test_relive_propagates_when_sync_enabled() {
    let (a, b) = start_pair(true).await;

    ban_on(&a);
    settle().await;
    assert!(matches!(
        b.limiter()
            .check("POST", "/api/login", Some("10.0.0.1"), None, now_millis()),
        Verdict::Limited { .. }
    ));

    let subject = warden_limiter::SubjectKey::ip("10.0.0.1");
    assert!(a.limiter().relive("POST", "/api/login", &subject));
    settle().await;

    assert!(
        b.limiter()
            .ban_remaining("POST", "/api/login", &subject, now_millis())
            .is_none()
    );
}
