//! The rate limiter service object.

use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use warden_bus::{BusPublisher, RequestSyncMessage};
use warden_core::now_millis;

use crate::callback::{ForbidContext, RateLimitCallback, ReliveContext};
use crate::request::{Admission, RequestPool, SubjectKey};
use crate::rules::{CheckType, RouteTable};

/// Admission verdict for one request.
///
/// The limiter never produces an HTTP response; collaborators turn a
/// [`Verdict::Limited`] into their own rate-limit reply using the retry
/// hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Limited { retry_after: Duration },
    /// The route's subject key could not be derived (e.g. a user check on
    /// an unauthenticated request). Pass-through by policy.
    NotApplicable,
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed | Self::NotApplicable)
    }
}

/// Per-route sliding-window admission control with ban/relive lifecycle.
///
/// The route table is swapped wholesale on reconfiguration; request pools
/// are per (route, method) and per-subject state mutates under its entry
/// lock, so unrelated subjects never serialize on each other.
pub struct RateLimiter {
    table: ArcSwap<RouteTable>,
    pools: DashMap<(String, String), Arc<RequestPool>>,
    callback: Arc<dyn RateLimitCallback>,
    publisher: Option<BusPublisher>,
    cluster_ban_sync: bool,
}

impl RateLimiter {
    pub fn builder(table: RouteTable) -> RateLimiterBuilder {
        RateLimiterBuilder::new(table)
    }

    /// Classify and admit one request, using the caller's clock.
    ///
    /// Pure in-memory work; never errors for normal traffic.
    pub fn check(
        &self,
        method: &str,
        path: &str,
        ip: Option<&str>,
        user_id: Option<&str>,
        now: u64,
    ) -> Verdict {
        let table = self.table.load();
        let Some((pattern, limits)) = table.resolve(method, path) else {
            return Verdict::Allowed;
        };

        let subjects = match limits.check() {
            CheckType::Ip => match ip {
                Some(ip) => vec![SubjectKey::ip(ip)],
                None => return Verdict::NotApplicable,
            },
            CheckType::User => match user_id {
                Some(user_id) => vec![SubjectKey::user(user_id)],
                None => return Verdict::NotApplicable,
            },
            CheckType::IpAndUser => match (ip, user_id) {
                (Some(ip), Some(user_id)) => {
                    vec![SubjectKey::ip(ip), SubjectKey::user(user_id)]
                }
                _ => return Verdict::NotApplicable,
            },
        };

        let method_upper = method.to_ascii_uppercase();
        let pool = self.pool(pattern, &method_upper);
        let mut relived = Vec::new();
        for subject in subjects {
            match pool.admit(subject.clone(), now, &limits) {
                Admission::Rejected {
                    retry_after_millis,
                    newly_banned,
                } => {
                    self.callback.on_forbid(&ForbidContext {
                        route: pattern,
                        method: &method_upper,
                        subject: &subject,
                        ban_until_millis: now + retry_after_millis,
                    });
                    // Peers only need the transition; rejections during an
                    // existing ban would re-announce the same deadline.
                    if newly_banned {
                        self.broadcast_ban(
                            pattern,
                            &method_upper,
                            &subject,
                            Some(now + retry_after_millis),
                        );
                    }
                    return Verdict::Limited {
                        retry_after: Duration::from_millis(retry_after_millis),
                    };
                }
                Admission::Accepted { relived: true } => relived.push(subject),
                Admission::Accepted { relived: false } => {}
            }
        }
        for subject in relived {
            self.callback.on_relive(&ReliveContext {
                route: pattern,
                method: &method_upper,
                subject: &subject,
            });
        }
        Verdict::Allowed
    }

    /// [`Self::check`] against the system clock.
    pub fn check_now(
        &self,
        method: &str,
        path: &str,
        ip: Option<&str>,
        user_id: Option<&str>,
    ) -> Verdict {
        self.check(method, path, ip, user_id, now_millis())
    }

    /// Administrative unban: clears the subject's ban immediately.
    pub fn relive(&self, method: &str, route: &str, subject: &SubjectKey) -> bool {
        let method_upper = method.to_ascii_uppercase();
        let cleared = self
            .pools
            .get(&(route.to_string(), method_upper.clone()))
            .map(|pool| pool.relive(subject))
            .unwrap_or(false);
        if cleared {
            self.callback.on_relive(&ReliveContext {
                route,
                method: &method_upper,
                subject,
            });
            self.broadcast_ban(route, &method_upper, subject, None);
        }
        cleared
    }

    /// Remaining ban for a subject, if any.
    pub fn ban_remaining(
        &self,
        method: &str,
        route: &str,
        subject: &SubjectKey,
        now: u64,
    ) -> Option<Duration> {
        let pool = self
            .pools
            .get(&(route.to_string(), method.to_ascii_uppercase()))?;
        pool.ban_remaining(subject, now).map(Duration::from_millis)
    }

    /// Replace the whole route table atomically.
    pub fn swap_table(&self, table: RouteTable) {
        self.table.store(Arc::new(table));
    }

    /// Snapshot of the source entries the current table was built from.
    pub fn current_routes(&self) -> Vec<warden_config::RouteLimitSettings> {
        self.table.load().source().to_vec()
    }

    /// Apply a ban-sync message from a peer node.
    ///
    /// No-op unless cluster ban sync is enabled: nodes that opted out keep
    /// strictly per-node bans.
    pub fn apply_sync(&self, message: &RequestSyncMessage) {
        if !self.cluster_ban_sync {
            return;
        }
        let Some(subject) = SubjectKey::parse(&message.subject) else {
            warn!(subject = %message.subject, "Dropping ban-sync with unknown subject form");
            return;
        };
        let pool = self.pool(&message.route, &message.method);
        pool.apply_ban(subject, message.ban_until_millis, now_millis());
        debug!(
            route = %message.route,
            method = %message.method,
            subject = %message.subject,
            ban_until = ?message.ban_until_millis,
            "Applied peer ban-sync"
        );
    }

    /// Spawn the idle-subject garbage collection sweep.
    pub fn spawn_pool_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        idle_for: Duration,
    ) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let now = now_millis();
                let mut evicted = 0;
                for pool in limiter.pools.iter() {
                    evicted += pool.sweep(now, idle_for);
                }
                if evicted > 0 {
                    debug!(evicted, "Request pool sweep");
                }
            }
        })
    }

    fn pool(&self, route: &str, method: &str) -> Arc<RequestPool> {
        self.pools
            .entry((route.to_string(), method.to_string()))
            .or_insert_with(|| Arc::new(RequestPool::new()))
            .clone()
    }

    fn broadcast_ban(
        &self,
        route: &str,
        method: &str,
        subject: &SubjectKey,
        ban_until_millis: Option<u64>,
    ) {
        if !self.cluster_ban_sync {
            return;
        }
        let Some(publisher) = self.publisher.clone() else {
            return;
        };
        let message = RequestSyncMessage {
            route: route.to_string(),
            method: method.to_string(),
            subject: subject.to_string(),
            ban_until_millis,
        };
        // Fire and forget off the request path; a lost message only means
        // peers keep admitting until their own windows trip.
        tokio::spawn(async move {
            publisher.publish_request_sync(message).await;
        });
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("routes", &self.table.load().route_count())
            .field("pools", &self.pools.len())
            .field("cluster_ban_sync", &self.cluster_ban_sync)
            .finish()
    }
}

/// Builder for [`RateLimiter`].
pub struct RateLimiterBuilder {
    table: RouteTable,
    callback: Arc<dyn RateLimitCallback>,
    publisher: Option<BusPublisher>,
    cluster_ban_sync: bool,
}

impl RateLimiterBuilder {
    pub fn new(table: RouteTable) -> Self {
        Self {
            table,
            callback: Arc::new(crate::callback::LogCallback),
            publisher: None,
            cluster_ban_sync: false,
        }
    }

    /// Observer for forbid/relive transitions.
    pub fn callback(mut self, callback: Arc<dyn RateLimitCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Publisher for cluster ban sync and admin version broadcasts.
    pub fn publisher(mut self, publisher: BusPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Synchronize bans cluster-wide (default: per-node).
    pub fn cluster_ban_sync(mut self, enabled: bool) -> Self {
        self.cluster_ban_sync = enabled;
        self
    }

    pub fn build(self) -> RateLimiter {
        RateLimiter {
            table: ArcSwap::from_pointee(self.table),
            pools: DashMap::new(),
            callback: self.callback,
            publisher: self.publisher,
            cluster_ban_sync: self.cluster_ban_sync,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::LimitMeta;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingCallback {
        forbids: Mutex<Vec<String>>,
        relives: Mutex<Vec<String>>,
    }

    impl RateLimitCallback for RecordingCallback {
        fn on_forbid(&self, context: &ForbidContext<'_>) {
            self.forbids.lock().unwrap().push(context.subject.to_string());
        }

        fn on_relive(&self, context: &ReliveContext<'_>) {
            self.relives.lock().unwrap().push(context.subject.to_string());
        }
    }

    fn table() -> RouteTable {
        let mut table = RouteTable::new();
        table
            .register(
                "/api/login",
                "POST",
                LimitMeta::builder()
                    .rule(Duration::from_secs(1), 2)
                    .ban(Duration::from_secs(5))
                    .check(CheckType::Ip)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        table
            .register(
                "/api/users/{id}",
                "GET",
                LimitMeta::builder()
                    .rule(Duration::from_secs(1), 2)
                    .ban(Duration::from_secs(5))
                    .check(CheckType::IpAndUser)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        table
            .register(
                "/api/profile",
                "GET",
                LimitMeta::builder()
                    .rule(Duration::from_secs(1), 2)
                    .ban(Duration::from_secs(5))
                    .check(CheckType::User)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        table
    }

    fn limiter_with(callback: Arc<RecordingCallback>) -> RateLimiter {
        RateLimiter::builder(table()).callback(callback).build()
    }

    #[test]
    fn test_unconfigured_route_is_allowed() {
        let limiter = limiter_with(Arc::new(RecordingCallback::default()));
        assert_eq!(
            limiter.check("GET", "/healthz", Some("10.0.0.1"), None, 0),
            Verdict::Allowed
        );
    }

    #[test]
    fn test_limit_then_ban_then_relive_callbacks() {
        let callback = Arc::new(RecordingCallback::default());
        let limiter = limiter_with(callback.clone());

        assert!(limiter.check("POST", "/api/login", Some("10.0.0.1"), None, 0).is_allowed());
        assert!(limiter.check("POST", "/api/login", Some("10.0.0.1"), None, 100).is_allowed());
        let verdict = limiter.check("POST", "/api/login", Some("10.0.0.1"), None, 200);
        assert_eq!(
            verdict,
            Verdict::Limited {
                retry_after: Duration::from_secs(5)
            }
        );
        assert_eq!(callback.forbids.lock().unwrap().len(), 1);

        // After the ban elapses the next request recovers.
        assert!(
            limiter
                .check("POST", "/api/login", Some("10.0.0.1"), None, 6_000)
                .is_allowed()
        );
        assert_eq!(callback.relives.lock().unwrap().as_slice(), ["ip:10.0.0.1"]);
    }

    #[test]
    fn test_missing_subject_is_not_applicable() {
        let limiter = limiter_with(Arc::new(RecordingCallback::default()));
        assert_eq!(
            limiter.check("POST", "/api/login", None, None, 0),
            Verdict::NotApplicable
        );
        assert_eq!(
            limiter.check("GET", "/api/profile", Some("10.0.0.1"), None, 0),
            Verdict::NotApplicable
        );
        assert_eq!(
            limiter.check("GET", "/api/users/1", Some("10.0.0.1"), None, 0),
            Verdict::NotApplicable
        );
    }

    #[test]
    fn test_ip_and_user_must_both_pass() {
        let limiter = limiter_with(Arc::new(RecordingCallback::default()));

        // Exhaust the shared IP with one user.
        assert!(
            limiter
                .check("GET", "/api/users/1", Some("10.0.0.1"), Some("u1"), 0)
                .is_allowed()
        );
        assert!(
            limiter
                .check("GET", "/api/users/1", Some("10.0.0.1"), Some("u1"), 100)
                .is_allowed()
        );
        let verdict = limiter.check("GET", "/api/users/1", Some("10.0.0.1"), Some("u2"), 200);
        // A different user behind the same IP is still limited.
        assert!(matches!(verdict, Verdict::Limited { .. }));
    }

    #[test]
    fn test_administrative_relive() {
        let callback = Arc::new(RecordingCallback::default());
        let limiter = limiter_with(callback.clone());
        let subject = SubjectKey::ip("10.0.0.9");

        limiter.check("POST", "/api/login", Some("10.0.0.9"), None, 0);
        limiter.check("POST", "/api/login", Some("10.0.0.9"), None, 10);
        limiter.check("POST", "/api/login", Some("10.0.0.9"), None, 20);
        assert!(limiter.ban_remaining("POST", "/api/login", &subject, 30).is_some());

        assert!(limiter.relive("POST", "/api/login", &subject));
        assert!(limiter.ban_remaining("POST", "/api/login", &subject, 30).is_none());
        assert!(
            limiter
                .check("POST", "/api/login", Some("10.0.0.9"), None, 40)
                .is_allowed()
        );
        assert!(!limiter.relive("POST", "/api/login", &subject));
    }

    #[test]
    fn test_swap_table_applies_atomically() {
        let limiter = limiter_with(Arc::new(RecordingCallback::default()));
        let mut replacement = RouteTable::new();
        replacement
            .register(
                "/api/login",
                "POST",
                LimitMeta::builder()
                    .rule(Duration::from_secs(1), 100)
                    .ban(Duration::from_secs(5))
                    .check(CheckType::Ip)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        limiter.swap_table(replacement);

        for call in 0..10 {
            assert!(
                limiter
                    .check("POST", "/api/login", Some("10.0.0.1"), None, call * 10)
                    .is_allowed()
            );
        }
    }
}
