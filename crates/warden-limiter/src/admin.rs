//! Runtime modification of rate-limit rules.
//!
//! Changes rebuild the route table from its source entries and swap it in
//! atomically; a change that fails validation leaves the running table
//! untouched. Applied changes are broadcast on the version channel so peer
//! nodes converge on the same rules.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use warden_bus::{BusPublisher, VersionMessage};
use warden_config::RouteLimitSettings;
use warden_core::{ApiReply, CoreError};

use crate::limiter::RateLimiter;
use crate::rules::RouteTable;

/// One administrative change to the route table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RateLimitChange {
    /// Add limits for a route, replacing any existing entry for the same
    /// (route, method).
    Upsert(RouteLimitSettings),
    /// Drop the limits for a (route, method); the route runs unlimited
    /// afterwards.
    Remove { route: String, method: String },
}

/// Applies [`RateLimitChange`]s to a limiter and broadcasts them.
pub struct RateLimitAdmin {
    limiter: Arc<RateLimiter>,
    publisher: Option<BusPublisher>,
}

impl RateLimitAdmin {
    pub fn new(limiter: Arc<RateLimiter>, publisher: Option<BusPublisher>) -> Self {
        Self { limiter, publisher }
    }

    /// Apply a change locally and broadcast it to peers.
    pub async fn modify(&self, change: RateLimitChange) -> ApiReply<serde_json::Value> {
        let routes = match self.apply(&change) {
            Ok(routes) => routes,
            Err(error) => return ApiReply::error(warden_core::CODE_INVALID, error.to_string()),
        };
        if let Some(publisher) = &self.publisher {
            match serde_json::to_value(&change) {
                Ok(payload) => {
                    publisher
                        .publish_version(VersionMessage { payload })
                        .await;
                }
                Err(error) => warn!(%error, "Rate-limit change not broadcastable"),
            }
        }
        info!(routes, "Rate-limit rules modified");
        ApiReply::ok(json!({ "routes": routes }))
    }

    /// Apply a change received from a peer node, without re-broadcasting.
    pub fn apply_remote(&self, message: &VersionMessage) {
        let change: RateLimitChange = match serde_json::from_value(message.payload.clone()) {
            Ok(change) => change,
            Err(error) => {
                warn!(%error, "Dropping undecodable rate-limit change");
                return;
            }
        };
        match self.apply(&change) {
            Ok(routes) => info!(routes, "Applied peer rate-limit change"),
            Err(error) => warn!(%error, "Peer rate-limit change rejected"),
        }
    }

    /// Build and swap the successor table. Returns the new route count.
    fn apply(&self, change: &RateLimitChange) -> Result<usize, CoreError> {
        let mut routes = self.limiter.current_routes();
        match change {
            RateLimitChange::Upsert(entry) => {
                routes.retain(|existing| !same_route(existing, &entry.route, &entry.method));
                routes.push(entry.clone());
            }
            RateLimitChange::Remove { route, method } => {
                let before = routes.len();
                routes.retain(|existing| !same_route(existing, route, method));
                if routes.len() == before {
                    return Err(CoreError::configuration(format!(
                        "no limits registered for {method} {route}"
                    )));
                }
            }
        }
        let table = RouteTable::from_routes(routes)?;
        let count = table.route_count();
        self.limiter.swap_table(table);
        Ok(count)
    }
}

fn same_route(entry: &RouteLimitSettings, route: &str, method: &str) -> bool {
    entry.route == route && entry.method.eq_ignore_ascii_case(method)
}
