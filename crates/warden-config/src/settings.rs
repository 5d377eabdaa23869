//! Settings structures and validation.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use crate::error::ConfigError;

/// Top-level runtime settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WardenSettings {
    #[serde(default)]
    pub app: AppSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub limiter: LimiterSettings,
}

impl WardenSettings {
    /// Parse settings from a TOML string and validate them.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let settings: WardenSettings = toml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a TOML file and validate them.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// Fail-fast validation: every rule that would misbehave at request
    /// time is rejected here instead.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app.app_id.is_empty() {
            return Err(ConfigError::invalid("app.app_id must not be empty"));
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::invalid("cache.max_entries must be positive"));
        }
        if self.cache.remote_timeout.is_zero() {
            return Err(ConfigError::invalid("cache.remote_timeout must be positive"));
        }
        for route in &self.limiter.routes {
            route.validate()?;
        }
        Ok(())
    }
}

/// Application identity settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppSettings {
    /// Namespaces bus channels; must match across cluster nodes.
    #[serde(default = "default_app_id")]
    pub app_id: String,
    /// Pinned node id; omitted means a random id per process.
    #[serde(default)]
    pub node_id: Option<Uuid>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            app_id: default_app_id(),
            node_id: None,
        }
    }
}

fn default_app_id() -> String {
    "warden".to_string()
}

/// Tiered-cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Local TTL applied to entries populated from the remote store.
    #[serde(with = "humantime_serde", default = "default_cache_ttl")]
    pub default_ttl: Duration,
    #[serde(with = "humantime_serde", default = "default_remote_timeout")]
    pub remote_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_sweep_interval")]
    pub sweep_interval: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            default_ttl: default_cache_ttl(),
            remote_timeout: default_remote_timeout(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

fn default_max_entries() -> usize {
    10_000
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(3600)
}

fn default_remote_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

/// Rate-limiter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimiterSettings {
    /// Interval of the idle-subject garbage collection sweep.
    #[serde(with = "humantime_serde", default = "default_pool_sweep_interval")]
    pub pool_sweep_interval: Duration,
    /// Synchronize bans cluster-wide over the request-sync channel.
    /// Off by default: bans are per-node unless explicitly opted in.
    #[serde(default)]
    pub cluster_ban_sync: bool,
    #[serde(default)]
    pub routes: Vec<RouteLimitSettings>,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            pool_sweep_interval: default_pool_sweep_interval(),
            cluster_ban_sync: false,
            routes: Vec::new(),
        }
    }
}

fn default_pool_sweep_interval() -> Duration {
    Duration::from_secs(300)
}

/// Identity a rate rule is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Ip,
    User,
    IpAndUser,
}

/// One sliding-window rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSettings {
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    pub max: u32,
}

/// Rate limits for one route and method.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteLimitSettings {
    pub route: String,
    pub method: String,
    /// Evaluated in the order listed; the first violated rule bans.
    pub rules: Vec<RuleSettings>,
    #[serde(with = "humantime_serde")]
    pub ban: Duration,
    pub check: CheckKind,
}

impl RouteLimitSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.route.is_empty() {
            return Err(ConfigError::invalid("limiter route must not be empty"));
        }
        if self.method.is_empty() {
            return Err(ConfigError::invalid(format!(
                "limiter route '{}' has an empty method",
                self.route
            )));
        }
        if self.rules.is_empty() {
            return Err(ConfigError::invalid(format!(
                "limiter route '{}' has no rules",
                self.route
            )));
        }
        for rule in &self.rules {
            if rule.window.is_zero() {
                return Err(ConfigError::invalid(format!(
                    "limiter route '{}' has a zero-width window",
                    self.route
                )));
            }
            if rule.max == 0 {
                return Err(ConfigError::invalid(format!(
                    "limiter route '{}' has a rule with max = 0",
                    self.route
                )));
            }
        }
        if self.ban.is_zero() {
            return Err(ConfigError::invalid(format!(
                "limiter route '{}' has a zero ban duration",
                self.route
            )));
        }
        Ok(())
    }
}
