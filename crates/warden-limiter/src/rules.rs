//! Rate-rule configuration: immutable per-route limits and the route table.

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use warden_config::{CheckKind, LimiterSettings, RouteLimitSettings, RuleSettings};
use warden_core::CoreError;

use crate::path::PathMatcher;

/// One sliding-window rule: at most `max` requests per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateRule {
    pub window: Duration,
    pub max: u32,
}

impl RateRule {
    pub fn new(window: Duration, max: u32) -> Self {
        Self { window, max }
    }
}

/// Identity a route's rules are evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckType {
    Ip,
    User,
    IpAndUser,
}

impl From<CheckKind> for CheckType {
    fn from(kind: CheckKind) -> Self {
        match kind {
            CheckKind::Ip => Self::Ip,
            CheckKind::User => Self::User,
            CheckKind::IpAndUser => Self::IpAndUser,
        }
    }
}

/// Immutable limit configuration for one (route pattern, method).
///
/// Rules are evaluated in the order given and evaluation stops at the
/// first violation, so a short burst rule listed first trips before a
/// sustained rule behind it. Created at startup, never mutated; the whole
/// table is replaced on reconfiguration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitMeta {
    rules: Vec<RateRule>,
    ban: Duration,
    check: CheckType,
}

impl LimitMeta {
    pub fn builder() -> LimitMetaBuilder {
        LimitMetaBuilder::default()
    }

    pub fn rules(&self) -> &[RateRule] {
        &self.rules
    }

    pub fn ban(&self) -> Duration {
        self.ban
    }

    pub fn check(&self) -> CheckType {
        self.check
    }

    /// Largest configured window; timestamps older than this are pruned.
    pub fn max_window(&self) -> Duration {
        self.rules
            .iter()
            .map(|rule| rule.window)
            .max()
            .unwrap_or(Duration::ZERO)
    }
}

impl TryFrom<&RouteLimitSettings> for LimitMeta {
    type Error = CoreError;

    fn try_from(settings: &RouteLimitSettings) -> Result<Self, CoreError> {
        let mut builder = LimitMeta::builder()
            .ban(settings.ban)
            .check(settings.check.into());
        for RuleSettings { window, max } in &settings.rules {
            builder = builder.rule(*window, *max);
        }
        builder.build()
    }
}

/// Builder validating limit configuration at registration time.
#[derive(Debug, Default)]
pub struct LimitMetaBuilder {
    rules: Vec<RateRule>,
    ban: Option<Duration>,
    check: Option<CheckType>,
}

impl LimitMetaBuilder {
    /// Append a rule; order is evaluation order.
    pub fn rule(mut self, window: Duration, max: u32) -> Self {
        self.rules.push(RateRule::new(window, max));
        self
    }

    pub fn ban(mut self, ban: Duration) -> Self {
        self.ban = Some(ban);
        self
    }

    pub fn check(mut self, check: CheckType) -> Self {
        self.check = Some(check);
        self
    }

    pub fn build(self) -> Result<LimitMeta, CoreError> {
        if self.rules.is_empty() {
            return Err(CoreError::configuration("limit needs at least one rule"));
        }
        for rule in &self.rules {
            if rule.window.is_zero() {
                return Err(CoreError::configuration("rule window must be positive"));
            }
            if rule.max == 0 {
                return Err(CoreError::configuration("rule max must be positive"));
            }
        }
        let ban = self
            .ban
            .ok_or_else(|| CoreError::configuration("limit needs a ban duration"))?;
        if ban.is_zero() {
            return Err(CoreError::configuration("ban duration must be positive"));
        }
        let check = self
            .check
            .ok_or_else(|| CoreError::configuration("limit needs a check type"))?;
        Ok(LimitMeta {
            rules: self.rules,
            ban,
            check,
        })
    }
}

struct MethodRoutes {
    matcher: PathMatcher,
    limits: HashMap<String, Arc<LimitMeta>>,
}

/// Registry from (route pattern, method) to [`LimitMeta`].
///
/// Immutable once built. Reconfiguration builds a fresh table and swaps it
/// in atomically (see [`SharedRouteTable`]); readers never see a half-built
/// registry.
#[derive(Default)]
pub struct RouteTable {
    by_method: HashMap<String, MethodRoutes>,
    /// Source settings the table was built from; kept so admin modifiers
    /// can derive the successor table.
    source: Vec<RouteLimitSettings>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from validated limiter settings.
    pub fn from_settings(settings: &LimiterSettings) -> Result<Self, CoreError> {
        Self::from_routes(settings.routes.clone())
    }

    /// Build a table from individual route entries.
    pub fn from_routes(routes: Vec<RouteLimitSettings>) -> Result<Self, CoreError> {
        let mut table = Self::new();
        for route in &routes {
            let meta = LimitMeta::try_from(route)?;
            table.register(&route.route, &route.method, meta)?;
        }
        table.source = routes;
        Ok(table)
    }

    /// Register one route's limits. Later registrations for the same
    /// (route, method) replace earlier ones.
    pub fn register(&mut self, route: &str, method: &str, meta: LimitMeta) -> Result<(), CoreError> {
        let method = method.to_ascii_uppercase();
        let routes = self.by_method.entry(method).or_insert_with(|| MethodRoutes {
            matcher: PathMatcher::new(),
            limits: HashMap::new(),
        });
        routes.matcher.register(route)?;
        routes.limits.insert(route.to_string(), Arc::new(meta));
        Ok(())
    }

    /// Resolve a concrete request to its route pattern and limits.
    pub fn resolve(&self, method: &str, path: &str) -> Option<(&str, Arc<LimitMeta>)> {
        let routes = self.by_method.get(&method.to_ascii_uppercase())?;
        let pattern = routes.matcher.resolve(path)?;
        let meta = routes.limits.get(pattern)?.clone();
        Some((pattern, meta))
    }

    pub fn source(&self) -> &[RouteLimitSettings] {
        &self.source
    }

    pub fn route_count(&self) -> usize {
        self.by_method.values().map(|routes| routes.limits.len()).sum()
    }
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable")
            .field("routes", &self.route_count())
            .finish()
    }
}

/// Atomically swappable route table handle.
pub type SharedRouteTable = ArcSwap<RouteTable>;
