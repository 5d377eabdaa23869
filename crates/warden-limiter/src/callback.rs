//! Observer hook for forbid/relive transitions.

use tracing::{info, warn};

use crate::request::SubjectKey;

/// Context for a subject entering the banned state.
#[derive(Debug)]
pub struct ForbidContext<'a> {
    pub route: &'a str,
    pub method: &'a str,
    pub subject: &'a SubjectKey,
    /// Ban deadline in unix epoch milliseconds.
    pub ban_until_millis: u64,
}

/// Context for a subject recovering from a ban.
#[derive(Debug)]
pub struct ReliveContext<'a> {
    pub route: &'a str,
    pub method: &'a str,
    pub subject: &'a SubjectKey,
}

/// Notified on every forbidden request and on ban recovery, e.g. for
/// metrics or alerting.
///
/// Called from request paths under the subject's pool lock; implementations
/// must be fast and must not block.
pub trait RateLimitCallback: Send + Sync {
    fn on_forbid(&self, context: &ForbidContext<'_>);

    fn on_relive(&self, context: &ReliveContext<'_>);
}

/// Default callback: structured log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCallback;

impl RateLimitCallback for LogCallback {
    fn on_forbid(&self, context: &ForbidContext<'_>) {
        warn!(
            route = context.route,
            method = context.method,
            subject = %context.subject,
            ban_until_millis = context.ban_until_millis,
            "Rate limit exceeded, subject banned"
        );
    }

    fn on_relive(&self, context: &ReliveContext<'_>) {
        info!(
            route = context.route,
            method = context.method,
            subject = %context.subject,
            "Subject recovered from ban"
        );
    }
}

/// Callback that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallback;

impl RateLimitCallback for NoopCallback {
    fn on_forbid(&self, _context: &ForbidContext<'_>) {}

    fn on_relive(&self, _context: &ReliveContext<'_>) {}
}
