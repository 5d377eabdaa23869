//! # warden-limiter
//!
//! Sliding-window rate limiting with a ban/relive lifecycle, plus the node
//! wiring that assembles the whole runtime.
//!
//! Requests are classified by route pattern and method, then admitted
//! against per-subject sliding windows. A subject that violates a rule is
//! banned for the configured duration; while banned its requests are
//! rejected without being recorded, and the first request after the ban
//! elapses recovers ("relives") the subject. Bans are per-node by default;
//! with `cluster_ban_sync` enabled they are broadcast over the bus so peers
//! converge.
//!
//! Admission ([`RateLimiter::check`]) is synchronous and purely in-memory:
//! it takes the caller's clock as epoch milliseconds and never blocks on
//! the network. [`WardenNode`] wires the limiter together with the tiered
//! cache and the bus listener from validated settings.

pub mod admin;
pub mod callback;
pub mod limiter;
pub mod node;
pub mod path;
pub mod request;
pub mod rules;

pub use admin::{RateLimitAdmin, RateLimitChange};
pub use callback::{ForbidContext, LogCallback, NoopCallback, RateLimitCallback, ReliveContext};
pub use limiter::{RateLimiter, RateLimiterBuilder, Verdict};
pub use node::{NodeError, WardenNode};
pub use path::{PathMatcher, RoutePattern};
pub use request::{Admission, RequestMeta, RequestPool, SubjectKey};
pub use rules::{CheckType, LimitMeta, LimitMetaBuilder, RateRule, RouteTable, SharedRouteTable};
