//! # warden-config
//!
//! Settings for the warden authorization runtime.
//!
//! Configuration is loaded once at startup and validated before any
//! component is built, so malformed rules fail fast instead of surfacing
//! at request time. Durations accept humantime strings (`"500ms"`, `"1m"`).
//!
//! ```toml
//! [app]
//! app_id = "orders"
//!
//! [cache]
//! max_entries = 10000
//! default_ttl = "1h"
//! remote_timeout = "2s"
//!
//! [[limiter.routes]]
//! route = "/api/login"
//! method = "POST"
//! rules = [{ window = "1s", max = 1 }, { window = "1m", max = 20 }]
//! ban = "5m"
//! check = "ip"
//! ```

mod error;
mod settings;

pub use error::ConfigError;
pub use settings::{
    AppSettings, CacheSettings, CheckKind, LimiterSettings, RouteLimitSettings, RuleSettings,
    WardenSettings,
};
