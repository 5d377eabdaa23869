//! # warden-cache
//!
//! Two-level cache for the warden authorization runtime.
//!
//! - [`LocalStore`] (L1): in-memory concurrent store with per-entry TTL
//!   policies, LRU capacity eviction, and a background expiry sweep.
//! - [`TieredCache`] (L2): composes the local store with a shared
//!   [`RemoteStore`], reading cache-aside and writing through, and
//!   broadcasts invalidations so peer nodes evict their local copies.
//!
//! Cross-node consistency is eventual: writes invalidate peers rather than
//! replicate values, and the per-entry TTL bounds worst-case staleness when
//! an invalidation is lost.

pub mod entry;
pub mod error;
pub mod local;
#[cfg(feature = "redis-store")]
pub mod redis_store;
pub mod remote;
pub mod tiered;

pub use entry::{CacheEntry, TtlPolicy};
pub use error::CacheError;
pub use local::{LocalStore, LocalStoreStats};
#[cfg(feature = "redis-store")]
pub use redis_store::RedisStore;
pub use remote::{MemoryRemoteStore, RemoteStore};
pub use tiered::{CacheInvalidationHandler, TieredCache, TieredCacheBuilder};

/// Type alias for cache results.
pub type CacheResult<T> = Result<T, CacheError>;
