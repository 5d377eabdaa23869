//! Remote shared store contract and the in-memory implementation.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::time::Duration;

use crate::error::CacheError;

/// Shared store behind the tiered cache (L2's remote half).
///
/// Implementations must treat failures as failures: a read that cannot
/// reach the backend returns [`CacheError::StoreUnavailable`], never
/// `Ok(None)`.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Store a value, with an optional backend-side expiry.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Remove a key. Returns whether it was present.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Remove all keys starting with `prefix`. Returns how many went.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError>;

    async fn contains_key(&self, key: &str) -> Result<bool, CacheError>;
}

/// In-memory remote store for single-node deployments and tests.
///
/// Backend-side TTLs are ignored: entries live until deleted. Cloning
/// shares the underlying map, so several tiered caches in a test can share
/// one "remote" the way cluster nodes share a real backend.
#[derive(Clone, Default)]
pub struct MemoryRemoteStore {
    entries: std::sync::Arc<DashMap<String, Value>>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        Ok(self.entries.get(key).map(|entry| entry.clone()))
    }

    async fn set(&self, key: &str, value: Value, _ttl: Option<Duration>) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - self.entries.len())
    }

    async fn contains_key(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.contains_key(key))
    }
}

impl std::fmt::Debug for MemoryRemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRemoteStore")
            .field("len", &self.entries.len())
            .finish()
    }
}
