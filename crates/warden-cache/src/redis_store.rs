//! Redis-backed remote store for clustered deployments.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde_json::Value;
use std::time::Duration;

use crate::error::CacheError;
use crate::remote::RemoteStore;

impl From<redis::RedisError> for CacheError {
    fn from(error: redis::RedisError) -> Self {
        CacheError::store_unavailable(error.to_string())
    }
}

/// Remote store on a shared Redis instance.
///
/// Values are stored as JSON strings; the optional write TTL maps to
/// `SET ... EX`.
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connect to a Redis instance, e.g. `redis://127.0.0.1/`.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        let raw = serde_json::to_string(&value)?;
        match ttl {
            Some(ttl) => {
                let secs = ttl.as_secs().max(1);
                let _: () = conn.set_ex(key, raw, secs).await?;
            }
            None => {
                let _: () = conn.set(key, raw).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.manager.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let pattern = format!("{prefix}*");
        let keys: Vec<String> = {
            let mut scan_conn = self.manager.clone();
            let mut iter = scan_conn.scan_match::<_, String>(pattern).await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.manager.clone();
        let removed: i64 = conn.del(keys).await?;
        Ok(removed.max(0) as usize)
    }

    async fn contains_key(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.manager.clone();
        Ok(conn.exists(key).await?)
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish()
    }
}
