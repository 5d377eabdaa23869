//! L1: in-memory concurrent store with TTL and LRU eviction.

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::entry::{CacheEntry, TtlPolicy};
use crate::error::CacheError;

/// One slot in the store: the entry plus its LRU stamp.
struct Slot {
    entry: CacheEntry,
    stamp: u64,
}

/// Counters for cache monitoring.
#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Snapshot of store statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalStoreStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub len: usize,
}

/// In-memory concurrent key/value store with per-entry TTL and eviction.
///
/// Reads of expired entries return absent and evict lazily; a background
/// sweep (see [`LocalStore::spawn_sweeper`]) bounds memory growth from
/// write-once/read-never keys. When the configured capacity is exceeded the
/// least-recently-used entry is evicted before inserting.
///
/// All operations are safe under concurrent access; a single key's
/// operations are linearizable, but there is no cross-key atomicity.
pub struct LocalStore {
    entries: DashMap<String, Slot>,
    max_entries: usize,
    tick: AtomicU64,
    counters: Counters,
}

impl LocalStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
            tick: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    fn next_stamp(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Get a value, recording the read for expire-after-read and LRU.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.get_at(key, Instant::now())
    }

    pub(crate) fn get_at(&self, key: &str, now: Instant) -> Option<Value> {
        if let Some(mut slot) = self.entries.get_mut(key) {
            if !slot.entry.is_expired(now) {
                slot.entry.mark_read(now);
                slot.stamp = self.next_stamp();
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Some(slot.entry.value.clone());
            }
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        // Expired: evict outside the shard guard.
        if self
            .entries
            .remove_if(key, |_, slot| slot.entry.is_expired(now))
            .is_some()
        {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a value under the given TTL policy, replacing wholesale.
    pub fn set(&self, key: impl Into<String>, value: Value, ttl: TtlPolicy) {
        self.set_at(key, value, ttl, Instant::now());
    }

    pub(crate) fn set_at(&self, key: impl Into<String>, value: Value, ttl: TtlPolicy, now: Instant) {
        let key = key.into();
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.evict_lru();
        }
        let stamp = self.next_stamp();
        match self.entries.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let replacement = occupied.get().entry.replacing(value, ttl, now);
                occupied.insert(Slot {
                    entry: replacement,
                    stamp,
                });
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    entry: CacheEntry::new(value, ttl, now),
                    stamp,
                });
            }
        }
    }

    /// Remove a key. Returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove every key starting with `prefix`. Returns how many went.
    pub fn delete_prefix(&self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        before - self.entries.len()
    }

    /// Whether a live (non-expired) entry exists. Does not count as a read.
    pub fn contains_key(&self, key: &str) -> bool {
        self.contains_key_at(key, Instant::now())
    }

    pub(crate) fn contains_key_at(&self, key: &str, now: Instant) -> bool {
        let live = match self.entries.get(key) {
            Some(slot) => !slot.entry.is_expired(now),
            None => return false,
        };
        if !live
            && self
                .entries
                .remove_if(key, |_, slot| slot.entry.is_expired(now))
                .is_some()
        {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
        live
    }

    /// Typed read via serde.
    pub fn get_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Typed write via serde.
    pub fn set_value<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: &T,
        ttl: TtlPolicy,
    ) -> Result<(), CacheError> {
        self.set(key, serde_json::to_value(value)?, ttl);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict all expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub(crate) fn sweep_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, slot| !slot.entry.is_expired(now));
        let evicted = before - self.entries.len();
        if evicted > 0 {
            self.counters
                .evictions
                .fetch_add(evicted as u64, Ordering::Relaxed);
        }
        evicted
    }

    /// Spawn the periodic expiry sweep.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let evicted = store.sweep();
                if evicted > 0 {
                    debug!(evicted, len = store.len(), "Local store sweep");
                }
            }
        })
    }

    pub fn stats(&self) -> LocalStoreStats {
        LocalStoreStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            len: self.entries.len(),
        }
    }

    fn evict_lru(&self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|slot| slot.stamp)
            .map(|slot| slot.key().clone());
        if let Some(key) = victim {
            if self.entries.remove(&key).is_some() {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Evicted least-recently-used entry");
            }
        }
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("len", &self.entries.len())
            .field("max_entries", &self.max_entries)
            .finish()
    }
}
