//! Cache entries and TTL policies.

use serde_json::Value;
use std::time::{Duration, Instant};

/// Per-entry expiry policy.
///
/// Three independent TTLs, each measured from its own reference timestamp:
/// creation, last update, last read. The effective deadline is the earliest
/// of the policies that are set and whose reference timestamp exists. An
/// entry with all three unset never expires except by explicit deletion or
/// capacity eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TtlPolicy {
    pub expire_after_create: Option<Duration>,
    pub expire_after_update: Option<Duration>,
    pub expire_after_read: Option<Duration>,
}

impl TtlPolicy {
    /// Policy that never expires.
    pub const INFINITE: TtlPolicy = TtlPolicy {
        expire_after_create: None,
        expire_after_update: None,
        expire_after_read: None,
    };

    /// Expire a fixed duration after the entry was created.
    pub fn after_create(ttl: Duration) -> Self {
        Self {
            expire_after_create: Some(ttl),
            ..Self::INFINITE
        }
    }

    /// Expire a fixed duration after the last write.
    pub fn after_update(ttl: Duration) -> Self {
        Self {
            expire_after_update: Some(ttl),
            ..Self::INFINITE
        }
    }

    /// Expire a fixed duration after the last read.
    pub fn after_read(ttl: Duration) -> Self {
        Self {
            expire_after_read: Some(ttl),
            ..Self::INFINITE
        }
    }

    pub fn is_infinite(&self) -> bool {
        self.expire_after_create.is_none()
            && self.expire_after_update.is_none()
            && self.expire_after_read.is_none()
    }
}

/// One stored value with its bookkeeping timestamps.
///
/// Entries are owned by the local-store slot holding them and replaced
/// wholesale on every write; nothing mutates a published value in place.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Value,
    pub created_at: Instant,
    pub updated_at: Instant,
    pub last_read_at: Option<Instant>,
    pub ttl: TtlPolicy,
}

impl CacheEntry {
    pub fn new(value: Value, ttl: TtlPolicy, now: Instant) -> Self {
        Self {
            value,
            created_at: now,
            updated_at: now,
            last_read_at: None,
            ttl,
        }
    }

    /// Replacement entry for an overwrite: fresh value and update time,
    /// original creation time carried forward.
    pub fn replacing(&self, value: Value, ttl: TtlPolicy, now: Instant) -> Self {
        Self {
            value,
            created_at: self.created_at,
            updated_at: now,
            last_read_at: None,
            ttl,
        }
    }

    /// Record a read for expire-after-read accounting.
    pub fn mark_read(&mut self, now: Instant) {
        self.last_read_at = Some(now);
    }

    /// Earliest applicable expiry deadline, if any.
    pub fn expires_at(&self) -> Option<Instant> {
        let mut deadline: Option<Instant> = None;
        let mut consider = |reference: Option<Instant>, ttl: Option<Duration>| {
            if let (Some(reference), Some(ttl)) = (reference, ttl) {
                let candidate = reference + ttl;
                deadline = Some(match deadline {
                    Some(current) => current.min(candidate),
                    None => candidate,
                });
            }
        };
        consider(Some(self.created_at), self.ttl.expire_after_create);
        consider(Some(self.updated_at), self.ttl.expire_after_update);
        consider(self.last_read_at, self.ttl.expire_after_read);
        deadline
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at() {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}
