//! Per-subject request tracking: the sliding window and ban state.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use crate::rules::LimitMeta;

/// Identity one window of requests is tracked against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubjectKey {
    Ip(String),
    User(String),
}

impl SubjectKey {
    pub fn ip(ip: impl Into<String>) -> Self {
        Self::Ip(ip.into())
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self::User(user_id.into())
    }

    /// Parse the `kind:value` form used on the wire.
    pub fn parse(raw: &str) -> Option<Self> {
        let (kind, value) = raw.split_once(':')?;
        match kind {
            "ip" => Some(Self::Ip(value.to_string())),
            "user" => Some(Self::User(value.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(ip) => write!(f, "ip:{ip}"),
            Self::User(user_id) => write!(f, "user:{user_id}"),
        }
    }
}

/// Outcome of one admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted {
        /// The subject was banned before this request and just recovered.
        relived: bool,
    },
    Rejected {
        /// Remaining ban time in milliseconds.
        retry_after_millis: u64,
        /// This request tripped the rule; false while an earlier ban is
        /// still running.
        newly_banned: bool,
    },
}

/// Mutable per-subject state: recent request timestamps and ban deadline.
///
/// Timestamps are unix epoch milliseconds, bounded by the largest
/// configured window. One meta exists per subject key and is never shared
/// across subjects; mutation happens under the owning pool's entry lock.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    subject: SubjectKey,
    timestamps: VecDeque<u64>,
    ban_until: Option<u64>,
    last_seen: u64,
}

impl RequestMeta {
    pub fn new(subject: SubjectKey, now: u64) -> Self {
        Self {
            subject,
            timestamps: VecDeque::new(),
            ban_until: None,
            last_seen: now,
        }
    }

    pub fn subject(&self) -> &SubjectKey {
        &self.subject
    }

    pub fn is_banned(&self, now: u64) -> bool {
        matches!(self.ban_until, Some(until) if now < until)
    }

    pub fn ban_until(&self) -> Option<u64> {
        self.ban_until
    }

    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    /// Record and evaluate one request.
    ///
    /// While banned the timestamp is not recorded. Otherwise the timestamp
    /// is appended, entries older than the largest window are pruned, and
    /// rules run in declared order; the first violation bans the subject
    /// for the configured duration.
    pub fn admit(&mut self, now: u64, limits: &LimitMeta) -> Admission {
        self.last_seen = now;

        if let Some(until) = self.ban_until {
            if now < until {
                return Admission::Rejected {
                    retry_after_millis: until - now,
                    newly_banned: false,
                };
            }
            // Ban elapsed: recover on this request.
            self.ban_until = None;
            self.timestamps.clear();
            self.record(now, limits);
            return Admission::Accepted { relived: true };
        }

        self.record(now, limits);
        for rule in limits.rules() {
            let window_millis = rule.window.as_millis() as u64;
            let cutoff = now.saturating_sub(window_millis);
            let count = self
                .timestamps
                .iter()
                .filter(|&&timestamp| timestamp >= cutoff)
                .count();
            if count > rule.max as usize {
                let ban_millis = limits.ban().as_millis() as u64;
                self.ban_until = Some(now + ban_millis);
                return Admission::Rejected {
                    retry_after_millis: ban_millis,
                    newly_banned: true,
                };
            }
        }
        Admission::Accepted { relived: false }
    }

    fn record(&mut self, now: u64, limits: &LimitMeta) {
        self.timestamps.push_back(now);
        let horizon = now.saturating_sub(limits.max_window().as_millis() as u64);
        while matches!(self.timestamps.front(), Some(&timestamp) if timestamp < horizon) {
            self.timestamps.pop_front();
        }
    }

    /// Clear the ban immediately (administrative relive).
    ///
    /// Returns whether a ban was actually cleared. The request window is
    /// reset so the subject does not trip the same rule on its next call.
    pub fn relive(&mut self) -> bool {
        let was_banned = self.ban_until.is_some();
        self.ban_until = None;
        self.timestamps.clear();
        was_banned
    }

    /// Stamp a ban deadline received from a peer node.
    pub fn apply_ban(&mut self, ban_until: Option<u64>) {
        self.ban_until = ban_until;
        if ban_until.is_some() {
            self.timestamps.clear();
        }
    }
}

/// All tracked subjects for one (route, method).
///
/// Mutation runs under the map entry's lock, giving per-key atomicity:
/// two concurrent requests for one subject cannot both observe "under
/// limit" when together they are over it. Unrelated subjects proceed in
/// parallel.
pub struct RequestPool {
    metas: DashMap<SubjectKey, RequestMeta>,
}

impl RequestPool {
    pub fn new() -> Self {
        Self {
            metas: DashMap::new(),
        }
    }

    /// Admit one request for a subject, creating its meta on first sight.
    pub fn admit(&self, subject: SubjectKey, now: u64, limits: &LimitMeta) -> Admission {
        let mut entry = self
            .metas
            .entry(subject.clone())
            .or_insert_with(|| RequestMeta::new(subject, now));
        entry.admit(now, limits)
    }

    /// Clear a subject's ban. Returns whether a ban was cleared.
    pub fn relive(&self, subject: &SubjectKey) -> bool {
        match self.metas.get_mut(subject) {
            Some(mut meta) => meta.relive(),
            None => false,
        }
    }

    /// Stamp a ban deadline from a peer, creating the meta if needed.
    pub fn apply_ban(&self, subject: SubjectKey, ban_until: Option<u64>, now: u64) {
        let mut entry = self
            .metas
            .entry(subject.clone())
            .or_insert_with(|| RequestMeta::new(subject, now));
        entry.apply_ban(ban_until);
    }

    /// Remaining ban in milliseconds for a subject, if banned.
    pub fn ban_remaining(&self, subject: &SubjectKey, now: u64) -> Option<u64> {
        let meta = self.metas.get(subject)?;
        match meta.ban_until() {
            Some(until) if now < until => Some(until - now),
            _ => None,
        }
    }

    /// Drop subjects idle longer than `idle_for` and not currently banned.
    pub fn sweep(&self, now: u64, idle_for: Duration) -> usize {
        let horizon = now.saturating_sub(idle_for.as_millis() as u64);
        let before = self.metas.len();
        self.metas
            .retain(|_, meta| meta.is_banned(now) || meta.last_seen() >= horizon);
        before - self.metas.len()
    }

    pub fn len(&self) -> usize {
        self.metas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metas.is_empty()
    }
}

impl Default for RequestPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RequestPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPool")
            .field("subjects", &self.metas.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::CheckType;
    use crate::rules::LimitMeta;

    fn limits(rules: &[(u64, u32)], ban_millis: u64) -> LimitMeta {
        let mut builder = LimitMeta::builder()
            .ban(Duration::from_millis(ban_millis))
            .check(CheckType::Ip);
        for (window_ms, max) in rules {
            builder = builder.rule(Duration::from_millis(*window_ms), *max);
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_five_pass_sixth_bans() {
        let limits = limits(&[(1_000, 5)], 10_000);
        let mut meta = RequestMeta::new(SubjectKey::ip("10.0.0.1"), 0);

        for offset in 0..5 {
            assert_eq!(
                meta.admit(offset * 100, &limits),
                Admission::Accepted { relived: false }
            );
        }
        let verdict = meta.admit(500, &limits);
        assert_eq!(
            verdict,
            Admission::Rejected {
                retry_after_millis: 10_000,
                newly_banned: true,
            }
        );
        assert_eq!(meta.ban_until(), Some(10_500));
    }

    #[test]
    fn test_window_slides() {
        let limits = limits(&[(1_000, 2)], 10_000);
        let mut meta = RequestMeta::new(SubjectKey::ip("10.0.0.1"), 0);

        assert!(matches!(meta.admit(0, &limits), Admission::Accepted { .. }));
        assert!(matches!(meta.admit(100, &limits), Admission::Accepted { .. }));
        // Old requests have left the window by now.
        assert!(matches!(meta.admit(1_200, &limits), Admission::Accepted { .. }));
        assert!(matches!(meta.admit(1_300, &limits), Admission::Accepted { .. }));
    }

    #[test]
    fn test_banned_requests_not_recorded_and_auto_unban() {
        let limits = limits(&[(1_000, 1)], 5_000);
        let mut meta = RequestMeta::new(SubjectKey::ip("10.0.0.1"), 0);

        assert!(matches!(meta.admit(0, &limits), Admission::Accepted { .. }));
        assert!(matches!(meta.admit(100, &limits), Admission::Rejected { .. }));
        // Still banned: remaining time shrinks, nothing recorded.
        assert_eq!(
            meta.admit(2_100, &limits),
            Admission::Rejected {
                retry_after_millis: 3_000,
                newly_banned: false,
            }
        );
        // Ban elapsed: next request recovers.
        assert_eq!(
            meta.admit(5_200, &limits),
            Admission::Accepted { relived: true }
        );
        assert!(meta.ban_until().is_none());
    }

    #[test]
    fn test_first_rule_trips_before_sustained_rule() {
        // Burst rule (1s, max 1) plus sustained rule (1m, max 100): two
        // requests 500ms apart violate the burst rule even though the
        // sustained rule alone would allow them.
        let limits = limits(&[(1_000, 1), (60_000, 100)], 30_000);
        let mut meta = RequestMeta::new(SubjectKey::ip("10.0.0.1"), 0);

        assert!(matches!(meta.admit(0, &limits), Admission::Accepted { .. }));
        assert!(matches!(meta.admit(500, &limits), Admission::Rejected { .. }));
    }

    #[test]
    fn test_relive_clears_ban_immediately() {
        let limits = limits(&[(1_000, 1)], 60_000);
        let mut meta = RequestMeta::new(SubjectKey::user("u1"), 0);

        meta.admit(0, &limits);
        meta.admit(100, &limits);
        assert!(meta.is_banned(200));

        assert!(meta.relive());
        assert!(!meta.is_banned(200));
        assert!(matches!(meta.admit(300, &limits), Admission::Accepted { .. }));
        // Nothing left to clear the second time.
        assert!(!meta.relive());
    }

    #[test]
    fn test_pool_admit_and_ban_remaining() {
        let limits = limits(&[(1_000, 1)], 5_000);
        let pool = RequestPool::new();
        let subject = SubjectKey::ip("10.0.0.1");

        assert!(matches!(
            pool.admit(subject.clone(), 0, &limits),
            Admission::Accepted { .. }
        ));
        assert!(matches!(
            pool.admit(subject.clone(), 100, &limits),
            Admission::Rejected { .. }
        ));
        assert_eq!(pool.ban_remaining(&subject, 1_100), Some(4_000));
        assert_eq!(pool.ban_remaining(&SubjectKey::ip("10.0.0.2"), 0), None);
    }

    #[test]
    fn test_pool_keys_are_independent() {
        let limits = limits(&[(1_000, 1)], 5_000);
        let pool = RequestPool::new();

        pool.admit(SubjectKey::ip("10.0.0.1"), 0, &limits);
        pool.admit(SubjectKey::ip("10.0.0.1"), 10, &limits);
        // A different subject is unaffected by the first one's ban.
        assert!(matches!(
            pool.admit(SubjectKey::ip("10.0.0.2"), 20, &limits),
            Admission::Accepted { .. }
        ));
    }

    #[test]
    fn test_pool_sweep_keeps_banned_and_active() {
        let limits = limits(&[(1_000, 1)], 60_000);
        let pool = RequestPool::new();

        pool.admit(SubjectKey::ip("stale"), 0, &limits);
        pool.admit(SubjectKey::ip("banned"), 0, &limits);
        pool.admit(SubjectKey::ip("banned"), 10, &limits);
        pool.admit(SubjectKey::ip("fresh"), 9_000, &limits);

        let evicted = pool.sweep(10_000, Duration::from_millis(5_000));
        assert_eq!(evicted, 1);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_concurrent_admits_cannot_overshoot() {
        use std::sync::Arc;

        let limits = Arc::new(limits(&[(10_000, 50)], 60_000));
        let pool = Arc::new(RequestPool::new());
        let mut handles = Vec::new();
        for thread in 0..8 {
            let limits = Arc::clone(&limits);
            let pool = Arc::clone(&pool);
            handles.push(std::thread::spawn(move || {
                let mut accepted = 0u32;
                for call in 0..25 {
                    let now = 1 + (thread * 25 + call) as u64;
                    if matches!(
                        pool.admit(SubjectKey::ip("10.0.0.1"), now, &limits),
                        Admission::Accepted { .. }
                    ) {
                        accepted += 1;
                    }
                }
                accepted
            }));
        }
        let accepted: u32 = handles.into_iter().map(|handle| handle.join().unwrap()).sum();
        // 200 attempts against max 50: the window can never admit more
        // than the rule allows, no matter the interleaving.
        assert_eq!(accepted, 50);
    }

    #[test]
    fn test_subject_key_wire_form() {
        let subject = SubjectKey::ip("10.0.0.1");
        assert_eq!(subject.to_string(), "ip:10.0.0.1");
        assert_eq!(SubjectKey::parse("ip:10.0.0.1"), Some(subject));
        assert_eq!(
            SubjectKey::parse("user:u1"),
            Some(SubjectKey::user("u1"))
        );
        assert_eq!(SubjectKey::parse("bogus"), None);
    }
}
