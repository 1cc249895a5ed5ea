//! Per-alert-key record of the last successful delivery.

use std::num::NonZeroUsize;

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;

use super::AlertKey;

/// Default bound on distinct alert keys kept in memory.
pub const DEFAULT_MAX_KEYS: usize = 1024;

/// Last-delivery timestamps keyed by [`AlertKey`].
///
/// Bounded: once `max_keys` distinct keys are held, the key delivered least
/// recently is evicted. Pool and address names come from log content, so the
/// key space is not trusted to stay small.
pub struct CooldownTable {
    entries: LruCache<AlertKey, DateTime<Utc>>,
    cooldown: Duration,
}

impl CooldownTable {
    /// Create an empty table with the given cooldown and key bound.
    pub fn new(cooldown: Duration, max_keys: usize) -> Self {
        let cap = NonZeroUsize::new(max_keys).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(cap),
            cooldown,
        }
    }

    /// Whether `key` was delivered less than one cooldown before `now`.
    pub fn is_cooling_down(&self, key: &AlertKey, now: DateTime<Utc>) -> bool {
        let Some(last_sent) = self.entries.peek(key) else {
            return false;
        };
        now.signed_duration_since(*last_sent) < self.cooldown
    }

    /// Record a successful delivery of `key` at `now`.
    pub fn record(&mut self, key: AlertKey, now: DateTime<Utc>) {
        self.entries.put(key, now);
    }

    /// Last successful delivery of `key`, if tracked.
    pub fn last_delivery(&self, key: &AlertKey) -> Option<DateTime<Utc>> {
        self.entries.peek(key).copied()
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no key has been delivered yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
