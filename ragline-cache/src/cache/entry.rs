//! Cache entry management with TTL support

use std::time::Duration;
use tokio::time::Instant;

/// A cached value with its expiration deadline and recency stamp.
///
/// Entries are owned by the cache that holds them; callers only ever see
/// clones of `value`.
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry<V> {
    /// The cached value
    pub(crate) value: V,

    /// Instant after which the entry is logically absent
    pub(crate) expires_at: Option<Instant>,

    /// Position in the recency index (higher is more recent)
    pub(crate) tick: u64,
}

impl<V> CacheEntry<V> {
    /// Create an entry written at `now`, expiring `ttl` later
    pub(crate) fn new(value: V, ttl: Option<Duration>, now: Instant, tick: u64) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| now + ttl),
            tick,
        }
    }

    /// Check if the entry has expired as of `now`.
    ///
    /// The deadline itself is still fresh; only strictly later instants expire.
    pub(crate) fn is_expired_at(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if now > deadline)
    }
}
