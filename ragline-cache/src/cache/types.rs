//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cache key type. Keys are opaque strings, usually produced by [`KeyBuilder`](super::KeyBuilder).
pub type CacheKey = String;

/// Outcome of a plain `get`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLookup<V> {
    /// Whether a fresh entry was found
    pub hit: bool,

    /// The cached value, present exactly when `hit` is true
    pub value: Option<V>,
}

impl<V> CacheLookup<V> {
    pub(crate) fn hit(value: V) -> Self {
        Self {
            hit: true,
            value: Some(value),
        }
    }

    pub(crate) fn miss() -> Self {
        Self {
            hit: false,
            value: None,
        }
    }

    /// Consume the lookup, returning the value on a hit
    pub fn into_value(self) -> Option<V> {
        self.value
    }
}

/// Counters describing cache traffic since construction.
///
/// `clear` and `delete_prefix` drop entries but never reset counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Lookups that found a fresh entry
    pub hits: u64,

    /// Lookups that found nothing usable (`cold_misses + expired_misses`)
    pub misses: u64,

    /// Misses where the key was absent
    pub cold_misses: u64,

    /// Misses where the key was present but expired (the entry is removed)
    pub expired_misses: u64,

    /// Values written, by `set` or by a completed `get_or_set` factory
    pub sets: u64,

    /// Entries removed to keep the cache within capacity
    pub evictions: u64,

    /// `get_or_set` misses that joined an in-flight computation
    pub coalesced: u64,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Total lookups that reached the entry table
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {} (cold: {}, expired: {}), hit_rate: {:.2}%, sets: {}, evictions: {}, coalesced: {} }}",
            self.hits,
            self.misses,
            self.cold_misses,
            self.expired_misses,
            self.hit_rate(),
            self.sets,
            self.evictions,
            self.coalesced
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };

        assert_eq!(stats.hit_rate(), 80.0);
        assert_eq!(stats.lookups(), 100);
    }

    #[test]
    fn test_cache_stats_zero_requests() {
        let stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_cache_stats_serializes_camel_case() {
        let stats = CacheStats {
            cold_misses: 2,
            expired_misses: 1,
            misses: 3,
            ..Default::default()
        };

        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["coldMisses"], 2);
        assert_eq!(json["expiredMisses"], 1);
        assert_eq!(json["misses"], 3);
    }

    #[test]
    fn test_cache_stats_display() {
        let stats = CacheStats {
            hits: 100,
            misses: 50,
            ..Default::default()
        };

        let display = format!("{}", stats);
        assert!(display.contains("hits: 100"));
        assert!(display.contains("misses: 50"));
    }

    #[test]
    fn test_lookup_constructors() {
        let hit = CacheLookup::hit(7);
        assert!(hit.hit);
        assert_eq!(hit.into_value(), Some(7));

        let miss: CacheLookup<i32> = CacheLookup::miss();
        assert!(!miss.hit);
        assert_eq!(miss.into_value(), None);
    }
}
