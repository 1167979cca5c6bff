//! Configuration for the cache system

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`MemoryCache`](super::MemoryCache)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries kept in memory.
    /// Least-recently-used entries are evicted past this bound.
    pub max_entries: usize,

    /// Time-to-live applied when `set` is called without one.
    /// `None` means entries never expire.
    pub default_ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            default_ttl: None,
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(CacheError::InvalidConfig(
                "max_entries must be a positive integer, got 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    max_entries: Option<usize>,
    default_ttl: Option<Option<Duration>>,
}

impl CacheConfigBuilder {
    /// Set maximum number of cache entries
    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    /// Set default TTL for cache entries. A zero duration disables expiration.
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(normalize_ttl(Some(ttl)));
        self
    }

    /// Set the default TTL from milliseconds, `0` meaning no expiration
    pub fn default_ttl_ms(self, ttl_ms: u64) -> Self {
        self.default_ttl(Duration::from_millis(ttl_ms))
    }

    /// Entries never expire unless `set` is given an explicit TTL
    pub fn no_ttl(mut self) -> Self {
        self.default_ttl = Some(None);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            max_entries: self.max_entries.unwrap_or(defaults.max_entries),
            default_ttl: self.default_ttl.unwrap_or(defaults.default_ttl),
        }
    }
}

/// A zero TTL means "no expiration", matching the environment convention.
pub(crate) fn normalize_ttl(ttl: Option<Duration>) -> Option<Duration> {
    ttl.filter(|d| !d.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.max_entries, 1_000);
        assert_eq!(config.default_ttl, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let invalid = CacheConfig::builder().max_entries(0).build();
        assert!(matches!(
            invalid.validate(),
            Err(CacheError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::builder()
            .max_entries(50)
            .default_ttl(Duration::from_secs(600))
            .build();

        assert_eq!(config.max_entries, 50);
        assert_eq!(config.default_ttl, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_zero_ttl_means_no_expiration() {
        let config = CacheConfig::builder().default_ttl_ms(0).build();
        assert_eq!(config.default_ttl, None);

        let config = CacheConfig::builder()
            .default_ttl(Duration::from_secs(5))
            .no_ttl()
            .build();
        assert_eq!(config.default_ttl, None);
    }
}
