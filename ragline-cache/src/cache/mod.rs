//! # Bounded TTL/LRU Cache
//!
//! In-process caching layer shared by every tier of the RAG pipeline.
//!
//! ## Features
//!
//! - **TTL-Based Expiration**: Per-entry time-to-live with a per-cache default; zero means forever
//! - **LRU Eviction**: Least Recently Used eviction keeps each cache within `max_entries`
//! - **Singleflight Loading**: Concurrent misses on one key share a single computation
//! - **Prefix Invalidation**: Drop a family of keys (and their pending loads) at once
//! - **Fingerprinted Keys**: Canonical-JSON SHA-256 keys via [`KeyBuilder`]
//!
//! ## Example
//!
//! ```rust
//! use ragline_cache::cache::{CacheConfig, MemoryCache};
//! use ragline_cache::CacheError;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), CacheError> {
//! let config = CacheConfig::builder()
//!     .max_entries(10_000)
//!     .default_ttl(Duration::from_secs(3600)) // 1 hour
//!     .build();
//!
//! let cache: MemoryCache<String> = MemoryCache::new("answers", config)?;
//!
//! // Computed once, served from memory afterwards
//! let answer = cache
//!     .get_or_set("query:123", || async { Ok("cached response".to_string()) }, None)
//!     .await?;
//!
//! if let Some(value) = cache.get("query:123").await.into_value() {
//!     println!("Cache hit: {}", value);
//! }
//! # let _ = answer;
//! # Ok(())
//! # }
//! ```

pub mod config;
mod entry;
pub mod keys;
pub mod store;
pub mod types;

pub use config::{CacheConfig, CacheConfigBuilder};
pub use keys::{normalize_text, sha256_hex, KeyBuilder};
pub use store::MemoryCache;
pub use types::{CacheKey, CacheLookup, CacheStats};
