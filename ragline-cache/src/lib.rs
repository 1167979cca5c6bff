//! # Ragline Cache (ragline-cache)
//!
//! Bounded in-memory cache used by the ragline chat pipeline to avoid
//! recomputing embeddings, retrieval results and answers.
//!
//! ## Features
//!
//! - Async-first design using tokio
//! - Capacity bound with least-recently-used eviction
//! - Per-entry TTL with lazy expiration
//! - Singleflight `get_or_set`: one factory run per key, shared by all waiters
//! - Hit, miss, eviction and coalescing counters
//! - Deterministic SHA-256 key derivation over canonical JSON
//!
//! ## Singleflight Loading
//!
//! ```no_run
//! use ragline_cache::{CacheConfig, MemoryCache};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache: MemoryCache<Vec<f32>> = MemoryCache::new("embeddings", CacheConfig::default())?;
//!
//!     let (a, b) = tokio::join!(
//!         cache.get_or_set("emb:q:model:abc", || async { Ok(vec![0.1, 0.2]) }, None),
//!         cache.get_or_set("emb:q:model:abc", || async { Ok(vec![9.9, 9.9]) }, None),
//!     );
//!
//!     // Both callers observe the value from the first factory
//!     assert_eq!(a?, b?);
//!     println!("{}", cache.stats().await);
//!     Ok(())
//! }
//! ```
//!
//! ## Key Derivation
//!
//! ```
//! use ragline_cache::KeyBuilder;
//!
//! let key = KeyBuilder::new("answer")
//!     .field("q", "what is example.com?")
//!     .field("topK", 6)
//!     .build();
//! assert_eq!(key.len(), "answer:".len() + 64);
//! ```
//!
//! ## Custom Error Types
//!
//! `MemoryCache<V, E>` is generic over the factory error. Any `E` that is
//! `Clone` and `From<CacheError>` works, so factory failures reach callers
//! in the caller's own error type.

pub mod cache;
pub mod error;

// Re-export main types for convenience
pub use cache::{
    normalize_text, sha256_hex, CacheConfig, CacheConfigBuilder, CacheKey, CacheLookup,
    CacheStats, KeyBuilder, MemoryCache,
};
pub use error::{CacheError, Result};
