//! Main cache store implementation with LRU eviction and singleflight loading

use crate::cache::{
    config::{normalize_ttl, CacheConfig},
    entry::CacheEntry,
    types::{CacheKey, CacheLookup, CacheStats},
};
use crate::error::{CacheError, Result};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

type SharedOutcome<V, E> = Shared<BoxFuture<'static, std::result::Result<V, E>>>;

/// Bounded in-memory cache with per-entry TTL, LRU eviction and
/// singleflight [`get_or_set`](MemoryCache::get_or_set).
///
/// This implementation provides:
/// - One coarse lock per instance guarding entries, in-flight table and counters
/// - Lazy expiration: an expired entry is removed by the lookup that finds it
/// - LRU eviction on every write that pushes the size past `max_entries`
/// - At most one running factory per key; concurrent misses share its outcome
///
/// Cloning is cheap and yields a handle to the same underlying store.
///
/// `E` is the error type produced by `get_or_set` factories. It must be
/// `Clone` because a single failure is delivered to every waiter.
pub struct MemoryCache<V, E = CacheError> {
    name: Arc<str>,
    config: CacheConfig,
    store: Arc<Mutex<CacheStore<V, E>>>,
}

/// Internal cache storage
struct CacheStore<V, E> {
    /// Main storage: key -> entry
    entries: HashMap<CacheKey, CacheEntry<V>>,

    /// LRU tracking: recency tick -> key, oldest first
    recency: BTreeMap<u64, CacheKey>,

    /// Monotonic recency counter
    tick: u64,

    /// Pending `get_or_set` computations by key
    inflight: HashMap<CacheKey, InFlight<V, E>>,

    /// Monotonic id distinguishing successive computations for one key
    flight_seq: u64,

    stats: CacheStats,
}

struct InFlight<V, E> {
    id: u64,
    outcome: SharedOutcome<V, E>,
}

impl<V, E> Clone for MemoryCache<V, E> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            config: self.config.clone(),
            store: Arc::clone(&self.store),
        }
    }
}

impl<V, E> MemoryCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<CacheError> + 'static,
{
    /// Create a new cache with the given name and configuration.
    ///
    /// Fails with [`CacheError::InvalidConfig`] when `max_entries` is zero.
    pub fn new(name: impl Into<Arc<str>>, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let name = name.into();

        info!(
            cache = %name,
            max_entries = config.max_entries,
            default_ttl = ?config.default_ttl,
            "Initializing memory cache"
        );

        let store = CacheStore {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            tick: 0,
            inflight: HashMap::new(),
            flight_seq: 0,
            stats: CacheStats::default(),
        };

        Ok(Self {
            name,
            config,
            store: Arc::new(Mutex::new(store)),
        })
    }

    /// Get the name of this cache
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the configuration this cache was built with
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a key.
    ///
    /// A hit moves the entry to the most-recently-used position. An expired
    /// entry is removed and reported as a miss.
    pub async fn get(&self, key: &str) -> CacheLookup<V> {
        let mut store = self.store.lock().await;
        store.lookup(&self.name, key, Instant::now())
    }

    /// Insert or replace a value.
    ///
    /// `ttl` overrides the default TTL; a zero TTL stores the entry without
    /// expiration. Replacing a key resets both its recency and its deadline.
    pub async fn set(&self, key: impl Into<CacheKey>, value: V, ttl: Option<Duration>) {
        let ttl = self.resolve_ttl(ttl);
        let mut store = self.store.lock().await;
        store.insert(
            &self.name,
            key.into(),
            value,
            ttl,
            Instant::now(),
            self.config.max_entries,
        );
    }

    /// Remove a key and any computation in flight for it
    pub async fn delete(&self, key: &str) -> bool {
        let mut store = self.store.lock().await;
        let dropped = store.inflight.remove(key).is_some();
        if dropped {
            debug!(cache = %self.name, key, "Dropped in-flight computation");
        }
        store.remove_entry(key).is_some()
    }

    /// Remove all entries and all computations in flight
    pub async fn clear(&self) {
        let mut store = self.store.lock().await;

        let count = store.entries.len();
        store.entries.clear();
        store.recency.clear();
        store.inflight.clear();

        info!(cache = %self.name, "Cleared {} entries from cache", count);
    }

    /// Remove every key starting with `prefix`, returning how many entries were removed.
    ///
    /// Matching computations in flight are dropped as well.
    pub async fn delete_prefix(&self, prefix: &str) -> usize {
        let mut store = self.store.lock().await;

        let keys: Vec<CacheKey> = store
            .entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();

        for key in &keys {
            store.remove_entry(key);
        }
        store.inflight.retain(|key, _| !key.starts_with(prefix));

        debug!(cache = %self.name, prefix, "Removed {} entries by prefix", keys.len());
        keys.len()
    }

    /// Get number of entries in cache, expired-but-unvisited entries included
    pub async fn len(&self) -> usize {
        self.store.lock().await.entries.len()
    }

    /// Check if cache is empty
    pub async fn is_empty(&self) -> bool {
        self.store.lock().await.entries.is_empty()
    }

    /// Snapshot of the counters
    pub async fn stats(&self) -> CacheStats {
        self.store.lock().await.stats
    }

    /// Return the cached value for `key`, computing it with `factory` on a miss.
    ///
    /// Concurrent misses for the same key share one computation: the factory
    /// is registered before it starts and runs at most once per miss window.
    /// Every waiter receives the same value, or the same error. A failed
    /// computation stores nothing, so the next call starts a fresh one.
    ///
    /// The factory runs on its own task, so it finishes even if every caller
    /// stops waiting. Storing the value and releasing the in-flight slot
    /// happen under one lock acquisition.
    pub async fn get_or_set<F, Fut>(
        &self,
        key: impl Into<CacheKey>,
        factory: F,
        ttl: Option<Duration>,
    ) -> std::result::Result<V, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
    {
        let key = key.into();

        let outcome = {
            let mut store = self.store.lock().await;

            if let Some(value) = store.lookup(&self.name, &key, Instant::now()).into_value() {
                return Ok(value);
            }

            if let Some(flight) = store.inflight.get(&key) {
                let outcome = flight.outcome.clone();
                store.stats.coalesced += 1;
                debug!(cache = %self.name, key = %key, "Joined in-flight computation");
                outcome
            } else {
                store.flight_seq += 1;
                let id = store.flight_seq;
                let outcome = self.launch(key.clone(), id, factory, ttl);
                store.inflight.insert(
                    key.clone(),
                    InFlight {
                        id,
                        outcome: outcome.clone(),
                    },
                );
                debug!(cache = %self.name, key = %key, "Started computation");
                outcome
            }
        };

        outcome.await
    }

    /// Internal: spawn the factory and wrap its outcome for sharing
    fn launch<F, Fut>(
        &self,
        key: CacheKey,
        id: u64,
        factory: F,
        ttl: Option<Duration>,
    ) -> SharedOutcome<V, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
    {
        let ttl = self.resolve_ttl(ttl);
        let max_entries = self.config.max_entries;
        let name = Arc::clone(&self.name);
        let task_store = Arc::clone(&self.store);
        let task_key = key.clone();

        let handle = tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(async move { factory().await })
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(E::from(CacheError::FactoryPanicked {
                    key: task_key.clone(),
                })),
            };

            let mut store = task_store.lock().await;
            if store.release(&task_key, id) {
                if let Ok(value) = &outcome {
                    store.insert(
                        &name,
                        task_key.clone(),
                        value.clone(),
                        ttl,
                        Instant::now(),
                        max_entries,
                    );
                }
            } else {
                warn!(
                    cache = %name,
                    key = %task_key,
                    "In-flight computation was dropped before completing; result not stored"
                );
            }

            outcome
        });

        let store = Arc::clone(&self.store);
        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(_) => {
                    store.lock().await.release(&key, id);
                    Err(E::from(CacheError::FactoryAborted { key }))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Internal: explicit TTL wins over the default; zero means no expiration
    fn resolve_ttl(&self, ttl: Option<Duration>) -> Option<Duration> {
        match ttl {
            Some(ttl) => normalize_ttl(Some(ttl)),
            None => self.config.default_ttl,
        }
    }
}

impl<V: Clone, E> CacheStore<V, E> {
    /// Internal: look up a key, updating counters and recency
    fn lookup(&mut self, name: &str, key: &str, now: Instant) -> CacheLookup<V> {
        let expired = match self.entries.get(key) {
            None => {
                self.stats.misses += 1;
                self.stats.cold_misses += 1;
                debug!(cache = %name, key, "Cache miss");
                return CacheLookup::miss();
            }
            Some(entry) => entry.is_expired_at(now),
        };

        if expired {
            self.remove_entry(key);
            self.stats.misses += 1;
            self.stats.expired_misses += 1;
            debug!(cache = %name, key, "Cache entry expired");
            return CacheLookup::miss();
        }

        self.stats.hits += 1;
        let tick = self.next_tick();
        match self.entries.get_mut(key) {
            Some(entry) => {
                self.recency.remove(&entry.tick);
                entry.tick = tick;
                self.recency.insert(tick, key.to_string());
                debug!(cache = %name, key, "Cache hit");
                CacheLookup::hit(entry.value.clone())
            }
            None => CacheLookup::miss(),
        }
    }

    /// Internal: write an entry as most-recently-used, then evict down to capacity
    fn insert(
        &mut self,
        name: &str,
        key: CacheKey,
        value: V,
        ttl: Option<Duration>,
        now: Instant,
        max_entries: usize,
    ) {
        let tick = self.next_tick();
        let entry = CacheEntry::new(value, ttl, now, tick);

        if let Some(previous) = self.entries.insert(key.clone(), entry) {
            self.recency.remove(&previous.tick);
        }
        self.recency.insert(tick, key);
        self.stats.sets += 1;

        while self.entries.len() > max_entries {
            let Some((_, lru_key)) = self.recency.pop_first() else {
                break;
            };
            self.entries.remove(&lru_key);
            self.stats.evictions += 1;
            debug!(cache = %name, key = %lru_key, "Evicted least-recently-used entry");
        }
    }

    /// Internal: remove an entry from the store
    fn remove_entry(&mut self, key: &str) -> Option<V> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        Some(entry.value)
    }

    /// Internal: clear the in-flight slot if it still belongs to computation `id`
    fn release(&mut self, key: &str, id: u64) -> bool {
        match self.inflight.get(key) {
            Some(flight) if flight.id == id => {
                self.inflight.remove(key);
                true
            }
            _ => false,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache(max_entries: usize) -> MemoryCache<u32> {
        let config = CacheConfig::builder().max_entries(max_entries).build();
        MemoryCache::new("test", config).unwrap()
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let config = CacheConfig::builder().max_entries(0).build();
        let result = MemoryCache::<u32>::new("bad", config);
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_basic_set_and_get() {
        let cache = cache(10);

        cache.set("key1", 1, None).await;

        let lookup = cache.get("key1").await;
        assert!(lookup.hit);
        assert_eq!(lookup.value, Some(1));

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.sets, 1);
    }

    #[tokio::test]
    async fn test_cold_miss() {
        let cache = cache(10);

        let lookup = cache.get("nonexistent").await;
        assert!(!lookup.hit);
        assert_eq!(lookup.value, None);

        let stats = cache.stats().await;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.cold_misses, 1);
        assert_eq!(stats.expired_misses, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiration() {
        let config = CacheConfig::builder()
            .max_entries(10)
            .default_ttl(Duration::from_millis(100))
            .build();
        let cache: MemoryCache<u32> = MemoryCache::new("ttl", config).unwrap();

        cache.set("key1", 1, None).await;
        assert!(cache.get("key1").await.hit);

        tokio::time::advance(Duration::from_millis(101)).await;

        assert!(!cache.get("key1").await.hit);
        assert_eq!(cache.len().await, 0);

        let stats = cache.stats().await;
        assert_eq!(stats.expired_misses, 1);
        assert_eq!(stats.cold_misses, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_ttl_overrides_default() {
        let config = CacheConfig::builder()
            .max_entries(10)
            .default_ttl(Duration::from_secs(3600))
            .build();
        let cache: MemoryCache<u32> = MemoryCache::new("ttl", config).unwrap();

        cache.set("short", 1, Some(Duration::from_millis(10))).await;
        cache.set("forever", 2, Some(Duration::ZERO)).await;

        tokio::time::advance(Duration::from_secs(7200)).await;

        assert!(!cache.get("short").await.hit);
        assert!(cache.get("forever").await.hit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_resets_expiration() {
        let config = CacheConfig::builder()
            .max_entries(10)
            .default_ttl(Duration::from_millis(100))
            .build();
        let cache: MemoryCache<u32> = MemoryCache::new("ttl", config).unwrap();

        cache.set("key", 1, None).await;
        tokio::time::advance(Duration::from_millis(80)).await;
        cache.set("key", 2, None).await;
        tokio::time::advance(Duration::from_millis(80)).await;

        assert_eq!(cache.get("key").await.value, Some(2));
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache = cache(3);

        cache.set("key1", 1, None).await;
        cache.set("key2", 2, None).await;
        cache.set("key3", 3, None).await;

        // Insert 4th entry, should evict key1 (least recently used)
        cache.set("key4", 4, None).await;

        assert_eq!(cache.len().await, 3);
        assert!(!cache.get("key1").await.hit);
        assert!(cache.get("key2").await.hit);
        assert!(cache.get("key3").await.hit);
        assert!(cache.get("key4").await.hit);

        assert_eq!(cache.stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_read_touches_entry() {
        let cache = cache(2);

        cache.set("a", 1, None).await;
        cache.set("b", 2, None).await;
        cache.get("a").await;
        cache.set("c", 3, None).await;

        assert!(cache.get("a").await.hit);
        assert!(!cache.get("b").await.hit);
        assert!(cache.get("c").await.hit);
    }

    #[tokio::test]
    async fn test_overwrite_counts_as_touch() {
        let cache = cache(2);

        cache.set("a", 1, None).await;
        cache.set("b", 2, None).await;
        cache.set("a", 10, None).await;
        cache.set("c", 3, None).await;

        assert_eq!(cache.get("a").await.value, Some(10));
        assert!(!cache.get("b").await.hit);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let cache = cache(10);

        cache.set("key1", 1, None).await;
        cache.set("key2", 2, None).await;

        assert!(cache.delete("key1").await);
        assert!(!cache.delete("key1").await);
        assert!(!cache.get("key1").await.hit);

        cache.clear().await;
        assert!(cache.is_empty().await);

        // Counters survive a clear
        assert_eq!(cache.stats().await.sets, 2);
    }

    #[tokio::test]
    async fn test_delete_prefix() {
        let cache = cache(10);

        cache.set("emb:q:m1:aaa", 1, None).await;
        cache.set("emb:q:m1:bbb", 2, None).await;
        cache.set("emb:d:m1:ccc", 3, None).await;

        assert_eq!(cache.delete_prefix("emb:q:").await, 2);
        assert_eq!(cache.len().await, 1);
        assert!(cache.get("emb:d:m1:ccc").await.hit);
    }

    #[tokio::test]
    async fn test_stats_snapshot_is_read_only() {
        let cache = cache(10);
        cache.get("missing").await;

        let first = cache.stats().await;
        let second = cache.stats().await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_get_or_set_hit_skips_factory() {
        let cache = cache(10);
        cache.set("k", 5, None).await;

        let value = cache
            .get_or_set(
                "k",
                || async { Err(CacheError::InvalidConfig("factory ran".to_string())) },
                None,
            )
            .await
            .unwrap();
        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn test_get_or_set_stores_value() {
        let cache = cache(10);
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let value = cache
                .get_or_set(
                    "k",
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(42)
                    },
                    None,
                )
                .await
                .unwrap();
            assert_eq!(value, 42);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats().await;
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_get_or_set_panic_is_reported() {
        let cache = cache(10);

        let explode = true;
        let result = cache
            .get_or_set(
                "boom",
                move || async move {
                    if explode {
                        panic!("factory exploded");
                    }
                    Ok(0)
                },
                None,
            )
            .await;
        assert_eq!(
            result,
            Err(CacheError::FactoryPanicked {
                key: "boom".to_string()
            })
        );

        // The slot is free again
        let value = cache.get_or_set("boom", || async { Ok(1) }, None).await;
        assert_eq!(value, Ok(1));
    }

    #[tokio::test]
    async fn test_deleted_inflight_result_is_not_stored() {
        let cache = cache(10);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_set(
                        "k",
                        move || async move {
                            let _ = rx.await;
                            Ok(7)
                        },
                        None,
                    )
                    .await
            })
        };

        // Let the waiter register its computation
        while cache.store.lock().await.inflight.is_empty() {
            tokio::task::yield_now().await;
        }

        cache.delete("k").await;
        tx.send(()).unwrap();

        assert_eq!(waiter.await.unwrap(), Ok(7));
        assert!(!cache.get("k").await.hit);
    }
}
