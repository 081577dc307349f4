//! Query cache with TTL expiry and LRU eviction

use crate::cache::{config::CacheConfig, entry::CacheEntry, key::KeyPattern, types::CacheStats};
use crate::error::{CacheError, Result};
use crate::observer::{CacheEvent, CacheObserver, TracingObserver};
use chrono::Utc;
use lru::LruCache;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Bounded, thread-safe key/value cache
///
/// This implementation provides:
/// - One lock around the map and the recency order, so every public
///   operation is atomic with respect to the others
/// - O(1) recency updates (`lru` keeps a linked list node per key)
/// - Lazy TTL checks on read, plus an optional periodic sweep
///   (see [`start_auto_cleanup`])
/// - Exact, prefix and pattern invalidation
///
/// Values are handed out as clones. Treat a value as an immutable snapshot
/// once it is passed to `set`; wrap large values in `Arc` to make clones cheap.
pub struct QueryCache<V> {
    /// Cache configuration
    pub(crate) config: CacheConfig,

    /// Internal storage
    store: RwLock<CacheStore<V>>,

    /// Where hit/miss/eviction events go
    observer: Arc<dyn CacheObserver>,
}

/// Internal cache storage
struct CacheStore<V> {
    /// Entries in recency order; never bounded by `lru` itself so that
    /// evictions stay visible to the stats
    entries: LruCache<String, CacheEntry<V>>,

    /// Current cache statistics
    stats: CacheStats,

    /// Bumped by every invalidate or clear call, whether or not it removed anything
    generation: u64,
}

impl<V> QueryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a new cache with the given configuration
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::with_observer(config, Arc::new(TracingObserver))
    }

    /// Create a cache that reports to a custom observer
    pub fn with_observer(config: CacheConfig, observer: Arc<dyn CacheObserver>) -> Result<Self> {
        config.validate()?;
        info!(
            "Initializing query cache (max_entries: {}, default_ttl: {:?})",
            config.max_entries, config.default_ttl
        );

        Ok(Self {
            config,
            store: RwLock::new(CacheStore {
                entries: LruCache::unbounded(),
                stats: CacheStats::default(),
                generation: 0,
            }),
            observer,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get a value from the cache
    ///
    /// A hit moves the key to the most-recently-used position. An expired
    /// entry is removed and reported as a miss.
    pub async fn get(&self, key: &str) -> Option<V> {
        let mut guard = self.store.write().await;
        let store = &mut *guard;
        let now = Utc::now();

        let expired = store.entries.peek(key).map(|entry| entry.is_expired_at(now));
        let (result, events) = match expired {
            None => {
                store.stats.misses += 1;
                (None, vec![CacheEvent::Miss { key: key.to_string() }])
            }
            Some(true) => {
                store.entries.pop(key);
                store.stats.misses += 1;
                store.stats.expirations += 1;
                (
                    None,
                    vec![
                        CacheEvent::Expired { key: key.to_string() },
                        CacheEvent::Miss { key: key.to_string() },
                    ],
                )
            }
            Some(false) => match store.entries.get_mut(key) {
                Some(entry) => {
                    entry.mark_accessed();
                    let value = entry.value.clone();
                    store.stats.hits += 1;
                    (Some(value), vec![CacheEvent::Hit { key: key.to_string() }])
                }
                None => (None, Vec::new()),
            },
        };
        drop(guard);

        self.emit(&events);
        result
    }

    /// Read a value without touching recency order or counters
    pub async fn peek(&self, key: &str) -> Option<V> {
        let store = self.store.read().await;
        store
            .entries
            .peek(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value.clone())
    }

    /// Check if a live entry exists (without updating access time)
    pub async fn contains_key(&self, key: &str) -> bool {
        let store = self.store.read().await;
        store
            .entries
            .peek(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false)
    }

    /// Insert a value with the default TTL (jittered if configured)
    pub async fn set(&self, key: impl Into<String>, value: V) -> Result<()> {
        let ttl = self.config.ttl_with_jitter();
        self.insert_entry(key.into(), CacheEntry::new(value, ttl)).await;
        Ok(())
    }

    /// Insert a value with an explicit TTL
    pub async fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) -> Result<()> {
        validate_ttl(ttl)?;
        self.insert_entry(key.into(), CacheEntry::new(value, ttl)).await;
        Ok(())
    }

    /// Remove one key; returns whether it was present
    pub async fn invalidate(&self, key: &str) -> bool {
        let mut store = self.store.write().await;
        store.generation += 1;
        let removed = store.entries.pop(key).is_some();
        if removed {
            store.stats.invalidations += 1;
            debug!("Invalidated cache entry: {}", key);
        }
        removed
    }

    /// Remove every key starting with `prefix`; returns how many were removed
    ///
    /// Matching is a plain string prefix, so `"tasks"` also removes
    /// `"tasks_archive"`. Use [`QueryCache::invalidate_matching`] with a
    /// [`KeyPattern::Scope`] to stop at segment boundaries.
    pub async fn invalidate_prefix(&self, prefix: &str) -> Result<usize> {
        if prefix.is_empty() {
            return Err(CacheError::invalid(
                "empty prefix would match every key; use clear() instead",
            ));
        }
        Ok(self
            .invalidate_matching(&KeyPattern::Prefix(prefix.to_string()))
            .await)
    }

    /// Remove every key covered by `pattern`
    pub async fn invalidate_matching(&self, pattern: &KeyPattern) -> usize {
        if let Some(exact) = pattern.as_exact() {
            return usize::from(self.invalidate(exact).await);
        }

        let mut guard = self.store.write().await;
        let store = &mut *guard;
        store.generation += 1;
        let doomed: Vec<String> = store
            .entries
            .iter()
            .filter(|(key, _)| pattern.matches(key))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            store.entries.pop(key.as_str());
        }
        store.stats.invalidations += doomed.len() as u64;

        debug!("Invalidated {} entries matching {}", doomed.len(), pattern);
        doomed.len()
    }

    /// Clear all entries from the cache
    pub async fn clear(&self) {
        let mut store = self.store.write().await;
        let count = store.entries.len();
        store.entries.clear();
        store.generation += 1;
        store.stats.invalidations += count as u64;

        info!("Cleared {} entries from cache", count);
    }

    /// Remove all expired entries; returns how many were removed
    pub async fn cleanup_expired(&self) -> usize {
        let mut guard = self.store.write().await;
        let store = &mut *guard;
        let now = Utc::now();

        let expired: Vec<String> = store
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            store.entries.pop(key.as_str());
        }
        store.stats.expirations += expired.len() as u64;
        drop(guard);

        if !expired.is_empty() {
            debug!("Cleaned up {} expired entries", expired.len());
            let events: Vec<CacheEvent> = expired
                .iter()
                .map(|key| CacheEvent::Expired { key: key.clone() })
                .collect();
            self.emit(&events);
        }

        expired.len()
    }

    /// Return the cached value, or run `fetch` inline on a miss and cache its result
    ///
    /// `fetch` runs on the calling task; hand expensive computations to the
    /// background job queue instead.
    pub async fn get_or_fetch<F>(&self, key: &str, ttl: Option<Duration>, fetch: F) -> Result<V>
    where
        F: FnOnce() -> anyhow::Result<V>,
    {
        if let Some(ttl) = ttl {
            validate_ttl(ttl)?;
        }

        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        let value = fetch().map_err(CacheError::fetch)?;
        match ttl {
            Some(ttl) => self.set_with_ttl(key, value.clone(), ttl).await?,
            None => self.set(key, value.clone()).await?,
        }
        Ok(value)
    }

    /// Current invalidation generation
    ///
    /// Read it before computing a value, then store the value with
    /// [`QueryCache::set_if_unchanged`] to avoid caching a result that an
    /// invalidation has already made stale.
    pub async fn generation(&self) -> u64 {
        self.store.read().await.generation
    }

    /// Insert with the default TTL unless an invalidation ran since `generation`
    ///
    /// Returns `false`, leaving the cache untouched, when the generation moved.
    pub async fn set_if_unchanged(
        &self,
        key: impl Into<String>,
        value: V,
        generation: u64,
    ) -> Result<bool> {
        let key = key.into();
        let entry = CacheEntry::new(value, self.config.ttl_with_jitter());

        let mut guard = self.store.write().await;
        if guard.generation != generation {
            debug!("Skipped stale write to {}", key);
            return Ok(false);
        }
        let evicted = self.insert_locked(&mut guard, key, entry);
        drop(guard);

        self.emit(&evicted);
        Ok(true)
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let store = self.store.read().await;
        CacheStats {
            entry_count: store.entries.len(),
            ..store.stats
        }
    }

    /// Get number of entries in cache (expired-but-unswept entries included)
    pub async fn len(&self) -> usize {
        self.store.read().await.entries.len()
    }

    /// Check if cache is empty
    pub async fn is_empty(&self) -> bool {
        self.store.read().await.entries.is_empty()
    }

    /// Keys in recency order, most recently used first
    pub async fn keys(&self) -> Vec<String> {
        let store = self.store.read().await;
        store.entries.iter().map(|(key, _)| key.clone()).collect()
    }

    /// Internal: insert or overwrite, evicting LRU entries to stay within bounds
    async fn insert_entry(&self, key: String, entry: CacheEntry<V>) {
        let mut guard = self.store.write().await;
        let evicted = self.insert_locked(&mut guard, key, entry);
        drop(guard);

        self.emit(&evicted);
    }

    fn insert_locked(
        &self,
        store: &mut CacheStore<V>,
        key: String,
        entry: CacheEntry<V>,
    ) -> Vec<CacheEvent> {
        let mut evicted = Vec::new();

        if !store.entries.contains(key.as_str()) {
            while store.entries.len() >= self.config.max_entries {
                match store.entries.pop_lru() {
                    Some((old_key, _)) => {
                        store.stats.evictions += 1;
                        evicted.push(CacheEvent::Evicted { key: old_key });
                    }
                    None => break,
                }
            }
        }

        store.entries.put(key, entry);
        evicted
    }

    fn emit(&self, events: &[CacheEvent]) {
        for event in events {
            self.observer.on_event(event);
        }
    }
}

fn validate_ttl(ttl: Duration) -> Result<()> {
    if ttl.is_zero() {
        return Err(CacheError::invalid("ttl must be positive"));
    }
    Ok(())
}

/// Spawn the periodic sweep for `cache`
///
/// Returns `None` when auto cleanup is disabled. The task holds only a weak
/// reference and exits on its own once the cache is dropped.
pub fn start_auto_cleanup<V>(cache: &Arc<QueryCache<V>>) -> Option<JoinHandle<()>>
where
    V: Clone + Send + Sync + 'static,
{
    if !cache.config.enable_auto_cleanup {
        return None;
    }

    let interval = cache.config.cleanup_interval;
    let weak: Weak<QueryCache<V>> = Arc::downgrade(cache);

    info!("Starting automatic cache cleanup task (interval: {:?})", interval);

    Some(tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            let Some(cache) = weak.upgrade() else {
                debug!("Cache dropped, stopping cleanup task");
                break;
            };

            let removed = cache.cleanup_expired().await;
            if removed > 0 {
                info!("Auto cleanup removed {} expired entries", removed);
            }
        }
    }))
}
