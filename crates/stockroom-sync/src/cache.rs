//! # Cache Store
//!
//! Named, bounded collections of cached responses.
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            CacheStore                                   │
//! │                                                                         │
//! │  RwLock<HashMap<name, Arc<Mutex<NamedCache>>>>                         │
//! │                                                                         │
//! │  "stockroom-static-v2"  ──► NamedCache { limits: unbounded }           │
//! │  "stockroom-images-v2"  ──► NamedCache { limits: 200 / 30d }           │
//! │  "stockroom-api-v2"     ──► NamedCache { limits: 100 / 1d }            │
//! │                                                                         │
//! │  NamedCache                                                            │
//! │    entries: key ──► Entry { response, stored_at, expires_at, seq }     │
//! │    order:   seq ──► key           (insertion order, oldest first)      │
//! │                                                                         │
//! │  put():  insert as newest, then evict oldest while len > max_entries   │
//! │  get():  expired (max age or per-entry TTL) ──► removed, None          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each named cache has its own lock, so writers to different caches never
//! wait on each other. Locks are plain `parking_lot` mutexes and are never
//! held across an `.await`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use stockroom_core::{CacheKind, CacheNames, HttpResponse};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::{CacheLimits, EngineConfig};

// =============================================================================
// Named Cache
// =============================================================================

#[derive(Debug, Clone)]
struct Entry {
    response: HttpResponse,
    stored_at: Instant,
    expires_at: Option<Instant>,
    seq: u64,
}

#[derive(Debug)]
struct NamedCache {
    limits: CacheLimits,
    entries: HashMap<String, Entry>,
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl NamedCache {
    fn new(limits: CacheLimits) -> Self {
        NamedCache {
            limits,
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
        }
    }

    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        if let Some(max_age) = self.limits.max_age() {
            if now.duration_since(entry.stored_at) >= max_age {
                return true;
            }
        }
        matches!(entry.expires_at, Some(at) if now >= at)
    }

    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }

    fn insert(&mut self, key: String, response: HttpResponse, ttl: Option<Duration>) -> usize {
        let now = Instant::now();
        self.remove(&key);

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key.clone());
        self.entries.insert(
            key,
            Entry {
                response,
                stored_at: now,
                expires_at: ttl.map(|ttl| now + ttl),
                seq,
            },
        );

        self.trim_to_limit()
    }

    fn trim_to_limit(&mut self) -> usize {
        let Some(max) = self.limits.max_entries else {
            return 0;
        };

        let mut evicted = 0;
        while self.entries.len() > max {
            let Some((_, oldest)) = self.order.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
            evicted += 1;
        }
        evicted
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| self.is_expired(entry, now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }
}

// =============================================================================
// Cache Store
// =============================================================================

/// All named caches of the engine.
///
/// Cloning is cheap; clones share the same caches.
#[derive(Debug, Clone, Default)]
pub struct CacheStore {
    caches: Arc<RwLock<HashMap<String, Arc<Mutex<NamedCache>>>>>,
    limits: Arc<RwLock<HashMap<String, CacheLimits>>>,
}

impl CacheStore {
    /// Creates an empty store. Caches opened without configured limits are
    /// unbounded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with the limits of every current cache configured.
    pub fn from_config(config: &EngineConfig) -> Self {
        let store = Self::new();
        let names = config.cache_names();
        for kind in CacheKind::ALL {
            store.configure(names.name(kind), config.cache.limits(kind));
        }
        store
    }

    /// Sets the limits of a named cache, applying them right away if it is
    /// already open.
    pub fn configure(&self, name: impl Into<String>, limits: CacheLimits) {
        let name = name.into();
        if let Some(cache) = self.caches.read().get(&name) {
            let mut cache = cache.lock();
            cache.limits = limits;
            cache.trim_to_limit();
        }
        self.limits.write().insert(name, limits);
    }

    fn open(&self, name: &str) -> Arc<Mutex<NamedCache>> {
        if let Some(cache) = self.caches.read().get(name) {
            return Arc::clone(cache);
        }

        let limits = self.limits.read().get(name).copied().unwrap_or_default();
        let mut caches = self.caches.write();
        Arc::clone(
            caches
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(NamedCache::new(limits)))),
        )
    }

    fn existing(&self, name: &str) -> Option<Arc<Mutex<NamedCache>>> {
        self.caches.read().get(name).cloned()
    }

    /// Looks up a response. Expired entries are removed and never returned.
    pub fn get(&self, name: &str, key: &str) -> Option<HttpResponse> {
        let cache = self.existing(name)?;
        let mut cache = cache.lock();
        let now = Instant::now();

        let entry = cache.entries.get(key)?;
        if cache.is_expired(entry, now) {
            trace!(cache = %name, key = %key, "Expired entry purged on read");
            cache.remove(key);
            return None;
        }
        Some(entry.response.clone())
    }

    /// Stores a response under the cache's own age limit.
    ///
    /// ## Returns
    /// How many older entries were evicted to stay within `max_entries`.
    pub fn put(&self, name: &str, key: &str, response: HttpResponse) -> usize {
        self.store(name, key, response, None)
    }

    /// Stores a response that additionally expires after `ttl`.
    pub fn put_with_ttl(&self, name: &str, key: &str, response: HttpResponse, ttl: Duration) -> usize {
        self.store(name, key, response, Some(ttl))
    }

    fn store(&self, name: &str, key: &str, response: HttpResponse, ttl: Option<Duration>) -> usize {
        let cache = self.open(name);
        let evicted = cache.lock().insert(key.to_string(), response, ttl);
        if evicted > 0 {
            debug!(cache = %name, evicted, "Evicted oldest entries");
        }
        evicted
    }

    /// Applies both limits of a cache now, instead of lazily.
    ///
    /// ## Returns
    /// Number of entries removed.
    pub fn evict(&self, name: &str) -> usize {
        let Some(cache) = self.existing(name) else {
            return 0;
        };
        let mut cache = cache.lock();
        let expired = cache.purge_expired(Instant::now());
        expired + cache.trim_to_limit()
    }

    /// Empties a cache in one step. Readers see either all or none of it.
    pub fn clear(&self, name: &str) -> usize {
        let Some(cache) = self.existing(name) else {
            return 0;
        };
        let mut cache = cache.lock();
        let removed = cache.entries.len();
        cache.entries.clear();
        cache.order.clear();
        removed
    }

    /// Removes a whole cache.
    pub fn delete(&self, name: &str) -> bool {
        let removed = self.caches.write().remove(name).is_some();
        if removed {
            debug!(cache = %name, "Cache deleted");
        }
        removed
    }

    /// Deletes every cache of `names`' namespace that is not current.
    ///
    /// ## Returns
    /// The deleted cache names.
    pub fn delete_stale(&self, names: &CacheNames) -> Vec<String> {
        let mut caches = self.caches.write();
        let stale: Vec<String> = caches.keys().filter(|name| names.is_stale(name)).cloned().collect();
        for name in &stale {
            caches.remove(name);
        }
        stale
    }

    /// Names of all open caches, sorted.
    pub fn cache_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Live keys of a cache, oldest first.
    pub fn keys(&self, name: &str) -> Vec<String> {
        let Some(cache) = self.existing(name) else {
            return Vec::new();
        };
        let cache = cache.lock();
        let now = Instant::now();
        cache
            .order
            .values()
            .filter(|key| {
                cache
                    .entries
                    .get(*key)
                    .is_some_and(|entry| !cache.is_expired(entry, now))
            })
            .cloned()
            .collect()
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self, name: &str) -> usize {
        self.existing(name).map_or(0, |cache| cache.lock().entries.len())
    }

    pub fn is_empty(&self, name: &str) -> bool {
        self.len(name) == 0
    }

    pub fn has_cache(&self, name: &str) -> bool {
        self.caches.read().contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(n: usize) -> HttpResponse {
        HttpResponse::new(200, format!("page {n}"))
    }

    fn bounded(max_entries: Option<usize>, max_age_secs: Option<u64>) -> CacheStore {
        let store = CacheStore::new();
        store.configure("test", CacheLimits::new(max_entries, max_age_secs));
        store
    }

    #[test]
    fn test_put_and_get() {
        let store = CacheStore::new();
        store.put("test", "GET /a", page(1));

        assert_eq!(store.get("test", "GET /a"), Some(page(1)));
        assert_eq!(store.get("test", "GET /b"), None);
        assert_eq!(store.get("other", "GET /a"), None);
    }

    #[test]
    fn test_same_key_overwrites() {
        let store = CacheStore::new();
        store.put("test", "GET /a", page(1));
        store.put("test", "GET /a", page(2));

        assert_eq!(store.len("test"), 1);
        assert_eq!(store.get("test", "GET /a"), Some(page(2)));
    }

    #[test]
    fn test_oldest_inserted_evicted_first() {
        let store = bounded(Some(3), None);
        for n in 0..4 {
            store.put("test", &format!("GET /{n}"), page(n));
        }

        assert_eq!(store.len("test"), 3);
        assert_eq!(store.get("test", "GET /0"), None);
        assert_eq!(store.keys("test"), vec!["GET /1", "GET /2", "GET /3"]);
    }

    #[test]
    fn test_rewrite_counts_as_newest() {
        let store = bounded(Some(2), None);
        store.put("test", "GET /a", page(1));
        store.put("test", "GET /b", page(2));
        store.put("test", "GET /a", page(3));
        store.put("test", "GET /c", page(4));

        assert_eq!(store.keys("test"), vec!["GET /a", "GET /c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_older_than_max_age_are_invisible() {
        let store = bounded(None, Some(60));
        store.put("test", "GET /a", page(1));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(store.get("test", "GET /a").is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.get("test", "GET /a").is_none());
        assert_eq!(store.len("test"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_override_shorter_than_max_age() {
        let store = bounded(None, Some(86_400));
        store.put_with_ttl("test", "GET /api/stock", page(1), Duration::from_secs(300));
        store.put("test", "GET /api/products", page(2));

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(store.get("test", "GET /api/stock").is_none());
        assert!(store.get("test", "GET /api/products").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_purges_expired() {
        let store = bounded(None, Some(10));
        store.put("test", "GET /a", page(1));
        tokio::time::advance(Duration::from_secs(5)).await;
        store.put("test", "GET /b", page(2));
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(store.len("test"), 2);
        assert_eq!(store.evict("test"), 1);
        assert_eq!(store.keys("test"), vec!["GET /b"]);
    }

    #[test]
    fn test_clear_and_delete() {
        let store = CacheStore::new();
        store.put("test", "GET /a", page(1));
        store.put("test", "GET /b", page(2));

        assert_eq!(store.clear("test"), 2);
        assert!(store.has_cache("test"));
        assert!(store.is_empty("test"));

        assert!(store.delete("test"));
        assert!(!store.delete("test"));
        assert!(store.cache_names().is_empty());
    }

    #[test]
    fn test_delete_stale_keeps_current_and_foreign() {
        let store = CacheStore::new();
        let names = CacheNames::new("stockroom", "v2");
        for name in ["stockroom-api-v1", "stockroom-api-v2", "other-app-v1"] {
            store.put(name, "GET /", page(0));
        }

        assert_eq!(store.delete_stale(&names), vec!["stockroom-api-v1".to_string()]);
        assert_eq!(store.cache_names(), vec!["other-app-v1", "stockroom-api-v2"]);
    }

    #[test]
    fn test_configure_shrinks_open_cache() {
        let store = CacheStore::new();
        for n in 0..5 {
            store.put("test", &format!("GET /{n}"), page(n));
        }
        store.configure("test", CacheLimits::new(Some(2), None));

        assert_eq!(store.keys("test"), vec!["GET /3", "GET /4"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_of_one_key_leave_one_entry() {
        let store = bounded(Some(10), None);
        let writers: Vec<_> = (0..8)
            .map(|w| {
                let store = store.clone();
                tokio::spawn(async move {
                    for n in 0..100 {
                        store.put("test", "GET /api/stock", page(w * 100 + n));
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        assert_eq!(store.len("test"), 1);
        assert_eq!(store.keys("test"), vec!["GET /api/stock"]);
        assert!(store.get("test", "GET /api/stock").is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_clear_during_writes_leaves_a_suffix() {
        let store = CacheStore::new();
        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for n in 0..500 {
                    store.put("test", &format!("GET /{n}"), page(n));
                    tokio::task::yield_now().await;
                }
            })
        };
        let clearer = {
            let store = store.clone();
            tokio::spawn(async move {
                while store.len("test") < 100 {
                    tokio::task::yield_now().await;
                }
                store.clear("test")
            })
        };

        let cleared = clearer.await.unwrap();
        writer.await.unwrap();
        assert!(cleared >= 100);

        // everything written before the clear is gone, everything after is intact
        let keys = store.keys("test");
        assert_eq!(keys.len(), store.len("test"));
        assert_eq!(keys.len() + cleared, 500);
        let first = 500 - keys.len();
        let expected: Vec<String> = (first..500).map(|n| format!("GET /{n}")).collect();
        assert_eq!(keys, expected);
    }
}
