//! Server-side LRU cache for tool responses — repeated queries skip
//! embedding and store round trips entirely.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// LRU cache with size-based eviction.
pub struct LruCache<K: Hash + Eq + Clone, V: Clone> {
    capacity_bytes: usize,
    cache: HashMap<K, CacheEntry<V>>,
    order: VecDeque<K>,
    current_size: usize,
}

#[derive(Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    size_bytes: usize,
}

impl<K: Hash + Eq + Clone, V: Clone> LruCache<K, V> {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            capacity_bytes,
            cache: HashMap::new(),
            order: VecDeque::new(),
            current_size: 0,
        }
    }

    pub fn get(&mut self, key: &K, ttl: Duration) -> Option<V> {
        let entry = self.cache.get(key)?;
        if entry.inserted_at.elapsed() > ttl {
            self.remove(key);
            return None;
        }
        let value = entry.value.clone();
        self.move_to_front(key);
        Some(value)
    }

    pub fn put(&mut self, key: K, value: V, size_bytes: usize) {
        if let Some(old) = self.cache.remove(&key) {
            self.current_size = self.current_size.saturating_sub(old.size_bytes);
            self.order.retain(|k| k != &key);
        }

        while self.current_size + size_bytes > self.capacity_bytes && !self.cache.is_empty() {
            self.evict_lru();
        }
        // An item larger than the whole cache is not cacheable.
        if size_bytes > self.capacity_bytes {
            return;
        }

        self.cache.insert(
            key.clone(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                size_bytes,
            },
        );
        self.order.push_front(key);
        self.current_size += size_bytes;
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let entry = self.cache.remove(key)?;
        self.current_size = self.current_size.saturating_sub(entry.size_bytes);
        self.order.retain(|k| k != key);
        Some(entry.value)
    }

    pub fn clear(&mut self) {
        self.cache.clear();
        self.order.clear();
        self.current_size = 0;
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    fn move_to_front(&mut self, key: &K) {
        self.order.retain(|k| k != key);
        self.order.push_front(key.clone());
    }

    fn evict_lru(&mut self) {
        if let Some(oldest) = self.order.pop_back() {
            if let Some(entry) = self.cache.remove(&oldest) {
                self.current_size = self.current_size.saturating_sub(entry.size_bytes);
            }
        }
    }
}

const RESPONSE_CACHE_BYTES: usize = 16 * 1024 * 1024;
const RESPONSE_TTL: Duration = Duration::from_secs(120);

/// Tool-response cache keyed by `(collection, tool, args-digest)`. Any
/// write through the tool surface invalidates the collection's entries.
pub struct ResponseCache {
    inner: RwLock<LruCache<String, String>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(LruCache::new(RESPONSE_CACHE_BYTES)),
        }
    }

    fn key(collection: &str, tool: &str, args_digest: &str) -> String {
        format!("{}\u{1}{}\u{1}{}", collection, tool, args_digest)
    }

    pub async fn get(&self, collection: &str, tool: &str, args_digest: &str) -> Option<String> {
        let mut cache = self.inner.write().await;
        cache.get(&Self::key(collection, tool, args_digest), RESPONSE_TTL)
    }

    pub async fn put(&self, collection: &str, tool: &str, args_digest: &str, response: String) {
        let size = response.len();
        let mut cache = self.inner.write().await;
        cache.put(Self::key(collection, tool, args_digest), response, size);
    }

    /// Drop every cached response for a collection (called on writes).
    pub async fn invalidate_collection(&self, collection: &str) {
        let prefix = format!("{}\u{1}", collection);
        let mut cache = self.inner.write().await;
        let stale: Vec<String> = cache
            .cache
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect();
        for key in stale {
            cache.remove(&key);
        }
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_basic_get_put() {
        let mut cache: LruCache<String, String> = LruCache::new(1024);
        cache.put("a".into(), "1".into(), 10);
        assert_eq!(cache.get(&"a".into(), Duration::from_secs(60)), Some("1".into()));
        assert_eq!(cache.get(&"b".into(), Duration::from_secs(60)), None);
    }

    #[test]
    fn test_lru_size_eviction() {
        let mut cache: LruCache<String, String> = LruCache::new(30);
        cache.put("a".into(), "1".into(), 10);
        cache.put("b".into(), "2".into(), 10);
        cache.put("c".into(), "3".into(), 10);
        // inserting a fourth 10-byte entry evicts the least recently used
        cache.put("d".into(), "4".into(), 10);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get(&"a".into(), Duration::from_secs(60)), None);
    }

    #[test]
    fn test_lru_access_refreshes_order() {
        let mut cache: LruCache<String, String> = LruCache::new(30);
        cache.put("a".into(), "1".into(), 10);
        cache.put("b".into(), "2".into(), 10);
        cache.put("c".into(), "3".into(), 10);
        // touch "a" so "b" becomes the eviction victim
        let _ = cache.get(&"a".into(), Duration::from_secs(60));
        cache.put("d".into(), "4".into(), 10);
        assert!(cache.get(&"a".into(), Duration::from_secs(60)).is_some());
        assert!(cache.get(&"b".into(), Duration::from_secs(60)).is_none());
    }

    #[test]
    fn test_ttl_expiry() {
        let mut cache: LruCache<String, String> = LruCache::new(1024);
        cache.put("a".into(), "1".into(), 10);
        assert_eq!(cache.get(&"a".into(), Duration::from_millis(0)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_oversized_item_not_cached() {
        let mut cache: LruCache<String, String> = LruCache::new(10);
        cache.put("big".into(), "x".into(), 100);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_response_cache_invalidation_scoped_to_collection() {
        let cache = ResponseCache::new();
        cache.put("demo", "search_similar", "q1", "r1".into()).await;
        cache.put("other", "search_similar", "q1", "r2".into()).await;

        cache.invalidate_collection("demo").await;
        assert!(cache.get("demo", "search_similar", "q1").await.is_none());
        assert_eq!(
            cache.get("other", "search_similar", "q1").await,
            Some("r2".into())
        );
    }
}
