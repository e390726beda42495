//! Keyed store of oracle scores, indexed by a hash of the text that was scored.

use cached::{Cached, TimedSizedCache};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextKey(u64);

impl TextKey {
    pub fn of(text: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        Self(hasher.finish())
    }
}

/// Size-bounded (least recently used evicted first) and time-bounded score cache.
#[derive(Clone)]
pub struct SentimentCache {
    inner: Arc<Mutex<TimedSizedCache<TextKey, f64>>>,
}

impl SentimentCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TimedSizedCache::with_size_and_lifespan(
                capacity.max(1),
                ttl,
            ))),
        }
    }

    pub async fn get(&self, key: TextKey) -> Option<f64> {
        let mut cache = self.inner.lock().await;
        cache.cache_get(&key).copied()
    }

    pub async fn insert(&self, key: TextKey, score: f64) {
        let mut cache = self.inner.lock().await;
        let _ = cache.cache_set(key, score);
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.inner.lock().await.cache_size()
    }
}

impl std::fmt::Debug for SentimentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentimentCache").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_text_same_key() {
        assert_eq!(TextKey::of("Apple beats estimates"), TextKey::of("Apple beats estimates"));
        assert_ne!(TextKey::of("Apple beats estimates"), TextKey::of("Apple misses estimates"));
    }

    #[tokio::test]
    async fn insert_then_get() {
        let cache = SentimentCache::new(8, Duration::from_secs(60));
        let key = TextKey::of("upbeat guidance");
        assert_eq!(cache.get(key).await, None);

        cache.insert(key, 0.7).await;
        assert_eq!(cache.get(key).await, Some(0.7));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn evicts_least_recently_used_when_full() {
        let cache = SentimentCache::new(2, Duration::from_secs(60));
        let (a, b, c) = (TextKey::of("a"), TextKey::of("b"), TextKey::of("c"));
        cache.insert(a, 0.1).await;
        cache.insert(b, 0.2).await;
        // Touch `a` so `b` becomes the eviction candidate.
        assert_eq!(cache.get(a).await, Some(0.1));
        cache.insert(c, 0.3).await;

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get(b).await, None);
        assert_eq!(cache.get(a).await, Some(0.1));
        assert_eq!(cache.get(c).await, Some(0.3));
    }
}
