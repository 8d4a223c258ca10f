//! Shared TTL cache keyed by provider id.
//!
//! Entries expire by age only. Expired entries stay in the map until the
//! next wholesale invalidation; nothing is ever removed individually.

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::clock::Clock;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    pub value: V,
    pub fetched_at: DateTime<Utc>,
}

struct Inner<K, V> {
    ttl: Duration,
    /// Bumped by every wholesale invalidation
    generation: u64,
    entries: HashMap<K, CacheEntry<V>>,
}

pub struct TtlCache<K, V> {
    inner: RwLock<Inner<K, V>>,
    clock: Arc<dyn Clock>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                ttl,
                generation: 0,
                entries: HashMap::new(),
            }),
            clock,
        }
    }

    /// Live entry for `key`, or `None` if absent or `now - fetched_at >= ttl`
    pub async fn get(&self, key: &K) -> Option<CacheEntry<V>> {
        let inner = self.inner.read().await;
        let entry = inner.entries.get(key)?;
        let ttl = TimeDelta::from_std(inner.ttl).unwrap_or(TimeDelta::MAX);
        if self.clock.now() - entry.fetched_at < ttl {
            Some(entry.clone())
        } else {
            None
        }
    }

    /// Overwrite `key`, stamped with the current time
    pub async fn set(&self, key: K, value: V) -> DateTime<Utc> {
        let now = self.clock.now();
        self.set_at(key, value, now).await;
        now
    }

    /// Overwrite `key` with an explicit stamp; a future stamp extends the entry's life
    pub async fn set_at(&self, key: K, value: V, fetched_at: DateTime<Utc>) {
        self.inner
            .write()
            .await
            .entries
            .insert(key, CacheEntry { value, fetched_at });
    }

    /// Like [`TtlCache::set_at`], but dropped if the cache was invalidated
    /// since `generation` was read. Returns whether the entry was stored.
    pub async fn set_if_current(
        &self,
        generation: u64,
        key: K,
        value: V,
        fetched_at: DateTime<Utc>,
    ) -> bool {
        let mut inner = self.inner.write().await;
        if inner.generation != generation {
            return false;
        }
        inner.entries.insert(key, CacheEntry { value, fetched_at });
        true
    }

    pub async fn generation(&self) -> u64 {
        self.inner.read().await.generation
    }

    /// Drop every entry by swapping in an empty map
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.entries = HashMap::new();
        inner.generation = inner.generation.wrapping_add(1);
    }

    /// Clear and install a new TTL under one write lock
    pub async fn reset(&self, ttl: Duration) {
        let mut inner = self.inner.write().await;
        inner.ttl = ttl;
        inner.entries = HashMap::new();
        inner.generation = inner.generation.wrapping_add(1);
    }

    pub async fn ttl(&self) -> Duration {
        self.inner.read().await.ttl
    }

    /// Stored entries, expired ones included
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::clock::ManualClock;
    use chrono::TimeZone;

    fn setup() -> (Arc<ManualClock>, TtlCache<&'static str, u32>) {
        let start = Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let cache = TtlCache::new(Duration::from_secs(300), clock.clone());
        (clock, cache)
    }

    #[tokio::test]
    async fn test_entry_valid_until_ttl_boundary() {
        let (clock, cache) = setup();
        let stamp = cache.set("zai", 7).await;

        clock.advance(TimeDelta::seconds(299));
        let entry = cache.get(&"zai").await.unwrap();
        assert_eq!(entry.value, 7);
        assert_eq!(entry.fetched_at, stamp);

        // now - fetched_at == ttl is already expired
        clock.advance(TimeDelta::seconds(1));
        assert!(cache.get(&"zai").await.is_none());

        // expired entries are not evicted eagerly
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_set_overwrites_and_restamps() {
        let (clock, cache) = setup();
        cache.set("openai", 1).await;
        clock.advance(TimeDelta::seconds(200));
        cache.set("openai", 2).await;
        clock.advance(TimeDelta::seconds(200));

        assert_eq!(cache.get(&"openai").await.unwrap().value, 2);
    }

    #[tokio::test]
    async fn test_future_stamp_extends_lifetime() {
        let (clock, cache) = setup();
        let headroom = clock.now() + TimeDelta::minutes(30);
        cache.set_at("claude", 9, headroom).await;

        clock.advance(TimeDelta::minutes(34));
        assert!(cache.get(&"claude").await.is_some());
        clock.advance(TimeDelta::minutes(1));
        assert!(cache.get(&"claude").await.is_none());
    }

    #[tokio::test]
    async fn test_clear_and_reset_are_wholesale() {
        let (_clock, cache) = setup();
        cache.set("augment", 1).await;
        cache.set("zai", 2).await;

        cache.clear().await;
        assert!(cache.is_empty().await);

        cache.set("augment", 3).await;
        cache.reset(Duration::from_secs(60)).await;
        assert!(cache.is_empty().await);
        assert_eq!(cache.ttl().await, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_writes_from_before_invalidation_are_dropped() {
        let (clock, cache) = setup();
        let before = cache.generation().await;
        assert!(cache.set_if_current(before, "zai", 1, clock.now()).await);

        cache.reset(Duration::from_secs(300)).await;
        assert!(!cache.set_if_current(before, "openai", 2, clock.now()).await);
        assert!(cache.get(&"openai").await.is_none());

        let after = cache.generation().await;
        cache.clear().await;
        assert!(!cache.set_if_current(after, "openai", 3, clock.now()).await);
        assert!(cache.is_empty().await);
    }
}
