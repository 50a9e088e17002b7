//! Bounded in-memory key/value store with per-entry TTL and LRU eviction.
//!
//! Entries live in an `IndexMap` whose order doubles as the access order: the
//! front is the least recently used entry and is the one evicted when a new key
//! arrives at capacity. A hit moves the entry to the back.
//!
//! Expiry is enforced twice: lazily on read, and by a periodic sweep task so a
//! write-heavy, read-light workload cannot pin expired values in memory.

use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use serde::Deserialize;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::task::JoinHandle;
use tracing::debug;

use super::traits::Clearable;
use crate::clock::SharedClock;

/// Sizing and expiry policy, fixed for the lifetime of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub max_entries: usize,
  #[serde(rename = "ttl_ms")]
  pub ttl_millis: u64,
  #[serde(rename = "cleanup_interval_ms")]
  pub cleanup_interval_millis: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      max_entries: 200,
      ttl_millis: 10 * 60 * 1000,
      cleanup_interval_millis: 60 * 1000,
    }
  }
}

impl CacheConfig {
  fn ttl(&self) -> Duration {
    Duration::milliseconds(self.ttl_millis as i64)
  }

  fn cleanup_interval(&self) -> std::time::Duration {
    std::time::Duration::from_millis(self.cleanup_interval_millis.max(1))
  }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
  value: V,
  created_at: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
  fn new(value: V, now: DateTime<Utc>) -> Self {
    Self {
      value,
      created_at: now,
    }
  }

  fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
    now - self.created_at > ttl
  }
}

/// A value returned by [`LruCache::get_entry`] along with its bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue<V> {
  pub value: V,
  pub created_at: DateTime<Utc>,
}

/// Diagnostic snapshot computed from the live entries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
  pub total_items: usize,
  pub valid_items: usize,
  pub expired_items: usize,
  pub fill_percentage: f64,
}

pub struct LruCache<K, V> {
  name: &'static str,
  config: CacheConfig,
  clock: SharedClock,
  entries: Mutex<IndexMap<K, CacheEntry<V>>>,
  cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl<K, V> LruCache<K, V>
where
  K: Eq + Hash + Clone + Send + 'static,
  V: Clone + Send + 'static,
{
  pub fn new(name: &'static str, config: CacheConfig, clock: SharedClock) -> Self {
    Self {
      name,
      config,
      clock,
      entries: Mutex::new(IndexMap::with_capacity(config.max_entries)),
      cleanup_task: Mutex::new(None),
    }
  }

  fn lock(&self) -> MutexGuard<'_, IndexMap<K, CacheEntry<V>>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Insert or replace `key`. A new key at capacity evicts the LRU entry first.
  pub fn set(&self, key: K, value: V) {
    if self.config.max_entries == 0 {
      return;
    }

    let now = self.clock.now();
    let mut entries = self.lock();

    // Replacing counts as a fresh insert, so it also moves to the back.
    if entries.shift_remove(&key).is_none() && entries.len() >= self.config.max_entries {
      if entries.shift_remove_index(0).is_some() {
        debug!(cache = self.name, "evicted least recently used entry");
      }
    }

    entries.insert(key, CacheEntry::new(value, now));
  }

  /// Look up `key`, treating expired entries as misses and dropping them.
  pub fn get(&self, key: &K) -> Option<V> {
    self.get_entry(key).map(|cached| cached.value)
  }

  /// Like [`get`](Self::get), but also returns the entry's creation time.
  pub fn get_entry(&self, key: &K) -> Option<CachedValue<V>> {
    let now = self.clock.now();
    let ttl = self.config.ttl();
    let mut entries = self.lock();

    let (key, entry) = entries.shift_remove_entry(key)?;
    if entry.is_expired(now, ttl) {
      debug!(cache = self.name, "dropped expired entry on read");
      return None;
    }

    let cached = CachedValue {
      value: entry.value.clone(),
      created_at: entry.created_at,
    };

    // Re-inserting appends at the back: most recently used.
    entries.insert(key, entry);
    Some(cached)
  }

  pub fn delete(&self, key: &K) -> bool {
    self.lock().shift_remove(key).is_some()
  }

  /// Remove every entry whose key matches; returns how many were removed.
  pub fn delete_where(&self, mut predicate: impl FnMut(&K) -> bool) -> usize {
    let mut entries = self.lock();
    let before = entries.len();
    entries.retain(|key, _| !predicate(key));
    before - entries.len()
  }

  pub fn clear(&self) {
    self.lock().clear();
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  /// Drop every expired entry regardless of access pattern.
  pub fn purge_expired(&self) -> usize {
    let now = self.clock.now();
    let ttl = self.config.ttl();
    let mut entries = self.lock();
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(now, ttl));
    before - entries.len()
  }

  pub fn stats(&self) -> CacheStats {
    let now = self.clock.now();
    let ttl = self.config.ttl();
    let entries = self.lock();

    let total_items = entries.len();
    let expired_items = entries
      .values()
      .filter(|entry| entry.is_expired(now, ttl))
      .count();
    let fill_percentage = if self.config.max_entries == 0 {
      0.0
    } else {
      total_items as f64 / self.config.max_entries as f64 * 100.0
    };

    CacheStats {
      total_items,
      valid_items: total_items - expired_items,
      expired_items,
      fill_percentage,
    }
  }

  /// Keys from least to most recently used.
  #[cfg(test)]
  fn keys_in_access_order(&self) -> Vec<K> {
    self.lock().keys().cloned().collect()
  }
}

impl<K, V> LruCache<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Clone + Send + Sync + 'static,
{
  /// Spawn the periodic expiry sweep. Calling it again replaces the running task.
  ///
  /// The task only holds a weak reference, so dropping the last `Arc` ends it.
  pub fn start_cleanup(self: &Arc<Self>) {
    let weak: Weak<Self> = Arc::downgrade(self);
    let period = self.config.cleanup_interval();

    let handle = tokio::spawn(async move {
      let mut interval = tokio::time::interval(period);
      // The first tick completes immediately.
      interval.tick().await;
      loop {
        interval.tick().await;
        let Some(cache) = weak.upgrade() else {
          break;
        };
        let purged = cache.purge_expired();
        if purged > 0 {
          debug!(cache = cache.name, purged, "expired entries swept");
        }
      }
    });

    let mut task = self
      .cleanup_task
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    if let Some(previous) = task.replace(handle) {
      previous.abort();
    }
  }

  /// Stop the sweep task and empty the store.
  pub fn destroy(&self) {
    let task = self
      .cleanup_task
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    if let Some(handle) = task {
      handle.abort();
    }
    self.clear();
  }
}

impl<K, V> Drop for LruCache<K, V> {
  fn drop(&mut self) {
    if let Ok(task) = self.cleanup_task.get_mut() {
      if let Some(handle) = task.take() {
        handle.abort();
      }
    }
  }
}

impl<K, V> Clearable for LruCache<K, V>
where
  K: Eq + Hash + Clone + Send + 'static,
  V: Clone + Send + 'static,
{
  fn name(&self) -> &'static str {
    self.name
  }

  fn clear(&self) {
    LruCache::clear(self);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;

  fn cache_with(max_entries: usize, ttl_millis: u64) -> (LruCache<String, i32>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let config = CacheConfig {
      max_entries,
      ttl_millis,
      cleanup_interval_millis: 1000,
    };
    (LruCache::new("test", config, clock.clone()), clock)
  }

  #[test]
  fn test_get_refreshes_recency_before_eviction() {
    let (cache, _clock) = cache_with(2, 1000);

    cache.set("a".to_string(), 1);
    cache.set("b".to_string(), 2);
    assert_eq!(cache.get(&"a".to_string()), Some(1));
    cache.set("c".to_string(), 3);

    assert_eq!(cache.get(&"a".to_string()), Some(1));
    assert_eq!(cache.get(&"b".to_string()), None);
    assert_eq!(cache.get(&"c".to_string()), Some(3));
    assert_eq!(cache.len(), 2);
  }

  #[test]
  fn test_overflow_evicts_exactly_the_oldest() {
    let (cache, _clock) = cache_with(3, 1000);

    for (i, key) in ["k1", "k2", "k3", "k4"].iter().enumerate() {
      cache.set(key.to_string(), i as i32);
    }

    assert_eq!(
      cache.keys_in_access_order(),
      vec!["k2".to_string(), "k3".to_string(), "k4".to_string()]
    );
  }

  #[test]
  fn test_replacing_existing_key_does_not_evict() {
    let (cache, _clock) = cache_with(2, 1000);

    cache.set("a".to_string(), 1);
    cache.set("b".to_string(), 2);
    cache.set("a".to_string(), 10);

    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get(&"a".to_string()), Some(10));
    assert_eq!(cache.get(&"b".to_string()), Some(2));
  }

  #[test]
  fn test_ttl_boundary() {
    let (cache, clock) = cache_with(10, 1000);

    cache.set("x".to_string(), 7);
    clock.advance_millis(999);
    assert_eq!(cache.get(&"x".to_string()), Some(7));

    clock.advance_millis(2);
    assert_eq!(cache.get(&"x".to_string()), None);
    // Lazy expiry removed it.
    assert_eq!(cache.len(), 0);
  }

  #[test]
  fn test_delete_is_idempotent() {
    let (cache, _clock) = cache_with(10, 1000);

    cache.set("x".to_string(), 1);
    assert!(cache.delete(&"x".to_string()));
    assert!(!cache.delete(&"x".to_string()));
  }

  #[test]
  fn test_stats_counts_expired_without_removing() {
    let (cache, clock) = cache_with(4, 1000);

    cache.set("old".to_string(), 1);
    clock.advance_millis(1500);
    cache.set("new".to_string(), 2);

    let stats = cache.stats();
    assert_eq!(stats.total_items, 2);
    assert_eq!(stats.valid_items, 1);
    assert_eq!(stats.expired_items, 1);
    assert!((stats.fill_percentage - 50.0).abs() < f64::EPSILON);
  }

  #[test]
  fn test_purge_expired_sweeps_unread_entries() {
    let (cache, clock) = cache_with(10, 1000);

    cache.set("a".to_string(), 1);
    cache.set("b".to_string(), 2);
    clock.advance_millis(600);
    cache.set("c".to_string(), 3);
    clock.advance_millis(600);

    assert_eq!(cache.purge_expired(), 2);
    assert_eq!(cache.keys_in_access_order(), vec!["c".to_string()]);
  }

  #[test]
  fn test_delete_where_by_prefix() {
    let (cache, _clock) = cache_with(10, 1000);

    cache.set("page:sale:1".to_string(), 1);
    cache.set("page:sale:2".to_string(), 2);
    cache.set("page:rent:1".to_string(), 3);

    assert_eq!(cache.delete_where(|k| k.starts_with("page:sale:")), 2);
    assert_eq!(cache.keys_in_access_order(), vec!["page:rent:1".to_string()]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_cleanup_task_sweeps_and_destroy_stops_it() {
    let clock = Arc::new(ManualClock::default());
    let config = CacheConfig {
      max_entries: 10,
      ttl_millis: 100,
      cleanup_interval_millis: 50,
    };
    let cache: Arc<LruCache<String, i32>> = Arc::new(LruCache::new("sweep", config, clock.clone()));
    cache.start_cleanup();

    cache.set("a".to_string(), 1);
    clock.advance_millis(200);
    tokio::time::sleep(std::time::Duration::from_millis(120)).await;
    assert_eq!(cache.len(), 0);

    cache.destroy();
    assert!(cache.cleanup_task.lock().unwrap().is_none());
  }
}
