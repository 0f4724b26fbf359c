//! Result caching for actor invocations.
//!
//! Entries are written on successful completion when the invoke declares a
//! TTL, read before dispatch, and evicted lazily when a lookup finds them
//! expired. The cache is shared across invocations within one flow instance.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde_json::Value;

#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub value: Value,
  pub expires_at: Instant,
}

/// TTL cache for invoke results, keyed by the rendered cache key.
#[derive(Clone)]
pub struct InvokeCache {
  entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl InvokeCache {
  pub fn new() -> Self {
    Self {
      entries: Arc::new(RwLock::new(HashMap::new())),
    }
  }

  /// Unexpired value for `key`, if any. Expired entries are removed here
  /// rather than by a sweeper.
  pub fn get(&self, key: &str) -> Option<Value> {
    // Try read lock first
    {
      let entries = self.entries.read().unwrap();
      match entries.get(key) {
        Some(entry) if entry.expires_at > Instant::now() => {
          return Some(entry.value.clone());
        }
        Some(_) => {}
        None => return None,
      }
    }

    // Entry exists but is stale: evict with the write lock.
    let mut entries = self.entries.write().unwrap();
    if let Some(entry) = entries.get(key) {
      if entry.expires_at > Instant::now() {
        return Some(entry.value.clone());
      }
      entries.remove(key);
    }
    None
  }

  pub fn insert(&self, key: String, value: Value, ttl: Duration) {
    let mut entries = self.entries.write().unwrap();
    entries.insert(
      key,
      CacheEntry {
        value,
        expires_at: Instant::now() + ttl,
      },
    );
  }

  pub fn clear(&self) {
    let mut entries = self.entries.write().unwrap();
    entries.clear();
  }

  #[cfg(test)]
  pub(crate) fn len(&self) -> usize {
    self.entries.read().unwrap().len()
  }
}

impl Default for InvokeCache {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn hit_within_ttl() {
    let cache = InvokeCache::new();
    cache.insert("k".to_string(), json!(1), Duration::from_secs(60));
    assert_eq!(cache.get("k"), Some(json!(1)));
  }

  #[test]
  fn expired_entries_are_evicted_on_lookup() {
    let cache = InvokeCache::new();
    cache.insert("k".to_string(), json!(1), Duration::from_millis(0));
    assert_eq!(cache.get("k"), None);
    assert_eq!(cache.len(), 0);
  }

  #[test]
  fn miss_on_unknown_key() {
    let cache = InvokeCache::new();
    assert_eq!(cache.get("nope"), None);
  }
}
