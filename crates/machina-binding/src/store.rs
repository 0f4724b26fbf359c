use std::collections::HashMap;

use serde_json::Value;

/// Key-value storage as seen by the binding engine.
///
/// The seam hosts implement to expose real storage (browser local/session
/// storage behind an adapter, a file, a database row). [`MemoryStore`] is
/// the in-process default.
pub trait KeyValueStore: Send {
  fn get(&self, key: &str) -> Option<Value>;
  fn set(&mut self, key: &str, value: Value);
  fn remove(&mut self, key: &str);
}

/// In-memory key-value store.
#[derive(Debug, Default)]
pub struct MemoryStore {
  entries: HashMap<String, Value>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl KeyValueStore for MemoryStore {
  fn get(&self, key: &str) -> Option<Value> {
    self.entries.get(key).cloned()
  }

  fn set(&mut self, key: &str, value: Value) {
    self.entries.insert(key.to_string(), value);
  }

  fn remove(&mut self, key: &str) {
    self.entries.remove(key);
  }
}

/// The external stores available to one flow instance.
pub struct HostStores {
  pub url_query: HashMap<String, String>,
  pub local: Box<dyn KeyValueStore>,
  pub session: Box<dyn KeyValueStore>,
}

impl HostStores {
  /// In-memory stores and an empty query string.
  pub fn in_memory() -> Self {
    Self {
      url_query: HashMap::new(),
      local: Box::new(MemoryStore::new()),
      session: Box::new(MemoryStore::new()),
    }
  }

  pub fn with_url_query(mut self, query: HashMap<String, String>) -> Self {
    self.url_query = query;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn memory_store_round_trip() {
    let mut store = MemoryStore::new();
    store.set("token", json!("abc"));
    assert_eq!(store.get("token"), Some(json!("abc")));
    store.remove("token");
    assert_eq!(store.get("token"), None);
  }
}
