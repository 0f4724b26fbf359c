//! Dot-path access into JSON values.
//!
//! Shared by the evaluator (`var` lookup), the action built-ins (dot-path
//! assignment) and the data-binding engine.

use serde_json::{Map, Value};

/// Read the value at a dot-path. Missing segments yield `None`; numeric
/// segments index into arrays.
pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
  if path.is_empty() {
    return Some(root);
  }
  let mut current = root;
  for segment in path.split('.') {
    current = match current {
      Value::Object(map) => map.get(segment)?,
      Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
      _ => return None,
    };
  }
  Some(current)
}

/// Write `value` at a dot-path, creating intermediate objects as needed.
/// Non-object intermediates are replaced by objects.
pub fn set(root: &mut Value, path: &str, value: Value) {
  if path.is_empty() {
    *root = value;
    return;
  }
  let mut current = root;
  let segments: Vec<&str> = path.split('.').collect();
  for segment in &segments[..segments.len() - 1] {
    if !current.is_object() {
      *current = Value::Object(Map::new());
    }
    current = current
      .as_object_mut()
      .expect("just ensured object")
      .entry(segment.to_string())
      .or_insert_with(|| Value::Object(Map::new()));
  }
  if !current.is_object() {
    *current = Value::Object(Map::new());
  }
  current
    .as_object_mut()
    .expect("just ensured object")
    .insert(segments[segments.len() - 1].to_string(), value);
}

/// Remove the value at a dot-path. A no-op when the path does not resolve.
pub fn clear(root: &mut Value, path: &str) {
  let segments: Vec<&str> = path.split('.').collect();
  let mut current = root;
  for segment in &segments[..segments.len() - 1] {
    match current {
      Value::Object(map) => match map.get_mut(*segment) {
        Some(next) => current = next,
        None => return,
      },
      _ => return,
    }
  }
  if let Value::Object(map) = current {
    map.remove(segments[segments.len() - 1]);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn get_nested_and_missing() {
    let value = json!({ "user": { "name": "Ana", "tags": ["a", "b"] } });
    assert_eq!(get(&value, "user.name"), Some(&json!("Ana")));
    assert_eq!(get(&value, "user.tags.1"), Some(&json!("b")));
    assert_eq!(get(&value, "user.missing"), None);
    assert_eq!(get(&value, ""), Some(&value));
  }

  #[test]
  fn set_creates_intermediates() {
    let mut value = json!({});
    set(&mut value, "user.profile.name", json!("Ana"));
    assert_eq!(value, json!({ "user": { "profile": { "name": "Ana" } } }));
  }

  #[test]
  fn set_replaces_scalar_intermediate() {
    let mut value = json!({ "user": 42 });
    set(&mut value, "user.name", json!("Ana"));
    assert_eq!(value, json!({ "user": { "name": "Ana" } }));
  }

  #[test]
  fn clear_removes_leaf() {
    let mut value = json!({ "user": { "name": "Ana", "age": 30 } });
    clear(&mut value, "user.age");
    assert_eq!(value, json!({ "user": { "name": "Ana" } }));
    clear(&mut value, "user.missing.deep");
    assert_eq!(value, json!({ "user": { "name": "Ana" } }));
  }
}
