use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A declarative actor definition.
///
/// Actors are async units of work. HTTP request fields are template strings
/// rendered against the context/event at dispatch time. Actors not declared
/// here may still be referenced by name when the host registers them in code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActorDef {
  Http {
    #[serde(default = "default_method")]
    method: String,
    url: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<Value>,
    /// Exact status the response must carry; any 2xx accepted when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    expect_status: Option<u16>,
    /// JSON-Logic predicate over `{status, data}`; a truthy result marks a
    /// transport-successful response as a logical failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    error_when: Option<Value>,
  },
  /// Resolve with `value` after `delay_ms`.
  Delay {
    delay_ms: u64,
    #[serde(default)]
    value: Value,
  },
}

fn default_method() -> String {
  "GET".to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn http_defaults_to_get() {
    let actor: ActorDef = serde_json::from_value(json!({
      "type": "http",
      "url": "https://api.example.com/users/{{ context.user_id }}"
    }))
    .unwrap();

    match actor {
      ActorDef::Http { method, .. } => assert_eq!(method, "GET"),
      _ => panic!("expected http actor"),
    }
  }

  #[test]
  fn delay_parses() {
    let actor: ActorDef = serde_json::from_value(json!({
      "type": "delay",
      "delay_ms": 250,
      "value": { "ok": true }
    }))
    .unwrap();
    assert!(matches!(actor, ActorDef::Delay { delay_ms: 250, .. }));
  }
}
