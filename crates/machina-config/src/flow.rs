use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::action::ActionDef;
use crate::actor::ActorDef;
use crate::state::StateDef;

/// Errors raised while loading a flow definition.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to parse flow definition: {0}")]
  Parse(#[from] serde_json::Error),
}

/// A complete flow definition as authored in JSON.
///
/// The definition is declarative: states, guarded transitions, lifecycle
/// hooks, data bindings and async invokes. Nothing here is executable until
/// the compiler resolves every string reference against a registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDef {
  pub id: String,
  /// Id of the state the flow starts in. Must exist in `states`.
  pub initial: String,
  /// Initial context object. Owned by the running instance once spawned.
  #[serde(default = "empty_object")]
  pub context: Value,
  pub states: HashMap<String, StateDef>,
  /// Named guard expressions (JSON-Logic trees), referenced by name from
  /// transitions.
  #[serde(default)]
  pub guards: HashMap<String, Value>,
  /// Named action definitions, referenced by name from lifecycle hooks and
  /// transitions.
  #[serde(default)]
  pub actions: HashMap<String, ActionDef>,
  /// Named actor definitions, referenced by name from `invoke` blocks.
  #[serde(default)]
  pub actors: HashMap<String, ActorDef>,
}

fn empty_object() -> Value {
  Value::Object(serde_json::Map::new())
}

impl FlowDef {
  /// Parse a flow definition from a JSON string.
  pub fn from_json(json: &str) -> Result<Self, ConfigError> {
    Ok(serde_json::from_str(json)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_minimal_flow() {
    let def = FlowDef::from_json(
      r#"{
        "id": "two-step",
        "initial": "a",
        "states": {
          "a": { "on": { "NEXT": { "target": "b" } } },
          "b": { "type": "final" }
        }
      }"#,
    )
    .unwrap();

    assert_eq!(def.id, "two-step");
    assert_eq!(def.initial, "a");
    assert_eq!(def.states.len(), 2);
    assert_eq!(def.context, serde_json::json!({}));
  }

  #[test]
  fn rejects_invalid_json() {
    assert!(FlowDef::from_json("{").is_err());
  }
}
