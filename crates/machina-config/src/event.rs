use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An event sent to a running flow instance.
///
/// Wire shape: `{"type": "SUBMIT", ...payload}`: the event name plus any
/// number of payload fields at the top level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
  #[serde(rename = "type")]
  pub name: String,
  #[serde(flatten)]
  pub payload: Map<String, Value>,
}

impl Event {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      payload: Map::new(),
    }
  }

  pub fn with_payload(name: impl Into<String>, payload: Map<String, Value>) -> Self {
    Self {
      name: name.into(),
      payload,
    }
  }

  /// The event as a JSON object, `type` included: the shape exposed to
  /// guards and templates as `event`.
  pub fn to_value(&self) -> Value {
    let mut map = self.payload.clone();
    map.insert("type".to_string(), Value::String(self.name.clone()));
    Value::Object(map)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn round_trips_payload() {
    let event: Event =
      serde_json::from_value(json!({ "type": "SUBMIT", "amount": 120 })).unwrap();
    assert_eq!(event.name, "SUBMIT");
    assert_eq!(event.payload["amount"], 120);
    assert_eq!(
      event.to_value(),
      json!({ "type": "SUBMIT", "amount": 120 })
    );
  }
}
