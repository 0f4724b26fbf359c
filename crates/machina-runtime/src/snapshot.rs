use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What the host sees after each processed message: the current state and a
/// copy of the context. The host reads `meta.view` off the compiled state
/// for `state_id` to decide what to mount; the core never interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
  pub state_id: String,
  pub context: Value,
}
