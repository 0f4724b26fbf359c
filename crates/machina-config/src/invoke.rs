use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::enums::RetryBackoff;
use crate::transition::{OneOrMany, TransitionDef};

/// An async actor call started when the owning state is entered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvokeDef {
  /// Stable id for the invoke within its state. Defaults to the actor name.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  /// Name of the actor, resolved against the flow's `actors` map or the
  /// registry.
  pub actor: String,
  /// Input passed to the actor. String leaves are rendered as templates
  /// against the context/event before dispatch.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub input: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
  #[serde(default, skip_serializing_if = "RetryDef::is_disabled")]
  pub retry: RetryDef,
  /// Template for the cache key. When set together with `cache_ttl_ms`, a
  /// successful result is cached and unexpired hits skip the call entirely.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cache_key: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cache_ttl_ms: Option<u64>,
  /// Projection of result sub-paths into context: context path -> result
  /// path (dot notation, empty string for the whole result).
  #[serde(default, skip_serializing_if = "HashMap::is_empty")]
  pub result_map: HashMap<String, String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub on_done: Option<OneOrMany<TransitionDef>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub on_error: Option<OneOrMany<TransitionDef>>,
}

impl InvokeDef {
  pub fn effective_id(&self) -> &str {
    self.id.as_deref().unwrap_or(&self.actor)
  }
}

/// Retry policy for an invoke.
///
/// `max_attempts` counts retries after the first attempt: an invoke with
/// `max_attempts: 3` makes at most 4 calls. Delay before retry `n` (1-based)
/// is derived from `backoff_ms` and the backoff mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryDef {
  #[serde(default)]
  pub max_attempts: u32,
  #[serde(default = "default_backoff_ms")]
  pub backoff_ms: u64,
  #[serde(default)]
  pub backoff: RetryBackoff,
  /// Multiplier for exponential backoff.
  #[serde(default = "default_multiplier")]
  pub multiplier: f64,
}

fn default_backoff_ms() -> u64 {
  1000
}

fn default_multiplier() -> f64 {
  2.0
}

impl Default for RetryDef {
  fn default() -> Self {
    Self {
      max_attempts: 0,
      backoff_ms: default_backoff_ms(),
      backoff: RetryBackoff::default(),
      multiplier: default_multiplier(),
    }
  }
}

impl RetryDef {
  pub fn is_disabled(&self) -> bool {
    self.max_attempts == 0
  }

  /// Delay before retry attempt `retry` (1-based).
  pub fn delay_ms(&self, retry: u32) -> u64 {
    match self.backoff {
      RetryBackoff::Constant => self.backoff_ms,
      RetryBackoff::Linear => self.backoff_ms.saturating_mul(retry as u64),
      RetryBackoff::Exponential => {
        let factor = self.multiplier.powi(retry.saturating_sub(1) as i32);
        (self.backoff_ms as f64 * factor) as u64
      }
    }
  }
}
