use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single transition candidate.
///
/// Guards may be written three ways, distinguished at compile time:
/// - an inline JSON-Logic tree: `{ ">": [{ "var": "context.score" }, 50] }`
/// - the name of a guard declared in the flow's `guards` map
/// - a shorthand string: `"greater_than:context.score:50"`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionDef {
  /// Target state id: absolute (path-qualified) or a sibling id. `None`
  /// makes this an internal transition: actions run, the state is kept.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub target: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub guard: Option<Value>,
  /// Action references run when the transition fires, between the exit and
  /// entry hooks.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub actions: Vec<String>,
}

/// A delayed transition. The timer is armed on state entry and cancelled if
/// the state is exited before it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AfterDef {
  pub delay_ms: u64,
  #[serde(flatten)]
  pub transition: TransitionDef,
}

/// Accepts a single item or a list in JSON; always behaves as a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
  One(T),
  Many(Vec<T>),
}

impl<T> OneOrMany<T> {
  pub fn as_slice(&self) -> &[T] {
    match self {
      OneOrMany::One(item) => std::slice::from_ref(item),
      OneOrMany::Many(items) => items,
    }
  }
}

impl<T> From<OneOrMany<T>> for Vec<T> {
  fn from(value: OneOrMany<T>) -> Self {
    match value {
      OneOrMany::One(item) => vec![item],
      OneOrMany::Many(items) => items,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn single_transition_parses_as_one() {
    let t: OneOrMany<TransitionDef> =
      serde_json::from_value(json!({ "target": "b" })).unwrap();
    assert_eq!(t.as_slice().len(), 1);
    assert_eq!(t.as_slice()[0].target.as_deref(), Some("b"));
  }

  #[test]
  fn candidate_list_preserves_order() {
    let t: OneOrMany<TransitionDef> = serde_json::from_value(json!([
      { "target": "high", "guard": "greater_than:context.score:80" },
      { "target": "low" }
    ]))
    .unwrap();

    let candidates = t.as_slice();
    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].target.as_deref(), Some("high"));
    assert!(candidates[1].guard.is_none());
  }

  #[test]
  fn after_flattens_transition_fields() {
    let after: AfterDef =
      serde_json::from_value(json!({ "delay_ms": 3000, "target": "timeout" })).unwrap();
    assert_eq!(after.delay_ms, 3000);
    assert_eq!(after.transition.target.as_deref(), Some("timeout"));
  }
}
