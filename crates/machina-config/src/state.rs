use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::binding::BindingDef;
use crate::enums::StateKind;
use crate::invoke::InvokeDef;
use crate::transition::{AfterDef, OneOrMany, TransitionDef};

/// A single state in the flow definition.
///
/// States may nest (`states` + `initial`), forming a tree that the compiler
/// flattens into path-qualified ids. Children are inline, never referenced,
/// so the tree cannot contain cycles by construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDef {
  #[serde(rename = "type", default)]
  pub kind: StateKind,
  /// Opaque host payload (e.g. `meta.view` for a renderer). Never
  /// interpreted by the core.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub meta: Option<Value>,
  #[serde(default, skip_serializing_if = "LifecycleDef::is_empty")]
  pub lifecycle: LifecycleDef,
  #[serde(default, skip_serializing_if = "BindingSetDef::is_empty")]
  pub binding: BindingSetDef,
  /// Async actor calls started on entry.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub invoke: Vec<InvokeDef>,
  /// Event name -> ordered transition candidates.
  #[serde(default, skip_serializing_if = "HashMap::is_empty")]
  pub on: HashMap<String, OneOrMany<TransitionDef>>,
  /// Delayed transitions, scheduled once per state entry.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub after: Vec<AfterDef>,
  /// Nested child states (compound states only).
  #[serde(default, skip_serializing_if = "HashMap::is_empty")]
  pub states: HashMap<String, StateDef>,
  /// Initial child id for compound states.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub initial: Option<String>,
}

impl StateDef {
  /// A state is compound when it declares children, regardless of the
  /// `type` field.
  pub fn is_compound(&self) -> bool {
    self.kind == StateKind::Compound || !self.states.is_empty()
  }

  pub fn is_final(&self) -> bool {
    self.kind == StateKind::Final
  }

  /// The opaque view payload under `meta.view`, if any.
  pub fn view(&self) -> Option<&Value> {
    self.meta.as_ref().and_then(|m| m.get("view"))
  }
}

/// Entry/exit action hooks, run in declared order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifecycleDef {
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub on_enter: Vec<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub on_exit: Vec<String>,
}

impl LifecycleDef {
  pub fn is_empty(&self) -> bool {
    self.on_enter.is_empty() && self.on_exit.is_empty()
  }
}

/// Input/output bindings applied on entry and exit respectively.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BindingSetDef {
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub inputs: Vec<BindingDef>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub outputs: Vec<BindingDef>,
}

impl BindingSetDef {
  pub fn is_empty(&self) -> bool {
    self.inputs.is_empty() && self.outputs.is_empty()
  }
}
