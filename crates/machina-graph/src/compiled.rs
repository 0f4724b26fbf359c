use std::collections::HashMap;

use serde_json::Value;

use machina_binding::CompiledBinding;
use machina_expr::Expr;
use machina_registry::{CompiledAction, InvokePlan};

/// A flow with every reference resolved, ready for execution.
///
/// Immutable after compilation; any number of runtime instances may share
/// one behind an `Arc`.
#[derive(Debug)]
pub struct CompiledFlow {
  pub id: String,
  /// Fully resolved initial leaf (compound initials already descended).
  pub initial: String,
  pub initial_context: Value,
  pub(crate) states: HashMap<String, CompiledState>,
  pub warnings: Vec<String>,
}

impl CompiledFlow {
  pub fn state(&self, id: &str) -> Option<&CompiledState> {
    self.states.get(id)
  }

  pub fn initial_state(&self) -> &CompiledState {
    self
      .states
      .get(&self.initial)
      .expect("compiler guarantees the initial state exists")
  }

  pub fn state_ids(&self) -> impl Iterator<Item = &str> {
    self.states.keys().map(String::as_str)
  }
}

/// One flattened, runtime-visible state.
#[derive(Debug)]
pub struct CompiledState {
  /// Path-qualified id, e.g. `risk.assessment.evaluation`.
  pub id: String,
  pub is_final: bool,
  /// Opaque `meta.view` payload for the host renderer.
  pub view: Option<Value>,
  pub entry_actions: Vec<CompiledAction>,
  pub exit_actions: Vec<CompiledAction>,
  /// Event name -> ordered candidates (own first, then inherited from
  /// enclosing compound states, nearest first).
  pub transitions: HashMap<String, Vec<CompiledTransition>>,
  pub invokes: Vec<CompiledInvoke>,
  pub afters: Vec<CompiledAfter>,
  pub input_bindings: Vec<CompiledBinding>,
  pub output_bindings: Vec<CompiledBinding>,
}

impl CompiledState {
  pub fn candidates(&self, event: &str) -> &[CompiledTransition] {
    self
      .transitions
      .get(event)
      .map(Vec::as_slice)
      .unwrap_or(&[])
  }
}

/// A transition with its guard parsed and target resolved to a leaf id.
#[derive(Debug)]
pub struct CompiledTransition {
  /// `None` marks an internal transition: actions run, the state is kept.
  pub target: Option<String>,
  pub guard: Option<Expr>,
  pub actions: Vec<CompiledAction>,
}

/// An invoke with its actor bound and completion transitions resolved.
#[derive(Debug)]
pub struct CompiledInvoke {
  pub plan: InvokePlan,
  pub on_done: Vec<CompiledTransition>,
  pub on_error: Vec<CompiledTransition>,
}

/// A delayed transition armed on state entry.
#[derive(Debug)]
pub struct CompiledAfter {
  pub delay_ms: u64,
  pub candidates: Vec<CompiledTransition>,
}
