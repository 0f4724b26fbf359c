use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

use machina_expr::{Expr, ExprError};

use crate::actor::Actor;
use crate::error::ActionError;

/// A value -> value function applied by the data-binding engine.
pub type Transform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

type CustomAction =
  Arc<dyn Fn(Value, Option<&Value>) -> Result<Value, String> + Send + Sync>;

/// The catalog of host-registered callable units.
///
/// An explicit value, constructed once and passed by reference into the
/// compiler: never a process-wide singleton. Flow definitions contribute
/// their own named guards/actions/actors on top at compile time.
pub struct Registry {
  actions: HashMap<String, CustomAction>,
  actors: HashMap<String, Arc<dyn Actor>>,
  transforms: HashMap<String, Transform>,
  guards: HashMap<String, Expr>,
  ids: IdGenerator,
}

impl Registry {
  pub fn new() -> Self {
    let mut registry = Self {
      actions: HashMap::new(),
      actors: HashMap::new(),
      transforms: HashMap::new(),
      guards: HashMap::new(),
      ids: IdGenerator::new(),
    };
    registry.register_transform("uppercase", |v| map_str(v, |s| s.to_uppercase()));
    registry.register_transform("lowercase", |v| map_str(v, |s| s.to_lowercase()));
    registry.register_transform("trim", |v| map_str(v, |s| s.trim().to_string()));
    registry
  }

  /// Register a custom synchronous action. The closure receives the current
  /// context and event and returns the next context.
  pub fn register_action<F>(&mut self, name: impl Into<String>, action: F)
  where
    F: Fn(Value, Option<&Value>) -> Result<Value, String> + Send + Sync + 'static,
  {
    self.actions.insert(name.into(), Arc::new(action));
  }

  pub fn register_actor(&mut self, name: impl Into<String>, actor: Arc<dyn Actor>) {
    self.actors.insert(name.into(), actor);
  }

  pub fn register_transform<F>(&mut self, name: impl Into<String>, transform: F)
  where
    F: Fn(Value) -> Value + Send + Sync + 'static,
  {
    self.transforms.insert(name.into(), Arc::new(transform));
  }

  /// Register a named guard from a JSON-Logic tree. Parsed here, once.
  pub fn register_guard(
    &mut self,
    name: impl Into<String>,
    logic: &Value,
  ) -> Result<(), ExprError> {
    let expr = Expr::parse(logic)?;
    self.guards.insert(name.into(), expr);
    Ok(())
  }

  pub fn has_action(&self, name: &str) -> bool {
    self.actions.contains_key(name)
  }

  pub fn has_actor(&self, name: &str) -> bool {
    self.actors.contains_key(name)
  }

  pub fn has_transform(&self, name: &str) -> bool {
    self.transforms.contains_key(name)
  }

  pub fn actor(&self, name: &str) -> Option<Arc<dyn Actor>> {
    self.actors.get(name).cloned()
  }

  pub fn transform(&self, name: &str) -> Option<Transform> {
    self.transforms.get(name).cloned()
  }

  pub fn guard(&self, name: &str) -> Option<&Expr> {
    self.guards.get(name)
  }

  pub fn ids(&self) -> &IdGenerator {
    &self.ids
  }

  pub(crate) fn run_custom_action(
    &self,
    name: &str,
    context: Value,
    event: Option<&Value>,
  ) -> Result<Value, ActionError> {
    let action = self
      .actions
      .get(name)
      .ok_or_else(|| ActionError::Unknown(name.to_string()))?;
    action(context, event).map_err(|message| ActionError::Custom {
      name: name.to_string(),
      message,
    })
  }
}

impl Default for Registry {
  fn default() -> Self {
    Self::new()
  }
}

fn map_str(value: Value, f: impl Fn(&str) -> String) -> Value {
  match value {
    Value::String(s) => Value::String(f(&s)),
    other => other,
  }
}

/// Generates `<prefix>-<epoch millis>-<seq>` ids: sortable by creation and
/// collision-free within a process.
pub struct IdGenerator {
  counter: AtomicU64,
}

impl IdGenerator {
  pub fn new() -> Self {
    Self {
      counter: AtomicU64::new(0),
    }
  }

  pub fn next(&self, prefix: &str) -> String {
    let millis = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_millis())
      .unwrap_or(0);
    let seq = self.counter.fetch_add(1, Ordering::Relaxed);
    if prefix.is_empty() {
      format!("{millis}-{seq}")
    } else {
      format!("{prefix}-{millis}-{seq}")
    }
  }
}

impl Default for IdGenerator {
  fn default() -> Self {
    Self::new()
  }
}
