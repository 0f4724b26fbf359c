use serde_json::Value;
use thiserror::Error;

use machina_config::BindingDef;
use machina_expr::path;
use machina_registry::{Registry, Transform};

use crate::store::HostStores;

#[derive(Debug, Error)]
pub enum BindingError {
  #[error("unknown store prefix in '{0}' (expected context., url.query., localStorage. or sessionStorage.)")]
  UnknownPrefix(String),

  #[error("unknown transform: {0}")]
  UnknownTransform(String),
}

/// A reference into one of the known stores, parsed from its prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreRef {
  /// Dot-path inside the flow context.
  Context(String),
  UrlQuery(String),
  Local(String),
  Session(String),
}

impl StoreRef {
  pub fn parse(reference: &str) -> Result<Self, BindingError> {
    if let Some(rest) = reference.strip_prefix("context.") {
      Ok(StoreRef::Context(rest.to_string()))
    } else if let Some(rest) = reference.strip_prefix("url.query.") {
      Ok(StoreRef::UrlQuery(rest.to_string()))
    } else if let Some(rest) = reference.strip_prefix("localStorage.") {
      Ok(StoreRef::Local(rest.to_string()))
    } else if let Some(rest) = reference.strip_prefix("sessionStorage.") {
      Ok(StoreRef::Session(rest.to_string()))
    } else {
      Err(BindingError::UnknownPrefix(reference.to_string()))
    }
  }
}

/// A binding with its store references parsed and its transform resolved.
#[derive(Clone)]
pub struct CompiledBinding {
  pub source: StoreRef,
  pub target: StoreRef,
  transform: Option<Transform>,
}

impl std::fmt::Debug for CompiledBinding {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CompiledBinding")
      .field("source", &self.source)
      .field("target", &self.target)
      .field("transform", &self.transform.as_ref().map(|_| "<transform>"))
      .finish()
  }
}

impl CompiledBinding {
  /// Validate prefixes and resolve the transform name. Called by the
  /// compiler; failures become compile errors.
  pub fn compile(def: &BindingDef, registry: &Registry) -> Result<Self, BindingError> {
    let transform = match &def.transform {
      Some(name) => Some(
        registry
          .transform(name)
          .ok_or_else(|| BindingError::UnknownTransform(name.clone()))?,
      ),
      None => None,
    };
    Ok(Self {
      source: StoreRef::parse(&def.source)?,
      target: StoreRef::parse(&def.target)?,
      transform,
    })
  }

  fn read(&self, context: &Value, stores: &HostStores) -> Option<Value> {
    match &self.source {
      StoreRef::Context(p) => path::get(context, p).cloned(),
      StoreRef::UrlQuery(key) => stores.url_query.get(key).map(|s| Value::String(s.clone())),
      StoreRef::Local(key) => stores.local.get(key),
      StoreRef::Session(key) => stores.session.get(key),
    }
  }

  fn write(&self, value: Value, context: &mut Value, stores: &mut HostStores) {
    match &self.target {
      StoreRef::Context(p) => path::set(context, p, value),
      StoreRef::UrlQuery(key) => {
        let text = match value {
          Value::String(s) => s,
          other => other.to_string(),
        };
        stores.url_query.insert(key.clone(), text);
      }
      StoreRef::Local(key) => stores.local.set(key, value),
      StoreRef::Session(key) => stores.session.set(key, value),
    }
  }

  fn apply(&self, context: &mut Value, stores: &mut HostStores) {
    // A missing source leaves the target untouched.
    let Some(mut value) = self.read(context, stores) else {
      return;
    };
    if let Some(transform) = &self.transform {
      value = transform(value);
    }
    self.write(value, context, stores);
  }
}

/// Run input bindings on state entry, returning the updated context.
pub fn apply_inputs(
  bindings: &[CompiledBinding],
  mut context: Value,
  stores: &mut HostStores,
) -> Value {
  for binding in bindings {
    binding.apply(&mut context, stores);
  }
  context
}

/// Run output bindings on state exit, returning the (rarely) updated context.
pub fn apply_outputs(
  bindings: &[CompiledBinding],
  mut context: Value,
  stores: &mut HostStores,
) -> Value {
  for binding in bindings {
    binding.apply(&mut context, stores);
  }
  context
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn compile(defs: serde_json::Value) -> Vec<CompiledBinding> {
    let registry = Registry::new();
    let defs: Vec<BindingDef> = serde_json::from_value(defs).unwrap();
    defs
      .iter()
      .map(|d| CompiledBinding::compile(d, &registry).unwrap())
      .collect()
  }

  #[test]
  fn unknown_prefix_is_rejected() {
    assert!(matches!(
      StoreRef::parse("cookies.session"),
      Err(BindingError::UnknownPrefix(_))
    ));
  }

  #[test]
  fn unknown_transform_is_rejected() {
    let registry = Registry::new();
    let def: BindingDef = serde_json::from_value(json!({
      "source": "context.a",
      "target": "context.b",
      "transform": "frobnicate"
    }))
    .unwrap();
    assert!(matches!(
      CompiledBinding::compile(&def, &registry),
      Err(BindingError::UnknownTransform(_))
    ));
  }

  #[test]
  fn url_query_into_context_with_transform() {
    let bindings = compile(json!([
      { "source": "url.query.campaign", "target": "context.campaign", "transform": "uppercase" }
    ]));
    let mut stores = HostStores::in_memory()
      .with_url_query([("campaign".to_string(), "spring".to_string())].into());

    let context = apply_inputs(&bindings, json!({}), &mut stores);
    assert_eq!(context, json!({ "campaign": "SPRING" }));
  }

  #[test]
  fn context_out_to_session_storage() {
    let bindings = compile(json!([
      { "source": "context.draft", "target": "sessionStorage.draft" }
    ]));
    let mut stores = HostStores::in_memory();

    let context = apply_outputs(&bindings, json!({ "draft": { "x": 1 } }), &mut stores);
    assert_eq!(context, json!({ "draft": { "x": 1 } }));
    assert_eq!(stores.session.get("draft"), Some(json!({ "x": 1 })));
  }

  #[test]
  fn missing_source_is_skipped() {
    let bindings = compile(json!([
      { "source": "localStorage.token", "target": "context.token" }
    ]));
    let mut stores = HostStores::in_memory();

    let context = apply_inputs(&bindings, json!({ "token": "keep" }), &mut stores);
    assert_eq!(context, json!({ "token": "keep" }));
  }

  #[test]
  fn context_to_context_copy() {
    let bindings = compile(json!([
      { "source": "context.saved.name", "target": "context.form.name" }
    ]));
    let mut stores = HostStores::in_memory();

    let context = apply_inputs(&bindings, json!({ "saved": { "name": "Ana" } }), &mut stores);
    assert_eq!(context["form"]["name"], "Ana");
  }
}
