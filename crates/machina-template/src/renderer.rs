use minijinja::{Environment, UndefinedBehavior};
use serde_json::{json, Value};
use thiserror::Error;

use crate::filters;

#[derive(Debug, Error)]
pub enum TemplateError {
  #[error("invalid template: {0}")]
  Invalid(#[from] minijinja::Error),
}

/// Renders delimiter-bound templates against `{context, event}`.
///
/// Cheap to construct and immutable once built; the runtime keeps one per
/// instance.
pub struct Renderer {
  env: Environment<'static>,
}

impl Renderer {
  pub fn new() -> Self {
    let mut env = Environment::new();
    // Dotted lookups through absent objects resolve to undefined instead of
    // erroring, and undefined prints as empty string.
    env.set_undefined_behavior(UndefinedBehavior::Chainable);
    env.add_filter("currency", filters::currency);
    env.add_filter("date", filters::date);
    Self { env }
  }

  /// Render a template. Undefined variables render empty; a malformed
  /// template renders a visible `ERROR:` marker: template output reaches
  /// end users, so failures must be visible rather than thrown.
  pub fn render(&self, template: &str, context: &Value, event: Option<&Value>) -> String {
    let scope = scope_of(context, event);
    match self.env.render_str(template, &scope) {
      Ok(rendered) => rendered,
      Err(e) => format!("ERROR: {e}"),
    }
  }

  /// Walk a JSON value and render every string leaf. Used to parameterize
  /// actor requests from templated inputs.
  pub fn render_value(&self, input: &Value, context: &Value, event: Option<&Value>) -> Value {
    match input {
      Value::String(template) => Value::String(self.render(template, context, event)),
      Value::Array(items) => Value::Array(
        items
          .iter()
          .map(|item| self.render_value(item, context, event))
          .collect(),
      ),
      Value::Object(map) => Value::Object(
        map
          .iter()
          .map(|(k, v)| (k.clone(), self.render_value(v, context, event)))
          .collect(),
      ),
      other => other.clone(),
    }
  }

  /// Report template variables that `available` paths cannot account for.
  ///
  /// A variable is satisfied when an available path equals it, or when one
  /// is a dot-prefix of the other (a known `context.user` object satisfies
  /// `context.user.name`; a known `context.user.name` write implies
  /// `context.user` exists).
  pub fn validate_requirements(
    &self,
    template: &str,
    available: &[String],
  ) -> Result<Vec<String>, TemplateError> {
    let parsed = self.env.template_from_str(template)?;
    let mut missing: Vec<String> = parsed
      .undeclared_variables(true)
      .into_iter()
      .filter(|required| !available.iter().any(|have| paths_overlap(have, required)))
      .collect();
    missing.sort();
    Ok(missing)
  }
}

impl Default for Renderer {
  fn default() -> Self {
    Self::new()
  }
}

fn scope_of(context: &Value, event: Option<&Value>) -> Value {
  match event {
    Some(event) => json!({ "context": context, "event": event }),
    None => json!({ "context": context }),
  }
}

fn paths_overlap(a: &str, b: &str) -> bool {
  a == b
    || a.strip_prefix(b).is_some_and(|rest| rest.starts_with('.'))
    || b.strip_prefix(a).is_some_and(|rest| rest.starts_with('.'))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn renders_context_paths() {
    let renderer = Renderer::new();
    let context = json!({ "user": { "name": "Ana" } });
    assert_eq!(
      renderer.render("Hello {{ context.user.name }}", &context, None),
      "Hello Ana"
    );
  }

  #[test]
  fn undefined_renders_empty() {
    let renderer = Renderer::new();
    assert_eq!(
      renderer.render("Hello {{ context.user.name }}", &json!({}), None),
      "Hello "
    );
  }

  #[test]
  fn event_fields_are_visible() {
    let renderer = Renderer::new();
    let rendered = renderer.render(
      "{{ event.type }}: {{ event.amount }}",
      &json!({}),
      Some(&json!({ "type": "PAID", "amount": 12 })),
    );
    assert_eq!(rendered, "PAID: 12");
  }

  #[test]
  fn malformed_template_renders_error_marker() {
    let renderer = Renderer::new();
    let rendered = renderer.render("{{ context.x | nope }}", &json!({ "x": 1 }), None);
    assert!(rendered.starts_with("ERROR: "), "got: {rendered}");
  }

  #[test]
  fn custom_and_builtin_filters() {
    let renderer = Renderer::new();
    let context = json!({ "total": 99.9, "name": "ana" });
    assert_eq!(
      renderer.render("{{ context.total | currency }}", &context, None),
      "$99.90"
    );
    assert_eq!(
      renderer.render("{{ context.name | upper }}", &context, None),
      "ANA"
    );
  }

  #[test]
  fn render_value_walks_string_leaves() {
    let renderer = Renderer::new();
    let context = json!({ "id": 7 });
    let input = json!({
      "url": "/users/{{ context.id }}",
      "flags": ["{{ context.id }}", 3],
      "depth": { "n": "{{ context.id }}" }
    });
    assert_eq!(
      renderer.render_value(&input, &context, None),
      json!({ "url": "/users/7", "flags": ["7", 3], "depth": { "n": "7" } })
    );
  }

  #[test]
  fn validate_requirements_reports_unknown_reads() {
    let renderer = Renderer::new();
    let available = vec!["context.user".to_string()];
    let missing = renderer
      .validate_requirements(
        "{{ context.user.name }} {{ context.order.total }}",
        &available,
      )
      .unwrap();
    assert_eq!(missing, vec!["context.order.total".to_string()]);
  }

  #[test]
  fn rendering_is_idempotent() {
    let renderer = Renderer::new();
    let context = json!({ "n": 1 });
    let a = renderer.render("{{ context.n }}", &context, None);
    let b = renderer.render("{{ context.n }}", &context, None);
    assert_eq!(a, b);
  }
}
