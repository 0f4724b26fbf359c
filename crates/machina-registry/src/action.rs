//! Compiled actions and their execution.
//!
//! Actions are pure `context -> context'` functions: each takes the current
//! context by value and returns the next one, so ordering within a hook list
//! is deterministic and the only side channel is the log.

use serde_json::{json, Value};
use tracing::warn;

use machina_config::{ActionDef, LogLevel};
use machina_expr::{path, Expr, ExprError};
use machina_template::Renderer;

use crate::error::ActionError;
use crate::registry::Registry;

/// An action with every embedded expression parsed ahead of time.
///
/// Produced by the compiler; executed by the runtime via [`run_action`].
/// Targets are dot-paths relative to the context root; expression `var`
/// paths are scope-qualified (`context.…` / `event.…`).
#[derive(Debug, Clone)]
pub enum CompiledAction {
  Assign { target: String, value: Expr },
  Copy { from: String, to: String },
  Clear { target: String },
  Append { target: String, value: Expr },
  GenerateId { target: String, prefix: String },
  Log { message: String, level: LogLevel },
  RenderTemplate { target: String, template: String },
  EvaluateExpr { target: String, expr: Expr },
  Validate { rules: Vec<CompiledRule> },
  /// Host-registered action, dispatched through the registry by name.
  Custom(String),
}

#[derive(Debug, Clone)]
pub struct CompiledRule {
  pub expr: Expr,
  pub message: String,
}

impl CompiledAction {
  /// Parse a declarative definition's expressions.
  pub fn compile(def: &ActionDef) -> Result<Self, ExprError> {
    Ok(match def {
      ActionDef::Assign { target, value } => CompiledAction::Assign {
        target: target.clone(),
        value: Expr::parse(value)?,
      },
      ActionDef::Copy { from, to } => CompiledAction::Copy {
        from: from.clone(),
        to: to.clone(),
      },
      ActionDef::Clear { target } => CompiledAction::Clear {
        target: target.clone(),
      },
      ActionDef::Append { target, value } => CompiledAction::Append {
        target: target.clone(),
        value: Expr::parse(value)?,
      },
      ActionDef::GenerateId { target, prefix } => CompiledAction::GenerateId {
        target: target.clone(),
        prefix: prefix.clone(),
      },
      ActionDef::Log { message, level } => CompiledAction::Log {
        message: message.clone(),
        level: *level,
      },
      ActionDef::RenderTemplate { target, template } => CompiledAction::RenderTemplate {
        target: target.clone(),
        template: template.clone(),
      },
      ActionDef::EvaluateExpr { target, expr } => CompiledAction::EvaluateExpr {
        target: target.clone(),
        expr: Expr::parse(expr)?,
      },
      ActionDef::Validate { rules } => CompiledAction::Validate {
        rules: rules
          .iter()
          .map(|rule| {
            Ok(CompiledRule {
              expr: Expr::parse(&rule.expr)?,
              message: rule.message.clone(),
            })
          })
          .collect::<Result<_, ExprError>>()?,
      },
    })
  }
}

/// Execute one action, returning the next context.
pub fn run_action(
  action: &CompiledAction,
  mut context: Value,
  event: Option<&Value>,
  renderer: &Renderer,
  registry: &Registry,
) -> Result<Value, ActionError> {
  let scope = scope_of(&context, event);
  match action {
    CompiledAction::Assign { target, value } => {
      let value = value.evaluate(&scope)?;
      path::set(&mut context, target, value);
    }
    CompiledAction::Copy { from, to } => {
      let value = path::get(&context, from).cloned().unwrap_or(Value::Null);
      path::set(&mut context, to, value);
    }
    CompiledAction::Clear { target } => {
      path::clear(&mut context, target);
    }
    CompiledAction::Append { target, value } => {
      let value = value.evaluate(&scope)?;
      match path::get(&context, target) {
        Some(Value::Array(items)) => {
          let mut items = items.clone();
          items.push(value);
          path::set(&mut context, target, Value::Array(items));
        }
        _ => path::set(&mut context, target, Value::Array(vec![value])),
      }
    }
    CompiledAction::GenerateId { target, prefix } => {
      let id = registry.ids().next(prefix);
      path::set(&mut context, target, Value::String(id));
    }
    CompiledAction::Log { message, level } => {
      let rendered = renderer.render(message, &context, event);
      match level {
        LogLevel::Debug => tracing::debug!(target: "machina::flow", "{rendered}"),
        LogLevel::Info => tracing::info!(target: "machina::flow", "{rendered}"),
        LogLevel::Warn => tracing::warn!(target: "machina::flow", "{rendered}"),
        LogLevel::Error => tracing::error!(target: "machina::flow", "{rendered}"),
      }
    }
    CompiledAction::RenderTemplate { target, template } => {
      let rendered = renderer.render(template, &context, event);
      path::set(&mut context, target, Value::String(rendered));
    }
    CompiledAction::EvaluateExpr { target, expr } => {
      let value = expr.evaluate(&scope)?;
      path::set(&mut context, target, value);
    }
    CompiledAction::Validate { rules } => {
      for rule in rules {
        // An unevaluable rule counts as failed: validation errs towards
        // reporting, never towards silently passing.
        let passed = rule.expr.evaluate_bool(&scope).unwrap_or_else(|e| {
          warn!(error = %e, "validation rule failed to evaluate");
          false
        });
        if !passed {
          let mut errors = match path::get(&context, "errors") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
          };
          errors.push(Value::String(rule.message.clone()));
          path::set(&mut context, "errors", Value::Array(errors));
        }
      }
    }
    CompiledAction::Custom(name) => {
      context = registry.run_custom_action(name, context, event)?;
    }
  }
  Ok(context)
}

fn scope_of(context: &Value, event: Option<&Value>) -> Value {
  match event {
    Some(event) => json!({ "context": context, "event": event }),
    None => json!({ "context": context }),
  }
}
