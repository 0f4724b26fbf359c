use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::enums::LogLevel;

/// A declarative action definition.
///
/// Actions are synchronous context mutations. Every variant declares the
/// context paths it writes, which lets the compiler account for reads
/// downstream. Value-bearing fields are JSON-Logic trees (literals pass
/// through unchanged); template-bearing fields go through the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionDef {
  /// Set a dot-path in context to the result of an expression.
  Assign { target: String, value: Value },
  /// Copy one context dot-path to another.
  Copy { from: String, to: String },
  /// Remove a dot-path from context.
  Clear { target: String },
  /// Append the result of an expression to an array at `target`, creating
  /// the array when absent.
  Append { target: String, value: Value },
  /// Write `<prefix>-<millis>-<seq>` to `target`.
  GenerateId {
    target: String,
    #[serde(default)]
    prefix: String,
  },
  /// Emit a rendered message to the log side channel. Never mutates context.
  Log {
    message: String,
    #[serde(default)]
    level: LogLevel,
  },
  /// Render a template into a context dot-path.
  RenderTemplate { target: String, template: String },
  /// Evaluate an expression into a context dot-path.
  EvaluateExpr { target: String, expr: Value },
  /// Evaluate each rule; append `message` to `context.errors` for every rule
  /// whose expression is false.
  Validate { rules: Vec<RuleDef> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDef {
  pub expr: Value,
  pub message: String,
}

impl ActionDef {
  /// Context dot-paths this action writes, used for upstream-read analysis.
  pub fn written_paths(&self) -> Vec<&str> {
    match self {
      ActionDef::Assign { target, .. }
      | ActionDef::Append { target, .. }
      | ActionDef::GenerateId { target, .. }
      | ActionDef::RenderTemplate { target, .. }
      | ActionDef::EvaluateExpr { target, .. } => vec![target],
      ActionDef::Copy { to, .. } => vec![to],
      ActionDef::Validate { .. } => vec!["errors"],
      ActionDef::Clear { .. } | ActionDef::Log { .. } => vec![],
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn parses_tagged_variants() {
    let assign: ActionDef = serde_json::from_value(json!({
      "type": "assign",
      "target": "score",
      "value": { "+": [{ "var": "context.score" }, 10] }
    }))
    .unwrap();
    assert!(matches!(assign, ActionDef::Assign { .. }));

    let log: ActionDef = serde_json::from_value(json!({
      "type": "log",
      "message": "entered {{ context.step }}",
      "level": "warn"
    }))
    .unwrap();
    assert!(matches!(
      log,
      ActionDef::Log {
        level: LogLevel::Warn,
        ..
      }
    ));
  }

  #[test]
  fn written_paths_cover_targets() {
    let action: ActionDef = serde_json::from_value(json!({
      "type": "copy",
      "from": "draft.name",
      "to": "user.name"
    }))
    .unwrap();
    assert_eq!(action.written_paths(), vec!["user.name"]);
  }
}
