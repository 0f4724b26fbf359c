//! Guard shorthand strings.
//!
//! Compile-time sugar of the form `"<op>:<field>[:<literal>]"`, e.g.
//! `"greater_than:context.score:80"`. Parsed once into the expression AST;
//! never re-parsed at evaluation time. Both snake_case and camelCase op
//! names are accepted.

use machina_expr::Expr;
use serde_json::Value;

/// Parse a shorthand guard into an expression tree.
pub fn parse(text: &str) -> Result<Expr, String> {
  let mut parts = text.splitn(3, ':');
  let op = parts.next().unwrap_or_default();
  let field = parts
    .next()
    .ok_or_else(|| "missing field segment".to_string())?;
  let literal = parts.next();

  let var = Box::new(Expr::var(field));
  let literal_expr = || -> Result<Box<Expr>, String> {
    let raw = literal.ok_or_else(|| format!("op '{op}' requires a literal segment"))?;
    Ok(Box::new(Expr::Literal(parse_literal(raw))))
  };

  match normalize(op).as_str() {
    "equals" | "eq" => Ok(Expr::Eq(var, literal_expr()?)),
    "notequals" | "ne" => Ok(Expr::Ne(var, literal_expr()?)),
    "greaterthan" | "gt" => Ok(Expr::Gt(var, literal_expr()?)),
    "greaterorequal" | "gte" => Ok(Expr::Ge(var, literal_expr()?)),
    "lessthan" | "lt" => Ok(Expr::Lt(var, literal_expr()?)),
    "lessorequal" | "lte" => Ok(Expr::Le(var, literal_expr()?)),
    "truthy" => Ok(*var),
    "falsy" => Ok(Expr::Not(var)),
    "contains" => Ok(Expr::In(literal_expr()?, var)),
    other => Err(format!("unknown shorthand op '{other}'")),
  }
}

/// Heuristic: could this string be a shorthand at all?
pub fn looks_like_shorthand(text: &str) -> bool {
  text.contains(':')
}

fn normalize(op: &str) -> String {
  op.chars()
    .filter(|c| *c != '_')
    .map(|c| c.to_ascii_lowercase())
    .collect()
}

/// Literals parse as JSON where possible (`80` -> number, `true` -> bool),
/// falling back to a bare string.
fn parse_literal(raw: &str) -> Value {
  serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn greater_than_both_spellings() {
    for text in ["greater_than:context.score:80", "greaterThan:context.score:80"] {
      let expr = parse(text).unwrap();
      assert!(expr.evaluate_bool(&json!({ "context": { "score": 81 } })).unwrap());
      assert!(!expr.evaluate_bool(&json!({ "context": { "score": 80 } })).unwrap());
    }
  }

  #[test]
  fn equals_with_string_literal() {
    let expr = parse("equals:context.status:approved").unwrap();
    assert!(expr
      .evaluate_bool(&json!({ "context": { "status": "approved" } }))
      .unwrap());
  }

  #[test]
  fn truthy_needs_no_literal() {
    let expr = parse("truthy:context.flag").unwrap();
    assert!(expr.evaluate_bool(&json!({ "context": { "flag": 1 } })).unwrap());
    assert!(!expr.evaluate_bool(&json!({ "context": {} })).unwrap());
  }

  #[test]
  fn unknown_op_is_an_error() {
    assert!(parse("sorts_before:context.a:b").is_err());
  }

  #[test]
  fn missing_literal_is_an_error() {
    assert!(parse("greater_than:context.score").is_err());
  }
}
