use serde_json::{Number, Value};

use crate::error::ExprError;
use crate::path;

/// A parsed expression tree.
///
/// Built from a JSON-Logic value by [`Expr::parse`]; evaluated against a
/// scope value by [`Expr::evaluate`].
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
  Literal(Value),
  /// Dot-path lookup into the scope, with an optional default for missing
  /// paths.
  Var {
    path: String,
    default: Option<Box<Expr>>,
  },
  Eq(Box<Expr>, Box<Expr>),
  Ne(Box<Expr>, Box<Expr>),
  Gt(Box<Expr>, Box<Expr>),
  Ge(Box<Expr>, Box<Expr>),
  Lt(Box<Expr>, Box<Expr>),
  Le(Box<Expr>, Box<Expr>),
  And(Vec<Expr>),
  Or(Vec<Expr>),
  Not(Box<Expr>),
  Add(Vec<Expr>),
  Sub(Vec<Expr>),
  Mul(Vec<Expr>),
  Div(Box<Expr>, Box<Expr>),
  Rem(Box<Expr>, Box<Expr>),
  /// `[cond, then, cond, then, ..., else?]`
  If(Vec<Expr>),
  /// Evaluate the second expression once per element of the first; inside,
  /// `var` resolves against the element.
  Map(Box<Expr>, Box<Expr>),
  /// Membership: element in array, or substring in string.
  In(Box<Expr>, Box<Expr>),
  Length(Box<Expr>),
}

impl Expr {
  /// Parse a JSON-Logic operator tree.
  ///
  /// An object with a single known operator key is an operation; any other
  /// value is a literal. Unknown operators and bad arity are errors here so
  /// they can never surface mid-flow.
  pub fn parse(value: &Value) -> Result<Self, ExprError> {
    let Value::Object(map) = value else {
      return Ok(Expr::Literal(value.clone()));
    };
    if map.len() != 1 {
      return Ok(Expr::Literal(value.clone()));
    }
    let (op, args) = map.iter().next().expect("map has one entry");

    match op.as_str() {
      "var" => parse_var(args),
      "==" => parse_pair(args, "==").map(|(a, b)| Expr::Eq(a, b)),
      "!=" => parse_pair(args, "!=").map(|(a, b)| Expr::Ne(a, b)),
      ">" => parse_pair(args, ">").map(|(a, b)| Expr::Gt(a, b)),
      ">=" => parse_pair(args, ">=").map(|(a, b)| Expr::Ge(a, b)),
      "<" => parse_pair(args, "<").map(|(a, b)| Expr::Lt(a, b)),
      "<=" => parse_pair(args, "<=").map(|(a, b)| Expr::Le(a, b)),
      "and" => Ok(Expr::And(parse_list(args)?)),
      "or" => Ok(Expr::Or(parse_list(args)?)),
      "!" | "not" => parse_single(args, "!").map(Expr::Not),
      "+" => Ok(Expr::Add(parse_list(args)?)),
      "-" => Ok(Expr::Sub(parse_list(args)?)),
      "*" => Ok(Expr::Mul(parse_list(args)?)),
      "/" => parse_pair(args, "/").map(|(a, b)| Expr::Div(a, b)),
      "%" => parse_pair(args, "%").map(|(a, b)| Expr::Rem(a, b)),
      "if" => {
        let branches = parse_list(args)?;
        if branches.len() < 2 {
          return Err(ExprError::Arity {
            op: "if",
            expected: "at least 2",
            got: branches.len(),
          });
        }
        Ok(Expr::If(branches))
      }
      "map" => parse_pair(args, "map").map(|(a, b)| Expr::Map(a, b)),
      "in" => parse_pair(args, "in").map(|(a, b)| Expr::In(a, b)),
      "length" => parse_single(args, "length").map(Expr::Length),
      other => Err(ExprError::UnknownOperator(other.to_string())),
    }
  }

  /// Convenience: a `var` lookup on a dot-path.
  pub fn var(path: impl Into<String>) -> Self {
    Expr::Var {
      path: path.into(),
      default: None,
    }
  }

  /// Evaluate against a scope value, conventionally
  /// `{"context": ..., "event": ...}`.
  pub fn evaluate(&self, scope: &Value) -> Result<Value, ExprError> {
    match self {
      Expr::Literal(value) => Ok(value.clone()),
      Expr::Var { path, default } => {
        match path::get(scope, path) {
          Some(found) => Ok(found.clone()),
          None => match default {
            Some(expr) => expr.evaluate(scope),
            None => Ok(Value::Null),
          },
        }
      }
      Expr::Eq(a, b) => Ok(Value::Bool(loose_eq(&a.evaluate(scope)?, &b.evaluate(scope)?))),
      Expr::Ne(a, b) => Ok(Value::Bool(!loose_eq(&a.evaluate(scope)?, &b.evaluate(scope)?))),
      Expr::Gt(a, b) => compare(scope, a, b, ">", |ord| ord == std::cmp::Ordering::Greater),
      Expr::Ge(a, b) => compare(scope, a, b, ">=", |ord| ord != std::cmp::Ordering::Less),
      Expr::Lt(a, b) => compare(scope, a, b, "<", |ord| ord == std::cmp::Ordering::Less),
      Expr::Le(a, b) => compare(scope, a, b, "<=", |ord| ord != std::cmp::Ordering::Greater),
      Expr::And(items) => {
        let mut last = Value::Bool(true);
        for item in items {
          last = item.evaluate(scope)?;
          if !is_truthy(&last) {
            return Ok(last);
          }
        }
        Ok(last)
      }
      Expr::Or(items) => {
        let mut last = Value::Bool(false);
        for item in items {
          last = item.evaluate(scope)?;
          if is_truthy(&last) {
            return Ok(last);
          }
        }
        Ok(last)
      }
      Expr::Not(inner) => Ok(Value::Bool(!is_truthy(&inner.evaluate(scope)?))),
      Expr::Add(items) => fold_numbers(scope, items, "+", 0.0, |acc, n| acc + n),
      Expr::Sub(items) => match items.len() {
        1 => {
          let n = as_number(&items[0].evaluate(scope)?, "-")?;
          Ok(number(-n))
        }
        2 => {
          let a = as_number(&items[0].evaluate(scope)?, "-")?;
          let b = as_number(&items[1].evaluate(scope)?, "-")?;
          Ok(number(a - b))
        }
        got => Err(ExprError::Arity {
          op: "-",
          expected: "1 or 2",
          got,
        }),
      },
      Expr::Mul(items) => fold_numbers(scope, items, "*", 1.0, |acc, n| acc * n),
      Expr::Div(a, b) => {
        let a = as_number(&a.evaluate(scope)?, "/")?;
        let b = as_number(&b.evaluate(scope)?, "/")?;
        if b == 0.0 {
          return Err(ExprError::DivisionByZero);
        }
        Ok(number(a / b))
      }
      Expr::Rem(a, b) => {
        let a = as_number(&a.evaluate(scope)?, "%")?;
        let b = as_number(&b.evaluate(scope)?, "%")?;
        if b == 0.0 {
          return Err(ExprError::DivisionByZero);
        }
        Ok(number(a % b))
      }
      Expr::If(branches) => {
        let mut idx = 0;
        while idx + 1 < branches.len() {
          if is_truthy(&branches[idx].evaluate(scope)?) {
            return branches[idx + 1].evaluate(scope);
          }
          idx += 2;
        }
        // Trailing else, if declared.
        if idx < branches.len() {
          branches[idx].evaluate(scope)
        } else {
          Ok(Value::Null)
        }
      }
      Expr::Map(collection, each) => {
        let collection = collection.evaluate(scope)?;
        let Value::Array(items) = collection else {
          return Err(ExprError::Type {
            op: "map",
            detail: format!("expected array, got {}", type_name(&collection)),
          });
        };
        let mut out = Vec::with_capacity(items.len());
        for item in &items {
          // Inside map, `var` resolves against the element.
          out.push(each.evaluate(item)?);
        }
        Ok(Value::Array(out))
      }
      Expr::In(needle, haystack) => {
        let needle = needle.evaluate(scope)?;
        let haystack = haystack.evaluate(scope)?;
        match &haystack {
          Value::Array(items) => Ok(Value::Bool(items.iter().any(|i| loose_eq(i, &needle)))),
          Value::String(s) => match &needle {
            Value::String(sub) => Ok(Value::Bool(s.contains(sub.as_str()))),
            other => Err(ExprError::Type {
              op: "in",
              detail: format!("cannot search string for {}", type_name(other)),
            }),
          },
          other => Err(ExprError::Type {
            op: "in",
            detail: format!("expected array or string, got {}", type_name(other)),
          }),
        }
      }
      Expr::Length(inner) => {
        let value = inner.evaluate(scope)?;
        let len = match &value {
          Value::Array(items) => items.len(),
          Value::String(s) => s.chars().count(),
          Value::Object(map) => map.len(),
          Value::Null => 0,
          other => {
            return Err(ExprError::Type {
              op: "length",
              detail: format!("expected array, string or object, got {}", type_name(other)),
            });
          }
        };
        Ok(Value::Number(Number::from(len)))
      }
    }
  }

  /// Evaluate and coerce to a boolean via truthiness: the guard contract.
  pub fn evaluate_bool(&self, scope: &Value) -> Result<bool, ExprError> {
    Ok(is_truthy(&self.evaluate(scope)?))
  }
}

/// JSON truthiness: `false`, `null`, `0`, `""`, `[]` and `{}` are false.
pub fn is_truthy(value: &Value) -> bool {
  match value {
    Value::Null => false,
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
    Value::String(s) => !s.is_empty(),
    Value::Array(items) => !items.is_empty(),
    Value::Object(map) => !map.is_empty(),
  }
}

fn parse_var(args: &Value) -> Result<Expr, ExprError> {
  match args {
    Value::String(p) => Ok(Expr::var(p.clone())),
    Value::Array(items) => match items.as_slice() {
      [Value::String(p)] => Ok(Expr::var(p.clone())),
      [Value::String(p), default] => Ok(Expr::Var {
        path: p.clone(),
        default: Some(Box::new(Expr::parse(default)?)),
      }),
      _ => Err(ExprError::BadVarPath),
    },
    _ => Err(ExprError::BadVarPath),
  }
}

fn parse_list(args: &Value) -> Result<Vec<Expr>, ExprError> {
  match args {
    Value::Array(items) => items.iter().map(Expr::parse).collect(),
    single => Ok(vec![Expr::parse(single)?]),
  }
}

fn parse_pair(args: &Value, op: &'static str) -> Result<(Box<Expr>, Box<Expr>), ExprError> {
  let items = parse_list(args)?;
  if items.len() != 2 {
    return Err(ExprError::Arity {
      op,
      expected: "2",
      got: items.len(),
    });
  }
  let mut iter = items.into_iter();
  Ok((
    Box::new(iter.next().expect("len checked")),
    Box::new(iter.next().expect("len checked")),
  ))
}

fn parse_single(args: &Value, op: &'static str) -> Result<Box<Expr>, ExprError> {
  let items = parse_list(args)?;
  if items.len() != 1 {
    return Err(ExprError::Arity {
      op,
      expected: "1",
      got: items.len(),
    });
  }
  Ok(Box::new(items.into_iter().next().expect("len checked")))
}

fn compare(
  scope: &Value,
  a: &Expr,
  b: &Expr,
  op: &'static str,
  accept: fn(std::cmp::Ordering) -> bool,
) -> Result<Value, ExprError> {
  let a = a.evaluate(scope)?;
  let b = b.evaluate(scope)?;
  let ordering = match (&a, &b) {
    (Value::Number(x), Value::Number(y)) => {
      let (x, y) = (
        x.as_f64().unwrap_or(f64::NAN),
        y.as_f64().unwrap_or(f64::NAN),
      );
      x.partial_cmp(&y).ok_or(ExprError::Type {
        op,
        detail: "non-comparable numbers".to_string(),
      })?
    }
    (Value::String(x), Value::String(y)) => x.cmp(y),
    (x, y) => {
      return Err(ExprError::Type {
        op,
        detail: format!("cannot order {} and {}", type_name(x), type_name(y)),
      });
    }
  };
  Ok(Value::Bool(accept(ordering)))
}

/// Loose equality: numbers compare by value, everything else structurally.
fn loose_eq(a: &Value, b: &Value) -> bool {
  match (a, b) {
    (Value::Number(x), Value::Number(y)) => {
      x.as_f64().unwrap_or(f64::NAN) == y.as_f64().unwrap_or(f64::NAN)
    }
    _ => a == b,
  }
}

fn fold_numbers(
  scope: &Value,
  items: &[Expr],
  op: &'static str,
  init: f64,
  fold: fn(f64, f64) -> f64,
) -> Result<Value, ExprError> {
  let mut acc = init;
  for item in items {
    acc = fold(acc, as_number(&item.evaluate(scope)?, op)?);
  }
  Ok(number(acc))
}

fn as_number(value: &Value, op: &'static str) -> Result<f64, ExprError> {
  match value {
    Value::Number(n) => n.as_f64().ok_or(ExprError::Type {
      op,
      detail: "non-finite number".to_string(),
    }),
    Value::String(s) => s.parse().map_err(|_| ExprError::Type {
      op,
      detail: format!("cannot coerce '{s}' to a number"),
    }),
    Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
    Value::Null => Ok(0.0),
    other => Err(ExprError::Type {
      op,
      detail: format!("cannot coerce {} to a number", type_name(other)),
    }),
  }
}

/// Render whole results as integers where possible, floats otherwise.
fn number(n: f64) -> Value {
  if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
    Value::Number(Number::from(n as i64))
  } else {
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
  }
}

fn type_name(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn eval(logic: serde_json::Value, scope: serde_json::Value) -> Value {
    Expr::parse(&logic).unwrap().evaluate(&scope).unwrap()
  }

  #[test]
  fn var_missing_path_yields_null() {
    let scope = json!({ "context": { "user": { "name": "Ana" } } });
    assert_eq!(eval(json!({ "var": "context.user.name" }), scope.clone()), json!("Ana"));
    assert_eq!(eval(json!({ "var": "context.user.age" }), scope.clone()), Value::Null);
    assert_eq!(
      eval(json!({ "var": ["context.user.age", 21] }), scope),
      json!(21)
    );
  }

  #[test]
  fn comparisons() {
    let scope = json!({ "context": { "score": 60 } });
    assert_eq!(eval(json!({ ">": [{ "var": "context.score" }, 50] }), scope.clone()), json!(true));
    assert_eq!(eval(json!({ "<=": [{ "var": "context.score" }, 50] }), scope.clone()), json!(false));
    assert_eq!(eval(json!({ "==": [{ "var": "context.score" }, 60.0] }), scope), json!(true));
  }

  #[test]
  fn logical_ops_short_circuit() {
    let scope = json!({ "context": { "a": 1 } });
    assert_eq!(
      eval(json!({ "and": [{ "var": "context.a" }, false] }), scope.clone()),
      json!(false)
    );
    assert_eq!(
      eval(json!({ "or": [false, { "var": "context.a" }] }), scope.clone()),
      json!(1)
    );
    assert_eq!(eval(json!({ "!": [{ "var": "context.missing" }] }), scope), json!(true));
  }

  #[test]
  fn arithmetic() {
    let scope = json!({});
    assert_eq!(eval(json!({ "+": [1, 2, 3] }), scope.clone()), json!(6));
    assert_eq!(eval(json!({ "-": [10, 4] }), scope.clone()), json!(6));
    assert_eq!(eval(json!({ "*": [2, 3, 4] }), scope.clone()), json!(24));
    assert_eq!(eval(json!({ "/": [9, 2] }), scope.clone()), json!(4.5));
    assert_eq!(eval(json!({ "%": [9, 4] }), scope), json!(1));
  }

  #[test]
  fn division_by_zero_is_recoverable() {
    let expr = Expr::parse(&json!({ "/": [1, 0] })).unwrap();
    assert!(matches!(
      expr.evaluate(&json!({})),
      Err(ExprError::DivisionByZero)
    ));
  }

  #[test]
  fn if_chains() {
    let logic = json!({ "if": [
      { ">": [{ "var": "context.score" }, 80] }, "high",
      { ">": [{ "var": "context.score" }, 50] }, "medium",
      "low"
    ]});
    assert_eq!(eval(logic.clone(), json!({ "context": { "score": 90 } })), json!("high"));
    assert_eq!(eval(logic.clone(), json!({ "context": { "score": 60 } })), json!("medium"));
    assert_eq!(eval(logic, json!({ "context": { "score": 10 } })), json!("low"));
  }

  #[test]
  fn collection_ops() {
    let scope = json!({ "context": { "items": [1, 2, 3], "tag": "b" } });
    assert_eq!(
      eval(json!({ "map": [{ "var": "context.items" }, { "*": [{ "var": "" }, 2] }] }), scope.clone()),
      json!([2, 4, 6])
    );
    assert_eq!(
      eval(json!({ "in": [{ "var": "context.tag" }, ["a", "b"]] }), scope.clone()),
      json!(true)
    );
    assert_eq!(eval(json!({ "length": [{ "var": "context.items" }] }), scope), json!(3));
  }

  #[test]
  fn unknown_operator_fails_at_parse() {
    assert!(matches!(
      Expr::parse(&json!({ "frobnicate": [1] })),
      Err(ExprError::UnknownOperator(_))
    ));
  }

  #[test]
  fn multi_key_objects_are_literals() {
    let expr = Expr::parse(&json!({ "a": 1, "b": 2 })).unwrap();
    assert_eq!(expr, Expr::Literal(json!({ "a": 1, "b": 2 })));
  }

  #[test]
  fn evaluation_is_idempotent() {
    let expr = Expr::parse(&json!({ "+": [{ "var": "context.n" }, 1] })).unwrap();
    let scope = json!({ "context": { "n": 41 } });
    assert_eq!(expr.evaluate(&scope).unwrap(), expr.evaluate(&scope).unwrap());
    // The scope is untouched.
    assert_eq!(scope, json!({ "context": { "n": 41 } }));
  }

  #[test]
  fn truthiness() {
    assert!(!is_truthy(&json!(null)));
    assert!(!is_truthy(&json!(false)));
    assert!(!is_truthy(&json!(0)));
    assert!(!is_truthy(&json!("")));
    assert!(!is_truthy(&json!([])));
    assert!(!is_truthy(&json!({})));
    assert!(is_truthy(&json!("x")));
    assert!(is_truthy(&json!(0.5)));
    assert!(is_truthy(&json!([0])));
  }
}
