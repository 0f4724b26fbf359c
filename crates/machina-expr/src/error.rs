use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExprError {
  #[error("unknown operator: {0}")]
  UnknownOperator(String),

  #[error("operator '{op}' expects {expected} argument(s), got {got}")]
  Arity {
    op: &'static str,
    expected: &'static str,
    got: usize,
  },

  #[error("operator '{op}' cannot be applied: {detail}")]
  Type { op: &'static str, detail: String },

  #[error("division by zero")]
  DivisionByZero,

  #[error("'var' path must be a string")]
  BadVarPath,
}
