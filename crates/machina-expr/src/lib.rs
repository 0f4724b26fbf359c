//! Machina Expr
//!
//! JSON-Logic style expression evaluation for guards and computed values.
//!
//! Operator trees are parsed ONCE into a typed [`Expr`] AST: unknown
//! operators and malformed arity fail at parse time, never mid-flow. The AST
//! is then evaluated per use against a scope value (conventionally
//! `{"context": ..., "event": ...}`). Evaluation is pure: the scope is never
//! mutated and the same tree against the same scope always yields the same
//! result.
//!
//! `var` lookups on missing paths yield `null` (with an optional default),
//! so data-shape drift degrades instead of crashing. Genuinely undecidable
//! evaluations (type mismatches, division by zero) return an [`ExprError`]
//! that callers are expected to recover from.

mod error;
mod expr;
pub mod path;

pub use error::ExprError;
pub use expr::{is_truthy, Expr};
