//! Machina Graph
//!
//! The state-graph compiler: walks a [`machina_config::FlowDef`] (possibly
//! nested compound states), flattens it into path-qualified atomic states,
//! and resolves every string reference: transition targets, guard names and
//! shorthands, action/actor/transform names, binding prefixes: against the
//! flow's own declarations and the supplied registry.
//!
//! Key differences from the raw configuration:
//! - the state tree is flat; compound states survive only as qualified id
//!   segments and inherited transitions
//! - every expression is parsed, every reference bound: nothing is looked
//!   up by string at runtime
//! - compilation collects **all** errors instead of failing on the first,
//!   so authors fix many issues per cycle; non-fatal findings are warnings
//!
//! The result, [`CompiledFlow`], is immutable and ready to be executed by
//! any number of runtime instances.

mod compiled;
mod compiler;
mod error;
mod shorthand;

pub use compiled::{
  CompiledAfter, CompiledFlow, CompiledInvoke, CompiledState, CompiledTransition,
};
pub use compiler::{compile, validate};
pub use error::{CompileError, ValidationReport};
