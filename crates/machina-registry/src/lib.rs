//! Machina Registry
//!
//! The catalog of callable units a flow may reference by name:
//!
//! - **Actions**: synchronous context mutations (`context -> context'`).
//!   The declarative built-ins ([`machina_config::ActionDef`]) compile into
//!   [`CompiledAction`]s with pre-parsed expressions; hosts can register
//!   custom actions as closures.
//! - **Actors**: asynchronous units of work (HTTP calls, timers, arbitrary
//!   async functions) behind the [`Actor`] trait, invoked through
//!   [`run_invoke`] which layers timeout, retry with backoff, and TTL
//!   caching on top of the raw call.
//! - **Transforms**: small value -> value functions applied by the
//!   data-binding engine.
//! - **Guards**: host-registered named expressions, alongside the ones the
//!   flow declares inline.
//!
//! A [`Registry`] is an explicit value constructed once and passed by
//! reference into the compiler; there is no process-wide registry, so
//! multiple instances with different registries coexist in one process.

mod action;
mod actor;
mod cache;
mod error;
mod http;
mod invoke;
mod registry;

pub use action::{run_action, CompiledAction, CompiledRule};
pub use actor::{Actor, ActorContext, DelayActor, FnActor};
pub use cache::{CacheEntry, InvokeCache};
pub use error::{ActionError, ActorFailure, InvokeError};
pub use http::HttpActor;
pub use invoke::{run_invoke, InvokePlan};
pub use registry::{IdGenerator, Registry, Transform};
