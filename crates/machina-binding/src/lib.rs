//! Machina Binding
//!
//! Declarative input/output mappings between the flow context and external
//! stores: URL query parameters and local/session key-value storage.
//!
//! Input bindings run on state entry (pull external data into context),
//! output bindings on state exit (push context fields out). Store references
//! are prefix-tagged strings (`context.`, `url.query.`, `localStorage.`,
//! `sessionStorage.`) validated when the flow compiles: an unknown prefix
//! never survives to runtime.

mod binding;
mod store;

pub use binding::{apply_inputs, apply_outputs, BindingError, CompiledBinding, StoreRef};
pub use store::{HostStores, KeyValueStore, MemoryStore};
