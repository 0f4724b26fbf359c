//! Machina Runtime
//!
//! The execution engine for compiled flows. A [`FlowInstance`] drives one
//! flow execution: it holds the current state and context, accepts events,
//! resolves guarded transitions, runs entry/exit hooks and invokes, applies
//! data bindings, and publishes snapshots to the host.
//!
//! # Architecture
//!
//! ```text
//! FlowInstance::spawn(compiled, registry, stores) -> FlowHandle
//!
//! FlowHandle
//! ├── send(event)    - enqueue an external event
//! ├── snapshot()     - current {state_id, context}
//! ├── subscribe()    - snapshot stream (drop the receiver to unsubscribe)
//! ├── wait_idle()    - resolves once queued messages are processed
//! └── stop()         - tear the instance down
//! ```
//!
//! # Concurrency model
//!
//! One logical thread of control per instance: a driver task processes one
//! message to completion (including all synchronous entry/exit actions)
//! before the next: no reentrancy. Actor invocations run concurrently with
//! the loop, but their completions are delivered back into the same
//! serialized queue, so result application never races another event.
//! Timers and invokes are scoped to a per-entry cancellation token plus an
//! entry generation counter; exiting the state cancels them and stale
//! completions are discarded, never applied.

mod error;
mod instance;
mod observer;
mod snapshot;

pub use error::RuntimeError;
pub use instance::{FlowHandle, FlowInstance};
pub use observer::{ChannelObserver, FlowEvent, FlowObserver, NoopObserver};
pub use snapshot::Snapshot;
