//! Lifecycle events and observers.
//!
//! Events are emitted as an instance executes so consumers can observe
//! progress, persist state, stream to UIs, etc.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted during flow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FlowEvent {
  /// The instance entered its initial state.
  FlowStarted {
    instance_id: String,
    flow_id: String,
  },

  /// A state was entered (including the initial one).
  StateEntered {
    instance_id: String,
    state_id: String,
  },

  /// An event arrived with no matching transition and was ignored.
  EventIgnored {
    instance_id: String,
    state_id: String,
    event: String,
  },

  /// An invoke was dispatched.
  InvokeStarted {
    instance_id: String,
    state_id: String,
    invoke_id: String,
  },

  /// An invoke completed successfully.
  InvokeCompleted {
    instance_id: String,
    state_id: String,
    invoke_id: String,
  },

  /// An invoke failed after its retry budget.
  InvokeFailed {
    instance_id: String,
    state_id: String,
    invoke_id: String,
    error: String,
  },

  /// A final state was reached; the instance accepts no further events.
  FlowTerminated {
    instance_id: String,
    state_id: String,
  },
}

/// Trait for receiving flow lifecycle events.
///
/// The runtime calls `notify` for each event: implementations decide what
/// to do with them (persist, broadcast, log, ignore).
pub trait FlowObserver: Send + Sync {
  fn notify(&self, event: FlowEvent);
}

/// Discards all events. The default when observation is not needed.
#[derive(Debug, Clone, Default)]
pub struct NoopObserver;

impl FlowObserver for NoopObserver {
  fn notify(&self, _event: FlowEvent) {
    // Intentionally empty
  }
}

/// Sends events to an unbounded channel for async consumption.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
  sender: mpsc::UnboundedSender<FlowEvent>,
}

impl ChannelObserver {
  pub fn new(sender: mpsc::UnboundedSender<FlowEvent>) -> Self {
    Self { sender }
  }
}

impl FlowObserver for ChannelObserver {
  fn notify(&self, event: FlowEvent) {
    // Ignore send errors - receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
