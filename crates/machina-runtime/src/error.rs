use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
  /// `send()` after the flow reached a final state. Reported rather than
  /// swallowed: it indicates host misuse.
  #[error("flow has terminated; no further events are accepted")]
  FlowTerminated,

  /// The instance was stopped or its driver is gone.
  #[error("flow instance is no longer running")]
  InstanceClosed,
}
