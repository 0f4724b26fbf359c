use thiserror::Error;

/// A single actor call attempt failed.
///
/// `retryable` drives the retry loop: network failures, 5xx responses and
/// timeouts retry; 4xx-class and logical failures do not. The distinction is
/// load-bearing: a client error will not succeed on a second attempt.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ActorFailure {
  pub message: String,
  pub retryable: bool,
  pub status: Option<u16>,
}

impl ActorFailure {
  pub fn retryable(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      retryable: true,
      status: None,
    }
  }

  pub fn permanent(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      retryable: false,
      status: None,
    }
  }

  pub fn with_status(mut self, status: u16) -> Self {
    self.status = Some(status);
    self
  }
}

/// An invoke failed after the retry budget was spent (or was not retryable).
#[derive(Debug, Error)]
pub enum InvokeError {
  #[error("actor '{actor}' failed after {attempts} attempt(s): {message}")]
  Exhausted {
    actor: String,
    attempts: u32,
    message: String,
    status: Option<u16>,
  },

  #[error("invoke cancelled")]
  Cancelled,
}

impl InvokeError {
  /// The error as a JSON object: the payload of the `on_error` event.
  pub fn to_value(&self) -> serde_json::Value {
    match self {
      InvokeError::Exhausted {
        actor,
        attempts,
        message,
        status,
      } => serde_json::json!({
        "actor": actor,
        "attempts": attempts,
        "message": message,
        "status": status,
      }),
      InvokeError::Cancelled => serde_json::json!({ "message": "cancelled" }),
    }
  }
}

/// An action could not run.
#[derive(Debug, Error)]
pub enum ActionError {
  #[error("action references unknown name: {0}")]
  Unknown(String),

  #[error(transparent)]
  Expr(#[from] machina_expr::ExprError),

  #[error("custom action '{name}' failed: {message}")]
  Custom { name: String, message: String },
}
