use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use machina_template::Renderer;

use crate::error::ActorFailure;

/// Everything an actor sees for one call.
pub struct ActorContext {
  /// The invoke's `input`, template-rendered against the scope.
  pub input: Value,
  /// `{context, event}` at dispatch time, for actors that parameterize
  /// themselves (the HTTP actor renders its url/headers/body against this).
  pub scope: Value,
  pub renderer: Arc<Renderer>,
  /// Cancelled when the owning state is exited. Actors doing real I/O
  /// should abort, not just discard the result.
  pub cancel: CancellationToken,
}

/// An asynchronous unit of work invoked by a state.
#[async_trait]
pub trait Actor: Send + Sync {
  async fn call(&self, ctx: ActorContext) -> Result<Value, ActorFailure>;
}

/// Resolves with a fixed value after a delay. Declarable in flow JSON.
pub struct DelayActor {
  pub delay_ms: u64,
  pub value: Value,
}

#[async_trait]
impl Actor for DelayActor {
  async fn call(&self, ctx: ActorContext) -> Result<Value, ActorFailure> {
    tokio::select! {
      _ = tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)) => {
        Ok(self.value.clone())
      }
      _ = ctx.cancel.cancelled() => {
        Err(ActorFailure::permanent("cancelled"))
      }
    }
  }
}

type FnActorFuture = Pin<Box<dyn Future<Output = Result<Value, ActorFailure>> + Send>>;

/// Wraps an arbitrary async function as an actor. The seam hosts use to
/// register bespoke work, and what the test suites drive.
pub struct FnActor {
  func: Box<dyn Fn(Value) -> FnActorFuture + Send + Sync>,
}

impl FnActor {
  pub fn new<F, Fut>(func: F) -> Self
  where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ActorFailure>> + Send + 'static,
  {
    Self {
      func: Box::new(move |input| Box::pin(func(input))),
    }
  }
}

#[async_trait]
impl Actor for FnActor {
  async fn call(&self, ctx: ActorContext) -> Result<Value, ActorFailure> {
    (self.func)(ctx.input).await
  }
}
