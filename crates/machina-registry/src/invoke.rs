//! The uniform invocation contract for actors: cache, timeout, retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use machina_config::RetryDef;
use machina_template::Renderer;

use crate::actor::{Actor, ActorContext};
use crate::cache::InvokeCache;
use crate::error::{ActorFailure, InvokeError};

/// A fully resolved invoke, produced by the compiler.
#[derive(Clone)]
pub struct InvokePlan {
  pub id: String,
  pub actor_name: String,
  pub actor: Arc<dyn Actor>,
  /// Raw input value; string leaves are rendered at dispatch time.
  pub input: Option<Value>,
  pub timeout_ms: Option<u64>,
  pub retry: RetryDef,
  /// Template for the cache key; rendered once per dispatch.
  pub cache_key: Option<String>,
  pub cache_ttl_ms: Option<u64>,
  /// Projection applied by the runtime on success: context path -> result
  /// path.
  pub result_map: HashMap<String, String>,
}

impl std::fmt::Debug for InvokePlan {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("InvokePlan")
      .field("id", &self.id)
      .field("actor_name", &self.actor_name)
      .field("input", &self.input)
      .field("timeout_ms", &self.timeout_ms)
      .field("retry", &self.retry)
      .field("cache_key", &self.cache_key)
      .field("cache_ttl_ms", &self.cache_ttl_ms)
      .field("result_map", &self.result_map)
      .finish_non_exhaustive()
  }
}

/// Run an invoke to completion.
///
/// 1. An unexpired cache hit for the rendered `cache_key` short-circuits the
///    call. The decision uses the cache as of dispatch time.
/// 2. Each attempt is bounded by `timeout_ms`; a timeout counts as a
///    retryable failure.
/// 3. Retryable failures back off per the retry policy; non-retryable ones
///    fail immediately regardless of remaining budget.
/// 4. Success writes the cache entry when a key and TTL are declared.
#[instrument(
  name = "invoke",
  skip_all,
  fields(invoke_id = %plan.id, actor = %plan.actor_name)
)]
pub async fn run_invoke(
  plan: &InvokePlan,
  scope: &Value,
  renderer: &Arc<Renderer>,
  cache: &InvokeCache,
  cancel: CancellationToken,
) -> Result<Value, InvokeError> {
  let context = scope.get("context").cloned().unwrap_or(Value::Null);
  let event = scope.get("event");

  let cache_key = plan
    .cache_key
    .as_ref()
    .map(|template| renderer.render(template, &context, event));

  if let Some(key) = &cache_key {
    if let Some(hit) = cache.get(key) {
      debug!(cache_key = %key, "invoke served from cache");
      return Ok(hit);
    }
  }

  let input = plan
    .input
    .as_ref()
    .map(|input| renderer.render_value(input, &context, event))
    .unwrap_or(Value::Null);

  // retry.max_attempts counts retries; the first attempt is always made.
  let attempt_budget = plan.retry.max_attempts + 1;
  let mut attempt = 0;

  let failure = loop {
    attempt += 1;
    info!(attempt, "invoke_attempt");

    match attempt_call(plan, &input, scope, renderer, &cancel).await {
      Ok(value) => {
        info!(attempt, "invoke_completed");
        if let (Some(key), Some(ttl)) = (&cache_key, plan.cache_ttl_ms) {
          cache.insert(key.clone(), value.clone(), Duration::from_millis(ttl));
        }
        return Ok(value);
      }
      Err(Attempt::Cancelled) => return Err(InvokeError::Cancelled),
      Err(Attempt::Failed(failure)) => {
        warn!(
          attempt,
          retryable = failure.retryable,
          error = %failure,
          "invoke_attempt_failed"
        );
        if !failure.retryable || attempt >= attempt_budget {
          break failure;
        }
        let delay = Duration::from_millis(plan.retry.delay_ms(attempt));
        tokio::select! {
          _ = tokio::time::sleep(delay) => {}
          _ = cancel.cancelled() => return Err(InvokeError::Cancelled),
        }
      }
    }
  };

  Err(InvokeError::Exhausted {
    actor: plan.actor_name.clone(),
    attempts: attempt,
    message: failure.message,
    status: failure.status,
  })
}

enum Attempt {
  Failed(ActorFailure),
  Cancelled,
}

async fn attempt_call(
  plan: &InvokePlan,
  input: &Value,
  scope: &Value,
  renderer: &Arc<Renderer>,
  cancel: &CancellationToken,
) -> Result<Value, Attempt> {
  let ctx = ActorContext {
    input: input.clone(),
    scope: scope.clone(),
    renderer: renderer.clone(),
    cancel: cancel.clone(),
  };

  let call = plan.actor.call(ctx);
  let outcome = match plan.timeout_ms {
    Some(ms) => {
      tokio::select! {
        outcome = tokio::time::timeout(Duration::from_millis(ms), call) => match outcome {
          Ok(outcome) => outcome,
          Err(_) => Err(ActorFailure::retryable(format!("timed out after {ms}ms"))),
        },
        _ = cancel.cancelled() => return Err(Attempt::Cancelled),
      }
    }
    None => {
      tokio::select! {
        outcome = call => outcome,
        _ = cancel.cancelled() => return Err(Attempt::Cancelled),
      }
    }
  };
  outcome.map_err(Attempt::Failed)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::actor::FnActor;
  use serde_json::json;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn plan_for(actor: Arc<dyn Actor>, retry: RetryDef) -> InvokePlan {
    InvokePlan {
      id: "test".to_string(),
      actor_name: "test".to_string(),
      actor,
      input: None,
      timeout_ms: None,
      retry,
      cache_key: None,
      cache_ttl_ms: None,
      result_map: HashMap::new(),
    }
  }

  fn flaky(fail_times: u32, retryable: bool) -> (Arc<dyn Actor>, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let actor = FnActor::new(move |_input| {
      let n = counter.fetch_add(1, Ordering::SeqCst);
      async move {
        if n < fail_times {
          if retryable {
            Err(ActorFailure::retryable("boom"))
          } else {
            Err(ActorFailure::permanent("bad request").with_status(400))
          }
        } else {
          Ok(json!({ "ok": true }))
        }
      }
    });
    (Arc::new(actor), calls)
  }

  #[tokio::test(start_paused = true)]
  async fn retries_then_succeeds() {
    let (actor, calls) = flaky(2, true);
    let plan = plan_for(
      actor,
      RetryDef {
        max_attempts: 3,
        backoff_ms: 100,
        ..RetryDef::default()
      },
    );
    let result = run_invoke(
      &plan,
      &json!({ "context": {} }),
      &Arc::new(Renderer::new()),
      &InvokeCache::new(),
      CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(result, json!({ "ok": true }));
    // Failed twice, succeeded on the third call.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn non_retryable_fails_after_single_attempt() {
    let (actor, calls) = flaky(10, false);
    let plan = plan_for(
      actor,
      RetryDef {
        max_attempts: 5,
        backoff_ms: 1,
        ..RetryDef::default()
      },
    );
    let err = run_invoke(
      &plan,
      &json!({ "context": {} }),
      &Arc::new(Renderer::new()),
      &InvokeCache::new(),
      CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    match err {
      InvokeError::Exhausted { attempts, status, .. } => {
        assert_eq!(attempts, 1);
        assert_eq!(status, Some(400));
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[tokio::test(start_paused = true)]
  async fn retry_budget_exhausts() {
    let (actor, calls) = flaky(10, true);
    let plan = plan_for(
      actor,
      RetryDef {
        max_attempts: 2,
        backoff_ms: 10,
        ..RetryDef::default()
      },
    );
    let err = run_invoke(
      &plan,
      &json!({ "context": {} }),
      &Arc::new(Renderer::new()),
      &InvokeCache::new(),
      CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(matches!(err, InvokeError::Exhausted { attempts: 3, .. }));
  }

  #[tokio::test]
  async fn cache_hit_skips_the_call() {
    let (actor, calls) = flaky(0, true);
    let mut plan = plan_for(actor, RetryDef::default());
    plan.cache_key = Some("user-{{ context.id }}".to_string());
    plan.cache_ttl_ms = Some(60_000);

    let scope = json!({ "context": { "id": 7 } });
    let renderer = Arc::new(Renderer::new());
    let cache = InvokeCache::new();

    let first = run_invoke(&plan, &scope, &renderer, &cache, CancellationToken::new())
      .await
      .unwrap();
    let second = run_invoke(&plan, &scope, &renderer, &cache, CancellationToken::new())
      .await
      .unwrap();

    assert_eq!(first, second);
    // One underlying call, one cache write, two identical results.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn timeout_is_retryable() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let actor = Arc::new(FnActor::new(move |_input| {
      let n = counter.fetch_add(1, Ordering::SeqCst);
      async move {
        if n == 0 {
          tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(json!("fast"))
      }
    }));
    let mut plan = plan_for(
      actor,
      RetryDef {
        max_attempts: 1,
        backoff_ms: 10,
        ..RetryDef::default()
      },
    );
    plan.timeout_ms = Some(50);

    let result = run_invoke(
      &plan,
      &json!({ "context": {} }),
      &Arc::new(Renderer::new()),
      &InvokeCache::new(),
      CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(result, json!("fast"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn cancellation_interrupts_the_call() {
    let actor = Arc::new(FnActor::new(|_input| async {
      tokio::time::sleep(Duration::from_secs(3600)).await;
      Ok(Value::Null)
    }));
    let plan = plan_for(actor, RetryDef::default());
    let cancel = CancellationToken::new();
    let handle = {
      let plan = plan.clone();
      let cancel = cancel.clone();
      tokio::spawn(async move {
        run_invoke(
          &plan,
          &json!({ "context": {} }),
          &Arc::new(Renderer::new()),
          &InvokeCache::new(),
          cancel,
        )
        .await
      })
    };
    cancel.cancel();
    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, InvokeError::Cancelled));
  }
}
