use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use machina_expr::Expr;

use crate::actor::{Actor, ActorContext};
use crate::error::ActorFailure;

/// HTTP-backed actor.
///
/// Method, url, headers and body are template strings rendered against the
/// `{context, event}` scope at dispatch time, so any context or event field
/// can parameterize a request. Classification of failures:
/// - connect/transport errors and 5xx responses are retryable
/// - 4xx responses are not: the same request will not start succeeding
/// - a response failing `expect_status` or the `error_when` predicate is a
///   logical failure, also not retryable
pub struct HttpActor {
  client: reqwest::Client,
  method: String,
  url: String,
  headers: HashMap<String, String>,
  body: Option<Value>,
  expect_status: Option<u16>,
  error_when: Option<Expr>,
}

impl HttpActor {
  pub fn new(
    method: String,
    url: String,
    headers: HashMap<String, String>,
    body: Option<Value>,
    expect_status: Option<u16>,
    error_when: Option<Expr>,
  ) -> Self {
    Self {
      client: reqwest::Client::new(),
      method,
      url,
      headers,
      body,
      expect_status,
      error_when,
    }
  }
}

#[async_trait]
impl Actor for HttpActor {
  async fn call(&self, ctx: ActorContext) -> Result<Value, ActorFailure> {
    let method_str = render_str(&ctx, &self.method);
    let method = reqwest::Method::from_bytes(method_str.to_uppercase().as_bytes())
      .map_err(|_| ActorFailure::permanent(format!("invalid http method: {method_str}")))?;

    let url = render_str(&ctx, &self.url);
    debug!(%method, %url, "dispatching http request");

    let mut request = self.client.request(method, &url);
    for (name, template) in &self.headers {
      request = request.header(name, render_str(&ctx, template));
    }
    // Explicit body template wins; otherwise the rendered invoke input is
    // the payload.
    let body = match &self.body {
      Some(body) => Some(ctx.renderer.render_value(body, scope_context(&ctx), scope_event(&ctx))),
      None if !ctx.input.is_null() => Some(ctx.input.clone()),
      None => None,
    };
    if let Some(body) = body {
      request = request.json(&body);
    }

    // Dropping the in-flight future on cancellation aborts the underlying
    // request; a late response can never be observed.
    let response = tokio::select! {
      response = request.send() => response,
      _ = ctx.cancel.cancelled() => {
        return Err(ActorFailure::permanent("cancelled"));
      }
    };

    let response = response.map_err(|e| ActorFailure::retryable(format!("request failed: {e}")))?;
    let status = response.status().as_u16();

    let data: Value = match response.json().await {
      Ok(data) => data,
      Err(e) => {
        if status >= 500 {
          return Err(ActorFailure::retryable(format!("bad response body: {e}")).with_status(status));
        }
        Value::Null
      }
    };

    if let Some(expected) = self.expect_status {
      if status != expected {
        let failure = ActorFailure {
          message: format!("expected status {expected}, got {status}"),
          retryable: status >= 500,
          status: Some(status),
        };
        return Err(failure);
      }
    } else if status >= 500 {
      return Err(ActorFailure::retryable(format!("server error {status}")).with_status(status));
    } else if status >= 400 {
      return Err(ActorFailure::permanent(format!("client error {status}")).with_status(status));
    }

    // A 200 can still be a logical failure.
    if let Some(predicate) = &self.error_when {
      let outcome = json!({ "status": status, "data": data });
      if predicate.evaluate_bool(&outcome).unwrap_or(false) {
        return Err(ActorFailure::permanent("response matched error predicate").with_status(status));
      }
    }

    Ok(data)
  }
}

fn render_str(ctx: &ActorContext, template: &str) -> String {
  ctx
    .renderer
    .render(template, scope_context(ctx), scope_event(ctx))
}

fn scope_context(ctx: &ActorContext) -> &Value {
  ctx.scope.get("context").unwrap_or(&Value::Null)
}

fn scope_event(ctx: &ActorContext) -> Option<&Value> {
  ctx.scope.get("event")
}
