use std::sync::Arc;
use std::time::Duration;

use pricerun_config::{NodeDef, RetryBackoff};
use pricerun_workflow::NodeResult;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::credentials::CredentialResolver;
use crate::error::HandlerError;
use crate::handler::{HandlerRegistry, Invocation};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// How many times to call a handler and how long to wait between calls.
/// `max_attempts` counts total invocations, so `3` means one call plus
/// up to two retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub backoff: RetryBackoff,
  pub initial_delay: Duration,
}

impl RetryPolicy {
  pub fn none() -> Self {
    Self {
      max_attempts: 1,
      backoff: RetryBackoff::Constant,
      initial_delay: Duration::ZERO,
    }
  }

  pub fn new(max_attempts: u32, backoff: RetryBackoff, initial_delay: Duration) -> Self {
    Self {
      max_attempts: max_attempts.max(1),
      backoff,
      initial_delay,
    }
  }

  /// Delay before the retry that follows failed attempt `attempt`
  /// (1-based), capped at thirty seconds.
  pub fn delay(&self, attempt: u32) -> Duration {
    let delay = match self.backoff {
      RetryBackoff::Constant => self.initial_delay,
      RetryBackoff::Linear => self.initial_delay.saturating_mul(attempt),
      RetryBackoff::Exponential => self
        .initial_delay
        .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1))),
    };
    delay.min(MAX_RETRY_DELAY)
  }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::none()
  }
}

/// Drives one node through its handler with timeout, retries and
/// cancellation applied. Failures never escape as errors; they come back
/// as a failed [`NodeResult`] carrying the error kind and attempt count.
#[derive(Clone)]
pub struct ConnectorInvoker {
  registry: HandlerRegistry,
  credentials: Arc<dyn CredentialResolver>,
}

impl ConnectorInvoker {
  pub fn new(registry: HandlerRegistry, credentials: Arc<dyn CredentialResolver>) -> Self {
    Self {
      registry,
      credentials,
    }
  }

  pub async fn invoke(
    &self,
    node: &NodeDef,
    config: serde_json::Map<String, Value>,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
  ) -> NodeResult {
    let Some(handler) = self.registry.get(node.kind) else {
      return NodeResult::failed(
        "registry",
        format!("no handler registered for node type '{}'", node.kind),
        0,
      );
    };

    let timeout = node
      .timeout_ms
      .map(Duration::from_millis)
      .or_else(|| handler.default_timeout());
    let total = retry.max_attempts.max(1);

    let mut attempt = 0u32;
    loop {
      attempt += 1;
      if cancel.is_cancelled() {
        return NodeResult::failed("cancelled", "run cancelled", attempt - 1);
      }

      let invocation = Invocation {
        node_id: node.node_id.clone(),
        kind: node.kind,
        config: config.clone(),
        credentials: self.credentials.clone(),
      };

      let outcome = tokio::select! {
        _ = cancel.cancelled() => {
          return NodeResult::failed("cancelled", "run cancelled", attempt);
        }
        out = attempt_call(timeout, handler.invoke(invocation)) => out,
      };

      match outcome {
        Ok(output) => {
          debug!(node_id = %node.node_id, attempt, "node handler succeeded");
          return NodeResult::ok(output);
        }
        Err((kind, message)) => {
          warn!(node_id = %node.node_id, attempt, error = %message, "node handler failed");
          if attempt >= total {
            return NodeResult::failed(kind, message, attempt);
          }
          tokio::select! {
            _ = cancel.cancelled() => {
              return NodeResult::failed("cancelled", "run cancelled", attempt);
            }
            _ = tokio::time::sleep(retry.delay(attempt)) => {}
          }
        }
      }
    }
  }
}

async fn attempt_call(
  timeout: Option<Duration>,
  call: impl Future<Output = Result<Value, HandlerError>>,
) -> Result<Value, (&'static str, String)> {
  match timeout {
    Some(limit) => match tokio::time::timeout(limit, call).await {
      Ok(Ok(output)) => Ok(output),
      Ok(Err(e)) => Err((e.kind(), e.to_string())),
      Err(_) => Err((
        "timeout",
        format!("handler exceeded {}ms", limit.as_millis()),
      )),
    },
    None => call.await.map_err(|e| (e.kind(), e.to_string())),
  }
}
