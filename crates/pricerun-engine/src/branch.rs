//! Branch coordination for `parallel` nodes.
//!
//! Each enabled branch runs as its own scope over the members the branch
//! plan assigned to it. The strategy decides when the parallel node
//! itself completes; the failure policy decides what a branch failure
//! does to the rest of the run. Convergence nodes are not members of any
//! branch and get scheduled by the surrounding scope once every feeding
//! branch is settled.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use pricerun_config::{BranchStrategy, FailurePolicy, NodeDef, ParallelConfig};
use pricerun_connector::RetryPolicy;
use pricerun_workflow::{BranchSpec, NodeResult};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::{RunCtx, ScopeOutcome, ScopeParams};
use crate::error::EngineError;
use crate::events::{ExecutionEvent, ExecutionNotifier};

pub(crate) async fn run_parallel<N: ExecutionNotifier + 'static>(
  ctx: RunCtx<N>,
  node: NodeDef,
  scope_retry: RetryPolicy,
  cancel: CancellationToken,
) -> Result<NodeResult, EngineError> {
  let config: ParallelConfig =
    serde_json::from_value(serde_json::Value::Object(node.config.clone())).map_err(|e| {
      EngineError::ControlConfig {
        node_id: node.node_id.clone(),
        message: e.to_string(),
      }
    })?;
  let plan = ctx
    .workflow
    .branch_plan(&node.node_id)
    .cloned()
    .ok_or_else(|| EngineError::MissingBranchPlan {
      node_id: node.node_id.clone(),
    })?;

  let retry = match config.on_failure {
    FailurePolicy::Retry => RetryPolicy::new(
      config.max_retries,
      scope_retry.backoff,
      scope_retry.initial_delay,
    ),
    _ => scope_retry,
  };
  // `retry` spends its budget inside the invoker; once exhausted the
  // branch is marked failed and the others proceed, like `continue`.
  let absorb = matches!(
    config.on_failure,
    FailurePolicy::Continue | FailurePolicy::Retry
  );

  let mut statuses: Vec<(String, &'static str)> = Vec::new();
  let mut enabled: Vec<BranchSpec> = Vec::new();
  for spec in plan.branches {
    if spec.enabled {
      enabled.push(spec);
    } else {
      for member in &spec.members {
        ctx.skip_node(member, false).await;
      }
      statuses.push((spec.name, "skipped"));
    }
  }
  // Priority orders the launches; all enabled branches still run
  // concurrently.
  enabled.sort_by_key(|b| b.priority);

  info!(
    run_id = %ctx.run_id,
    node_id = %node.node_id,
    branches = enabled.len(),
    strategy = strategy_name(config.strategy),
    "launching branches"
  );

  if config.strategy == BranchStrategy::WaitNone {
    for spec in enabled {
      statuses.push((spec.name.clone(), "detached"));
      let handle = spawn_detached(&ctx, &node.node_id, spec, retry, cancel.child_token());
      ctx.detached.lock().await.push(handle);
    }
    return Ok(branch_result(config.strategy, statuses, None));
  }

  let shared = cancel.child_token();
  let mut launched: Vec<BranchSpec> = Vec::new();
  let mut waves = FuturesUnordered::new();
  for (i, spec) in enabled.into_iter().enumerate() {
    let params = ScopeParams {
      scope: Arc::new(spec.members.iter().cloned().collect::<HashSet<_>>()),
      retry,
      absorb_failures: absorb,
      anchor: Some(node.node_id.clone()),
    };
    let handle = tokio::spawn(ctx.clone().run_scope(params, shared.child_token()));
    waves.push(async move { (i, handle.await) });
    launched.push(spec);
  }

  let mut results: Vec<Option<&'static str>> = vec![None; launched.len()];
  let mut first_settled: Option<bool> = None;
  let mut first_failure: Option<(String, String)> = None;

  while let Some((i, joined)) = waves.next().await {
    let outcome = joined.map_err(|e| EngineError::Join(e.to_string()))?;
    match outcome {
      Ok(ScopeOutcome::Completed) => results[i] = Some("completed"),
      Ok(ScopeOutcome::Stopped) => {
        settle(&ctx, &launched[i].members).await;
        results[i] = Some("stopped");
      }
      Ok(ScopeOutcome::Failed { node_id }) => {
        // Absorbing policy: record the failure, settle the branch's
        // remains, let the other branches keep going.
        warn!(
          run_id = %ctx.run_id,
          node_id = %node.node_id,
          branch = %launched[i].name,
          failed_node = %node_id,
          "branch failed; run continues"
        );
        settle(&ctx, &launched[i].members).await;
        results[i] = Some("failed");
      }
      Err(EngineError::Cancelled) => {
        settle(&ctx, &launched[i].members).await;
        results[i] = Some("cancelled");
      }
      Err(EngineError::NodeFailed { node_id, message }) => {
        // stop_all: take the rest down.
        settle(&ctx, &launched[i].members).await;
        results[i] = Some("failed");
        first_failure.get_or_insert((
          launched[i].name.clone(),
          format!("node '{node_id}' failed: {message}"),
        ));
        shared.cancel();
      }
      Err(e) => {
        shared.cancel();
        return Err(e);
      }
    }

    if first_settled.is_none() {
      first_settled = Some(matches!(results[i], Some("completed") | Some("stopped")));
    }
    if config.strategy == BranchStrategy::WaitAny {
      // First settled branch wins; the rest drain through the
      // cancellation arm above, keeping any results they already wrote.
      shared.cancel();
    }
  }

  for (spec, result) in launched.iter().zip(results) {
    statuses.push((spec.name.clone(), result.unwrap_or("cancelled")));
  }

  if let Some((branch, message)) = first_failure {
    let message = format!("branch '{branch}': {message}");
    let mut result = NodeResult::failed("branch", &message, 0);
    result.output = branch_output(config.strategy, &statuses);
    ctx.complete_node(&node.node_id, result).await;
    return Err(EngineError::NodeFailed {
      node_id: node.node_id.clone(),
      message,
    });
  }
  Ok(branch_result(config.strategy, statuses, first_settled))
}

/// Launch one `wait_none` branch. The surrounding flow does not wait for
/// it; a failure emits an event but cannot fail the run.
fn spawn_detached<N: ExecutionNotifier + 'static>(
  ctx: &RunCtx<N>,
  parallel_id: &str,
  spec: BranchSpec,
  retry: RetryPolicy,
  token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
  let ctx = ctx.clone();
  let parallel_id = parallel_id.to_string();
  tokio::spawn(async move {
    let params = ScopeParams {
      scope: Arc::new(spec.members.iter().cloned().collect::<HashSet<_>>()),
      retry,
      absorb_failures: true,
      anchor: Some(parallel_id.clone()),
    };
    match ctx.clone().run_scope(params, token).await {
      Ok(ScopeOutcome::Failed { node_id }) => {
        warn!(
          run_id = %ctx.run_id,
          node_id = %parallel_id,
          branch = %spec.name,
          failed_node = %node_id,
          "detached branch failed"
        );
        settle(&ctx, &spec.members).await;
        ctx.notifier.notify(ExecutionEvent::DetachedBranchFailed {
          run_id: ctx.run_id.clone(),
          node_id: parallel_id,
          branch: spec.name,
        });
      }
      Ok(_) => {}
      Err(_) => settle(&ctx, &spec.members).await,
    }
  })
}

/// Mark a finished branch's never-started members skipped so downstream
/// convergence nodes see every predecessor as terminal.
async fn settle<N: ExecutionNotifier + 'static>(ctx: &RunCtx<N>, members: &[String]) {
  for member in members {
    ctx.skip_if_pending(member).await;
  }
}

fn branch_output(strategy: BranchStrategy, statuses: &[(String, &'static str)]) -> serde_json::Value {
  let mut branches = serde_json::Map::new();
  for (name, status) in statuses {
    branches.insert(name.clone(), json!(status));
  }
  json!({
    "strategy": strategy_name(strategy),
    "branches": branches,
  })
}

/// The coordinator's own result: `wait_all` succeeds iff every branch
/// ran clean, `wait_any` iff the first settled branch did, `wait_none`
/// always at launch. An unsuccessful result under an absorbing policy
/// does not fail the run on its own.
fn branch_result(
  strategy: BranchStrategy,
  statuses: Vec<(String, &'static str)>,
  first_settled: Option<bool>,
) -> NodeResult {
  let output = branch_output(strategy, &statuses);
  let success = match strategy {
    BranchStrategy::WaitNone => true,
    BranchStrategy::WaitAll => statuses
      .iter()
      .all(|(_, s)| matches!(*s, "completed" | "stopped" | "skipped")),
    BranchStrategy::WaitAny => first_settled.unwrap_or(true),
  };
  if success {
    return NodeResult::ok(output);
  }

  let failed: Vec<&str> = statuses
    .iter()
    .filter(|(_, s)| *s == "failed")
    .map(|(name, _)| name.as_str())
    .collect();
  let mut result = NodeResult::failed(
    "branch",
    format!("branches failed: {}", failed.join(", ")),
    0,
  );
  result.output = output;
  result
}

fn strategy_name(strategy: BranchStrategy) -> &'static str {
  match strategy {
    BranchStrategy::WaitAll => "wait_all",
    BranchStrategy::WaitAny => "wait_any",
    BranchStrategy::WaitNone => "wait_none",
  }
}
