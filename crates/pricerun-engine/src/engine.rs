//! Wave-based workflow execution.
//!
//! The engine repeatedly collects every node whose predecessors are all
//! terminal and at least one of them is live, runs the whole wave
//! concurrently, and records results. `condition` nodes evaluate inline
//! in the wave; `parallel` nodes hand their interior to the branch
//! coordinator; everything else goes through the connector invoker.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use pricerun_config::{ConditionAction, ConditionConfig, NodeDef, NodeKind, RetryBackoff};
use pricerun_connector::{ConnectorInvoker, RetryPolicy};
use pricerun_resolver::VariableResolver;
use pricerun_workflow::{ExecutionContext, NodeResult, Workflow};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::branch::run_parallel;
use crate::condition;
use crate::error::EngineError;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::state::{NodeState, RunReport, RunStatus};

/// The workflow execution engine.
///
/// Generic over the notifier so callers choose their observation
/// strategy; `ExecutionEngine::new` wires in the no-op one.
pub struct ExecutionEngine<N: ExecutionNotifier = NoopNotifier> {
  invoker: ConnectorInvoker,
  notifier: Arc<N>,
}

impl ExecutionEngine<NoopNotifier> {
  pub fn new(invoker: ConnectorInvoker) -> Self {
    Self::with_notifier(invoker, NoopNotifier)
  }
}

impl<N: ExecutionNotifier + 'static> ExecutionEngine<N> {
  pub fn with_notifier(invoker: ConnectorInvoker, notifier: N) -> Self {
    Self {
      invoker,
      notifier: Arc::new(notifier),
    }
  }

  /// Run a workflow to a terminal state. The returned report carries the
  /// final status; `Err` is reserved for structural problems (invalid
  /// control configs, join failures), not for node or run failures.
  pub async fn execute(
    &self,
    workflow: Arc<Workflow>,
    payload: serde_json::Value,
    cancel: CancellationToken,
  ) -> Result<RunReport, EngineError> {
    let run_id = uuid::Uuid::new_v4().to_string();

    info!(run_id = %run_id, workflow_id = %workflow.workflow_id, "starting run");
    self.notifier.notify(ExecutionEvent::ExecutionStarted {
      run_id: run_id.clone(),
      workflow_id: workflow.workflow_id.clone(),
    });

    // The trigger completes immediately with the payload as its output.
    let trigger_id = workflow.trigger_id().to_string();
    let trigger_result = NodeResult::ok(payload);
    let mut node_states: HashMap<String, NodeState> = workflow
      .nodes()
      .iter()
      .map(|n| (n.node_id.clone(), NodeState::Pending))
      .collect();
    node_states.insert(trigger_id.clone(), NodeState::Succeeded);
    let mut context = ExecutionContext::new();
    context.insert(&trigger_id, trigger_result.clone());

    let ctx = RunCtx {
      workflow: workflow.clone(),
      invoker: self.invoker.clone(),
      notifier: self.notifier.clone(),
      run_id: run_id.clone(),
      state: Arc::new(Mutex::new(RunState {
        context,
        node_states,
        pass_through: HashSet::new(),
      })),
      detached: Arc::new(Mutex::new(Vec::new())),
    };
    ctx.notifier.notify(ExecutionEvent::NodeCompleted {
      run_id: run_id.clone(),
      node_id: trigger_id,
      result: trigger_result,
    });

    let child = cancel.child_token();
    let outcome = tokio::select! {
      res = drive(&ctx, child.clone()) => res,
      _ = cancel.cancelled() => {
        child.cancel();
        Err(EngineError::Cancelled)
      }
      _ = run_deadline(workflow.timeout_ms) => {
        child.cancel();
        Err(EngineError::Timeout {
          timeout_ms: workflow.timeout_ms.unwrap_or_default(),
        })
      }
    };

    let status = match outcome {
      Ok(()) => {
        info!(run_id = %run_id, "run completed");
        self.notifier.notify(ExecutionEvent::ExecutionCompleted {
          run_id: run_id.clone(),
        });
        RunStatus::Completed
      }
      Err(e) => {
        warn!(run_id = %run_id, error = %e, "run did not complete");
        self.notifier.notify(ExecutionEvent::ExecutionFailed {
          run_id: run_id.clone(),
          error: e.to_string(),
        });
        match e {
          EngineError::Cancelled => RunStatus::Cancelled,
          EngineError::Timeout { .. } | EngineError::NodeFailed { .. } => RunStatus::Failed,
          structural => return Err(structural),
        }
      }
    };

    let state = ctx.state.lock().await;
    Ok(RunReport {
      run_id,
      status,
      context: state.context.clone(),
      node_states: state.node_states.clone(),
    })
  }
}

/// Sleeps for the run timeout, or forever when there is none.
async fn run_deadline(timeout_ms: Option<u64>) {
  match timeout_ms {
    Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
    None => std::future::pending().await,
  }
}

/// Run the top-level scope, then keep re-entering it as detached
/// branches finish and unlock convergence nodes.
async fn drive<N: ExecutionNotifier + 'static>(
  ctx: &RunCtx<N>,
  cancel: CancellationToken,
) -> Result<(), EngineError> {
  // Branch interiors are scheduled by their coordinator, never here.
  let mut interior: HashSet<String> = HashSet::new();
  for node in ctx.workflow.nodes() {
    if node.kind == NodeKind::Parallel {
      if let Some(plan) = ctx.workflow.branch_plan(&node.node_id) {
        interior.extend(plan.interior.iter().cloned());
      }
    }
  }
  let scope: Arc<HashSet<String>> = Arc::new(
    ctx
      .workflow
      .graph()
      .node_ids()
      .iter()
      .filter(|id| !interior.contains(*id))
      .cloned()
      .collect(),
  );
  let retry = default_retry(&ctx.workflow);

  loop {
    let params = ScopeParams {
      scope: scope.clone(),
      retry,
      absorb_failures: false,
      anchor: None,
    };
    let outcome = ctx.clone().run_scope(params, cancel.clone()).await?;

    let handles: Vec<JoinHandle<()>> = {
      let mut detached = ctx.detached.lock().await;
      detached.drain(..).collect()
    };
    let had_detached = !handles.is_empty();
    if had_detached {
      debug!(run_id = %ctx.run_id, count = handles.len(), "waiting on detached branches");
    }
    for handle in handles {
      handle.await.map_err(|e| EngineError::Join(e.to_string()))?;
    }

    match outcome {
      ScopeOutcome::Stopped => {
        // The run completes here; everything not yet started is skipped.
        for node in ctx.workflow.nodes() {
          ctx.skip_if_pending(&node.node_id).await;
        }
        return Ok(());
      }
      _ if !had_detached => return Ok(()),
      _ => {}
    }
  }
}

fn default_retry(workflow: &Workflow) -> RetryPolicy {
  match workflow.max_retry_attempts {
    Some(attempts) => RetryPolicy::new(
      attempts,
      workflow.retry_backoff.unwrap_or(RetryBackoff::Constant),
      Duration::from_millis(workflow.retry_initial_delay_ms.unwrap_or(1000)),
    ),
    None => RetryPolicy::none(),
  }
}

/// Everything a wave or branch needs, cheap to clone into tasks.
pub(crate) struct RunCtx<N: ExecutionNotifier> {
  pub workflow: Arc<Workflow>,
  pub invoker: ConnectorInvoker,
  pub notifier: Arc<N>,
  pub run_id: String,
  pub state: Arc<Mutex<RunState>>,
  pub detached: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl<N: ExecutionNotifier> Clone for RunCtx<N> {
  fn clone(&self) -> Self {
    Self {
      workflow: self.workflow.clone(),
      invoker: self.invoker.clone(),
      notifier: self.notifier.clone(),
      run_id: self.run_id.clone(),
      state: self.state.clone(),
      detached: self.detached.clone(),
    }
  }
}

pub(crate) struct RunState {
  pub context: ExecutionContext,
  pub node_states: HashMap<String, NodeState>,
  /// Skipped nodes whose downstream still runs (`skip_next` targets).
  pub pass_through: HashSet<String>,
}

/// One scheduling scope: the top level, or one branch of a parallel node.
pub(crate) struct ScopeParams {
  pub scope: Arc<HashSet<String>>,
  pub retry: RetryPolicy,
  /// When true a node failure ends the scope with `ScopeOutcome::Failed`
  /// instead of propagating as an error.
  pub absorb_failures: bool,
  /// Predecessor treated as satisfied: the parallel node a branch head
  /// hangs off, still `Running` while its branches execute.
  pub anchor: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ScopeOutcome {
  Completed,
  /// A condition's `stop` action ended scheduling in this scope.
  Stopped,
  Failed { node_id: String },
}

impl<N: ExecutionNotifier + 'static> RunCtx<N> {
  /// Drive one scope to quiescence. Boxed so branch coordinators can
  /// recurse through it.
  pub(crate) fn run_scope(
    self,
    params: ScopeParams,
    cancel: CancellationToken,
  ) -> BoxFuture<'static, Result<ScopeOutcome, EngineError>> {
    Box::pin(async move {
      loop {
        if cancel.is_cancelled() {
          return Err(EngineError::Cancelled);
        }

        let (ready, dead) = self.find_ready(&params).await;

        // Nodes with only dead predecessors cascade into skips, which
        // may in turn unlock or kill further nodes.
        if !dead.is_empty() {
          for node_id in dead {
            self.skip_node(&node_id, false).await;
          }
          continue;
        }
        if ready.is_empty() {
          return Ok(ScopeOutcome::Completed);
        }

        let mut conditions: Vec<NodeDef> = Vec::new();
        let mut handles: Vec<JoinHandle<Result<(String, NodeResult), EngineError>>> = Vec::new();

        for node_id in &ready {
          let Some(node) = self.workflow.node(node_id) else {
            continue;
          };
          let node = node.clone();
          self.start_node(node_id).await;

          match node.kind {
            NodeKind::Condition => conditions.push(node),
            NodeKind::Parallel => {
              let ctx = self.clone();
              let retry = params.retry;
              let cancel = cancel.clone();
              handles.push(tokio::spawn(async move {
                let node_id = node.node_id.clone();
                run_parallel(ctx, node, retry, cancel)
                  .await
                  .map(|result| (node_id, result))
              }));
            }
            _ => {
              let ctx = self.clone();
              let retry = effective_retry(&node, params.retry);
              let cancel = cancel.clone();
              handles.push(tokio::spawn(async move {
                let result = ctx.invoke_connector(&node, &retry, &cancel).await;
                Ok((node.node_id, result))
              }));
            }
          }
        }

        let mut stopped = false;
        let mut failure: Option<(String, String)> = None;

        for node in &conditions {
          match self.run_condition(node).await? {
            ConditionFlow::Continue => {}
            ConditionFlow::Stop => stopped = true,
            ConditionFlow::SkipNext => {
              if let [target] = self.workflow.graph().successors(&node.node_id) {
                let target = target.clone();
                self.skip_node(&target, true).await;
              }
            }
            ConditionFlow::Failed { message } => {
              failure.get_or_insert((node.node_id.clone(), message));
            }
          }
        }

        // Invoked tasks honor the cancellation token themselves, so the
        // wave always joins fully before the scope returns.
        for handle in futures::future::join_all(handles).await {
          let (node_id, result) = handle.map_err(|e| EngineError::Join(e.to_string()))??;
          let kind = result.error.as_ref().map(|e| e.kind.as_str());
          if kind == Some("cancelled") {
            // The invocation was asked to stop; its result is discarded.
            self.cancel_node(&node_id).await;
            continue;
          }
          // A `branch` failure here is a coordinator marked unsuccessful
          // under an absorbing policy; the run carries on around it.
          if !result.success && kind != Some("branch") && failure.is_none() {
            let message = result
              .error
              .as_ref()
              .map(|e| e.message.clone())
              .unwrap_or_default();
            failure = Some((node_id.clone(), message));
          }
          self.complete_node(&node_id, result).await;
        }

        if let Some((node_id, message)) = failure {
          if params.absorb_failures {
            return Ok(ScopeOutcome::Failed { node_id });
          }
          return Err(EngineError::NodeFailed { node_id, message });
        }
        if stopped {
          return Ok(ScopeOutcome::Stopped);
        }
      }
    })
  }

  /// Partition pending in-scope nodes into runnable and dead. Runnable
  /// means every predecessor is terminal and at least one is live; dead
  /// means every predecessor is terminal and none is.
  async fn find_ready(&self, params: &ScopeParams) -> (Vec<String>, Vec<String>) {
    let state = self.state.lock().await;
    let graph = self.workflow.graph();
    let mut ready = Vec::new();
    let mut dead = Vec::new();

    for node in self.workflow.nodes() {
      let node_id = &node.node_id;
      if !params.scope.contains(node_id)
        || state.node_states.get(node_id) != Some(&NodeState::Pending)
      {
        continue;
      }

      let mut all_terminal = true;
      let mut any_live = false;
      for pred in graph.predecessors(node_id) {
        if params.anchor.as_deref() == Some(pred.as_str()) {
          any_live = true;
          continue;
        }
        match state.node_states.get(pred) {
          Some(s) if s.is_terminal() => {
            let live = match s {
              NodeState::Succeeded | NodeState::Failed => true,
              NodeState::Skipped => state.pass_through.contains(pred),
              _ => false,
            };
            any_live = any_live || live;
          }
          _ => {
            all_terminal = false;
            break;
          }
        }
      }

      if !all_terminal {
        continue;
      }
      if any_live {
        ready.push(node_id.clone());
      } else {
        dead.push(node_id.clone());
      }
    }

    (ready, dead)
  }

  /// Resolve the node's config and push it through the invoker. Failures
  /// come back as a failed result, never as an error.
  async fn invoke_connector(
    &self,
    node: &NodeDef,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
  ) -> NodeResult {
    let resolved = {
      let state = self.state.lock().await;
      let preds = self.workflow.graph().predecessors(&node.node_id).to_vec();
      let resolver = VariableResolver::new(
        &node.node_id,
        &preds,
        self.workflow.trigger_id(),
        &state.context,
      );
      resolver.resolve_config(&node.config)
    };

    match resolved {
      Ok((config, warnings)) => self
        .invoker
        .invoke(node, config, retry, cancel)
        .await
        .with_warnings(warnings),
      Err(e) => NodeResult::failed("resolve", e.to_string(), 0),
    }
  }

  async fn run_condition(&self, node: &NodeDef) -> Result<ConditionFlow, EngineError> {
    let config: ConditionConfig =
      serde_json::from_value(serde_json::Value::Object(node.config.clone())).map_err(|e| {
        EngineError::ControlConfig {
          node_id: node.node_id.clone(),
          message: e.to_string(),
        }
      })?;

    let evaluated = {
      let state = self.state.lock().await;
      let preds = self.workflow.graph().predecessors(&node.node_id).to_vec();
      let resolver = VariableResolver::new(
        &node.node_id,
        &preds,
        self.workflow.trigger_id(),
        &state.context,
      );
      condition::evaluate(&config, &resolver)
    };

    match evaluated {
      Ok(outcome) => {
        debug!(
          run_id = %self.run_id,
          node_id = %node.node_id,
          matched = outcome.matched,
          action = action_name(outcome.action),
          "condition decided"
        );
        let result = NodeResult::ok(json!({
          "matched": outcome.matched,
          "action": action_name(outcome.action),
        }))
        .with_warnings(outcome.warnings);
        self.complete_node(&node.node_id, result).await;

        Ok(match outcome.action {
          ConditionAction::Continue => ConditionFlow::Continue,
          ConditionAction::Stop => ConditionFlow::Stop,
          ConditionAction::SkipNext => ConditionFlow::SkipNext,
        })
      }
      Err(e) => {
        let message = e.to_string();
        self
          .complete_node(&node.node_id, NodeResult::failed("resolve", &message, 0))
          .await;
        Ok(ConditionFlow::Failed { message })
      }
    }
  }

  pub(crate) async fn start_node(&self, node_id: &str) {
    {
      let mut state = self.state.lock().await;
      state
        .node_states
        .insert(node_id.to_string(), NodeState::Running);
    }
    self.notifier.notify(ExecutionEvent::NodeStarted {
      run_id: self.run_id.clone(),
      node_id: node_id.to_string(),
    });
  }

  pub(crate) async fn complete_node(&self, node_id: &str, result: NodeResult) {
    let next = if result.success {
      NodeState::Succeeded
    } else {
      NodeState::Failed
    };
    {
      let mut state = self.state.lock().await;
      state.node_states.insert(node_id.to_string(), next);
      state.context.insert(node_id, result.clone());
    }
    self.notifier.notify(ExecutionEvent::NodeCompleted {
      run_id: self.run_id.clone(),
      node_id: node_id.to_string(),
      result,
    });
  }

  pub(crate) async fn skip_node(&self, node_id: &str, pass_through: bool) {
    {
      let mut state = self.state.lock().await;
      state
        .node_states
        .insert(node_id.to_string(), NodeState::Skipped);
      if pass_through {
        state.pass_through.insert(node_id.to_string());
      }
    }
    self.notifier.notify(ExecutionEvent::NodeSkipped {
      run_id: self.run_id.clone(),
      node_id: node_id.to_string(),
    });
  }

  /// Record a mid-flight cancellation. The node's in-flight result is
  /// not written into the context.
  pub(crate) async fn cancel_node(&self, node_id: &str) {
    debug!(run_id = %self.run_id, node_id = %node_id, "node cancelled");
    let mut state = self.state.lock().await;
    state
      .node_states
      .insert(node_id.to_string(), NodeState::Cancelled);
  }

  /// Skip a node only if it never started; used to settle the remains of
  /// a failed or cancelled branch.
  pub(crate) async fn skip_if_pending(&self, node_id: &str) {
    let pending = {
      let mut state = self.state.lock().await;
      if state.node_states.get(node_id) == Some(&NodeState::Pending) {
        state
          .node_states
          .insert(node_id.to_string(), NodeState::Skipped);
        true
      } else {
        false
      }
    };
    if pending {
      self.notifier.notify(ExecutionEvent::NodeSkipped {
        run_id: self.run_id.clone(),
        node_id: node_id.to_string(),
      });
    }
  }
}

enum ConditionFlow {
  Continue,
  Stop,
  SkipNext,
  Failed { message: String },
}

fn action_name(action: ConditionAction) -> &'static str {
  match action {
    ConditionAction::Continue => "continue",
    ConditionAction::Stop => "stop",
    ConditionAction::SkipNext => "skip_next",
  }
}

/// A node-level retry override wins; otherwise the scope's policy (the
/// enclosing parallel retry, or the workflow default) applies.
fn effective_retry(node: &NodeDef, scope: RetryPolicy) -> RetryPolicy {
  match node.max_retry_attempts {
    Some(attempts) => RetryPolicy::new(attempts, scope.backoff, scope.initial_delay),
    None => scope,
  }
}
