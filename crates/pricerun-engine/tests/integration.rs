//! End-to-end engine tests with mock connector handlers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pricerun_config::{Edge, NodeDef, NodeKind, WorkflowDef};
use pricerun_connector::{
  ConnectorInvoker, HandlerError, HandlerRegistry, Invocation, NodeHandler, NoCredentials,
};
use pricerun_engine::{
  ChannelNotifier, ExecutionEngine, ExecutionEvent, NodeState, RunStatus,
};
use pricerun_workflow::Workflow;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

/// Returns its resolved config as output.
struct Echo;

#[async_trait]
impl NodeHandler for Echo {
  async fn invoke(&self, invocation: Invocation) -> Result<Value, HandlerError> {
    Ok(Value::Object(invocation.config))
  }
}

struct Fail;

#[async_trait]
impl NodeHandler for Fail {
  async fn invoke(&self, _invocation: Invocation) -> Result<Value, HandlerError> {
    Err(HandlerError::Connector("boom".to_string()))
  }
}

struct Sleepy {
  ms: u64,
}

#[async_trait]
impl NodeHandler for Sleepy {
  async fn invoke(&self, _invocation: Invocation) -> Result<Value, HandlerError> {
    tokio::time::sleep(Duration::from_millis(self.ms)).await;
    Ok(json!({ "slept": self.ms }))
  }
}

struct Flaky {
  calls: Arc<AtomicU32>,
  fail_first: u32,
}

#[async_trait]
impl NodeHandler for Flaky {
  async fn invoke(&self, _invocation: Invocation) -> Result<Value, HandlerError> {
    let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
    if call <= self.fail_first {
      Err(HandlerError::Connector(format!("flake {call}")))
    } else {
      Ok(json!({ "call": call }))
    }
  }
}

fn node(id: &str, kind: NodeKind, config: Value) -> NodeDef {
  NodeDef::new(id, kind).with_config(config)
}

fn def(nodes: Vec<NodeDef>, edges: Vec<(&str, &str)>) -> WorkflowDef {
  WorkflowDef {
    workflow_id: "wf-integration".to_string(),
    name: "integration".to_string(),
    description: None,
    timeout_ms: None,
    max_retry_attempts: None,
    retry_backoff: None,
    retry_initial_delay_ms: None,
    nodes,
    edges: edges.into_iter().map(|(f, t)| Edge::new(f, t)).collect(),
  }
}

fn workflow(nodes: Vec<NodeDef>, edges: Vec<(&str, &str)>) -> Arc<Workflow> {
  Arc::new(Workflow::validate(def(nodes, edges)).unwrap())
}

fn engine(registry: HandlerRegistry) -> ExecutionEngine {
  ExecutionEngine::new(ConnectorInvoker::new(registry, Arc::new(NoCredentials)))
}

fn parallel_config(strategy: &str, on_failure: &str, branches: &[&str]) -> Value {
  json!({
    "strategy": strategy,
    "onFailure": on_failure,
    "branches": branches.iter().map(|n| json!({ "name": n })).collect::<Vec<_>>(),
  })
}

#[tokio::test]
async fn linear_flow_resolves_templates_between_nodes() {
  let registry = HandlerRegistry::new()
    .with(NodeKind::OracleQuery, Arc::new(Echo))
    .with(NodeKind::OutputPrint, Arc::new(Echo));
  let engine = engine(registry);

  let wf = workflow(
    vec![
      node("start", NodeKind::TriggerManual, json!({})),
      node(
        "lookup",
        NodeKind::OracleQuery,
        json!({ "sql": "SELECT status FROM px WHERE cusip = :cusip" }),
      ),
      node(
        "notify",
        NodeKind::OutputPrint,
        json!({ "message": "query was [{{previous_output.sql}}]" }),
      ),
    ],
    vec![("start", "lookup"), ("lookup", "notify")],
  );

  let report = engine
    .execute(wf, json!({ "cusip": "912828YK0" }), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(report.status, RunStatus::Completed);
  assert_eq!(
    report.context.output("lookup"),
    Some(&json!({ "sql": "SELECT status FROM px WHERE cusip = 912828YK0" }))
  );
  assert_eq!(
    report.context.output("notify"),
    Some(&json!({ "message": "query was [SELECT status FROM px WHERE cusip = 912828YK0]" }))
  );
}

#[tokio::test]
async fn condition_stop_ends_the_run_cleanly() {
  let registry = HandlerRegistry::new()
    .with(NodeKind::OracleQuery, Arc::new(Echo))
    .with(NodeKind::OutputPrint, Arc::new(Echo));
  let engine = engine(registry);

  let wf = workflow(
    vec![
      node("start", NodeKind::TriggerManual, json!({})),
      node("check", NodeKind::OracleQuery, json!({ "status": "OK" })),
      node(
        "gate",
        NodeKind::Condition,
        json!({
          "conditions": [{ "field": "status", "operator": "==", "value": "STALE" }],
          "onMatch": "continue",
          "onNoMatch": "stop"
        }),
      ),
      node("notify", NodeKind::OutputPrint, json!({ "message": "stale!" })),
    ],
    vec![("start", "check"), ("check", "gate"), ("gate", "notify")],
  );

  let report = engine
    .execute(wf, json!({}), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(report.status, RunStatus::Completed);
  assert_eq!(
    report.context.output("gate"),
    Some(&json!({ "matched": false, "action": "stop" }))
  );
  assert!(!report.context.contains("notify"));
  assert_eq!(report.node_states.get("notify"), Some(&NodeState::Skipped));
}

#[tokio::test]
async fn skip_next_skips_only_the_direct_successor() {
  let registry = HandlerRegistry::new()
    .with(NodeKind::OracleQuery, Arc::new(Echo))
    .with(NodeKind::UnixCommand, Arc::new(Fail))
    .with(NodeKind::OutputPrint, Arc::new(Echo));
  let engine = engine(registry);

  // remediate would fail if it ever ran; skip_next must route around it.
  let wf = workflow(
    vec![
      node("start", NodeKind::TriggerManual, json!({})),
      node("check", NodeKind::OracleQuery, json!({ "status": "OK" })),
      node(
        "gate",
        NodeKind::Condition,
        json!({
          "conditions": [{ "field": "status", "operator": "==", "value": "OK" }],
          "onMatch": "skip_next",
          "onNoMatch": "continue"
        }),
      ),
      node("remediate", NodeKind::UnixCommand, json!({ "cmd": "fix" })),
      node(
        "report",
        NodeKind::OutputPrint,
        json!({ "message": "status {{check.status}}" }),
      ),
    ],
    vec![
      ("start", "check"),
      ("check", "gate"),
      ("gate", "remediate"),
      ("remediate", "report"),
    ],
  );

  let report = engine
    .execute(wf, json!({}), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(report.status, RunStatus::Completed);
  assert_eq!(report.node_states.get("remediate"), Some(&NodeState::Skipped));
  assert!(!report.context.contains("remediate"));
  assert_eq!(
    report.context.output("report"),
    Some(&json!({ "message": "status OK" }))
  );
}

#[tokio::test]
async fn wait_all_continue_absorbs_a_branch_failure() {
  let registry = HandlerRegistry::new()
    .with(NodeKind::UnixCommand, Arc::new(Fail))
    .with(NodeKind::OracleQuery, Arc::new(Echo))
    .with(NodeKind::OutputPrint, Arc::new(Echo));
  let engine = engine(registry);

  let wf = workflow(
    vec![
      node("start", NodeKind::TriggerManual, json!({})),
      node(
        "fanout",
        NodeKind::Parallel,
        parallel_config("wait_all", "continue", &["fix", "audit"]),
      ),
      node("fix", NodeKind::UnixCommand, json!({ "cmd": "repair" })),
      node("audit", NodeKind::OracleQuery, json!({ "rows": 3 })),
      node("summary", NodeKind::OutputPrint, json!({ "message": "done" })),
    ],
    vec![
      ("start", "fanout"),
      ("fanout", "fix"),
      ("fanout", "audit"),
      ("fix", "summary"),
      ("audit", "summary"),
    ],
  );

  let report = engine
    .execute(wf, json!({}), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(report.status, RunStatus::Completed);
  assert_eq!(report.node_states.get("fix"), Some(&NodeState::Failed));
  assert_eq!(report.node_states.get("audit"), Some(&NodeState::Succeeded));

  // The coordinator's own result reports the failure without failing
  // the run.
  let fanout = report.context.get("fanout").unwrap();
  assert!(!fanout.success);
  assert_eq!(fanout.error.as_ref().unwrap().kind, "branch");
  assert_eq!(fanout.output["branches"]["fix"], json!("failed"));
  assert_eq!(fanout.output["branches"]["audit"], json!("completed"));

  // Convergence still ran: one feeding branch succeeded.
  assert!(report.context.contains("summary"));
}

#[tokio::test]
async fn retry_exhaustion_marks_the_branch_failed_and_the_run_continues() {
  let calls = Arc::new(AtomicU32::new(0));
  let registry = HandlerRegistry::new()
    .with(
      NodeKind::UnixCommand,
      Arc::new(Flaky {
        calls: calls.clone(),
        fail_first: u32::MAX,
      }),
    )
    .with(NodeKind::OracleQuery, Arc::new(Echo))
    .with(NodeKind::OutputPrint, Arc::new(Echo));
  let engine = engine(registry);

  let wf = workflow(
    vec![
      node("start", NodeKind::TriggerManual, json!({})),
      node(
        "fanout",
        NodeKind::Parallel,
        json!({
          "strategy": "wait_all",
          "onFailure": "retry",
          "maxRetries": 2,
          "branches": [{ "name": "fix" }, { "name": "audit" }],
        }),
      ),
      node("fix", NodeKind::UnixCommand, json!({ "cmd": "repair" })),
      node("audit", NodeKind::OracleQuery, json!({ "rows": 3 })),
      node("summary", NodeKind::OutputPrint, json!({ "message": "done" })),
    ],
    vec![
      ("start", "fanout"),
      ("fanout", "fix"),
      ("fanout", "audit"),
      ("fix", "summary"),
      ("audit", "summary"),
    ],
  );

  let report = engine
    .execute(wf, json!({}), CancellationToken::new())
    .await
    .unwrap();

  // Retries exhausted: the branch fails like under `continue`, the
  // others proceed, and the run still completes.
  assert_eq!(report.status, RunStatus::Completed);
  assert_eq!(calls.load(Ordering::SeqCst), 2);
  assert_eq!(report.node_states.get("fix"), Some(&NodeState::Failed));
  assert_eq!(report.context.get("fix").unwrap().error.as_ref().unwrap().attempts, 2);
  assert_eq!(report.node_states.get("audit"), Some(&NodeState::Succeeded));

  let fanout = report.context.get("fanout").unwrap();
  assert!(!fanout.success);
  assert_eq!(fanout.output["branches"]["fix"], json!("failed"));
  assert!(report.context.contains("summary"));
}

#[tokio::test]
async fn stop_all_fails_the_run_and_cancels_siblings() {
  let registry = HandlerRegistry::new()
    .with(NodeKind::UnixCommand, Arc::new(Fail))
    .with(NodeKind::ToolHttp, Arc::new(Sleepy { ms: 10_000 }))
    .with(NodeKind::OutputPrint, Arc::new(Echo));
  let engine = engine(registry);

  let wf = workflow(
    vec![
      node("start", NodeKind::TriggerManual, json!({})),
      node(
        "fanout",
        NodeKind::Parallel,
        parallel_config("wait_all", "stop_all", &["fix", "slow"]),
      ),
      node("fix", NodeKind::UnixCommand, json!({ "cmd": "repair" })),
      node("slow", NodeKind::ToolHttp, json!({ "url": "http://x" })),
      node("summary", NodeKind::OutputPrint, json!({ "message": "done" })),
    ],
    vec![
      ("start", "fanout"),
      ("fanout", "fix"),
      ("fanout", "slow"),
      ("fix", "summary"),
      ("slow", "summary"),
    ],
  );

  let report = engine
    .execute(wf, json!({}), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(report.status, RunStatus::Failed);
  assert_eq!(report.node_states.get("fix"), Some(&NodeState::Failed));
  assert_eq!(report.node_states.get("slow"), Some(&NodeState::Cancelled));
  assert!(!report.context.contains("slow"));
  assert!(!report.context.contains("summary"));

  let fanout = report.context.get("fanout").unwrap();
  assert!(!fanout.success);
  assert_eq!(fanout.error.as_ref().unwrap().kind, "branch");
}

#[tokio::test]
async fn wait_any_completes_on_the_first_branch_and_keeps_partial_results() {
  let registry = HandlerRegistry::new()
    .with(NodeKind::OracleQuery, Arc::new(Echo))
    .with(NodeKind::ToolHttp, Arc::new(Sleepy { ms: 10_000 }))
    .with(NodeKind::OutputPrint, Arc::new(Echo));
  let engine = engine(registry);

  let wf = workflow(
    vec![
      node("start", NodeKind::TriggerManual, json!({})),
      node(
        "race",
        NodeKind::Parallel,
        parallel_config("wait_any", "continue", &["fast", "slow"]),
      ),
      node("fast", NodeKind::OracleQuery, json!({ "rows": 1 })),
      node("slow", NodeKind::ToolHttp, json!({ "url": "http://x" })),
      node("summary", NodeKind::OutputPrint, json!({ "message": "done" })),
    ],
    vec![
      ("start", "race"),
      ("race", "fast"),
      ("race", "slow"),
      ("fast", "summary"),
      ("slow", "summary"),
    ],
  );

  let report = engine
    .execute(wf, json!({}), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(report.status, RunStatus::Completed);
  assert_eq!(report.context.output("fast"), Some(&json!({ "rows": 1 })));
  assert_eq!(report.node_states.get("slow"), Some(&NodeState::Cancelled));
  assert!(!report.context.contains("slow"));

  let race = report.context.get("race").unwrap();
  assert!(race.success);
  assert_eq!(race.output["branches"]["fast"], json!("completed"));
  assert!(report.context.contains("summary"));
}

#[tokio::test]
async fn wait_any_stop_all_treats_cancelled_losers_as_cancelled_not_failed() {
  let registry = HandlerRegistry::new()
    .with(NodeKind::OracleQuery, Arc::new(Echo))
    .with(NodeKind::ToolHttp, Arc::new(Sleepy { ms: 10_000 }))
    .with(NodeKind::OutputPrint, Arc::new(Echo));
  let engine = engine(registry);

  let wf = workflow(
    vec![
      node("start", NodeKind::TriggerManual, json!({})),
      node(
        "race",
        NodeKind::Parallel,
        parallel_config("wait_any", "stop_all", &["fast", "slow"]),
      ),
      node("fast", NodeKind::OracleQuery, json!({ "rows": 1 })),
      node("slow", NodeKind::ToolHttp, json!({ "url": "http://x" })),
      node("summary", NodeKind::OutputPrint, json!({ "message": "done" })),
    ],
    vec![
      ("start", "race"),
      ("race", "fast"),
      ("race", "slow"),
      ("fast", "summary"),
      ("slow", "summary"),
    ],
  );

  let report = engine
    .execute(wf, json!({}), CancellationToken::new())
    .await
    .unwrap();

  // The losing branch was cancelled, not failed: stop_all has nothing
  // to react to and the run completes.
  assert_eq!(report.status, RunStatus::Completed);
  assert_eq!(report.node_states.get("slow"), Some(&NodeState::Cancelled));
  assert!(!report.context.contains("slow"));

  let race = report.context.get("race").unwrap();
  assert!(race.success);
  assert!(report.context.contains("summary"));
}

#[tokio::test]
async fn wait_none_detaches_branches_and_still_reaches_convergence() {
  let registry = HandlerRegistry::new()
    .with(NodeKind::OracleQuery, Arc::new(Sleepy { ms: 30 }))
    .with(NodeKind::ToolHttp, Arc::new(Sleepy { ms: 60 }))
    .with(NodeKind::OutputPrint, Arc::new(Echo));
  let engine = engine(registry);

  let wf = workflow(
    vec![
      node("start", NodeKind::TriggerManual, json!({})),
      node(
        "bg",
        NodeKind::Parallel,
        parallel_config("wait_none", "continue", &["warm", "sync"]),
      ),
      node("warm", NodeKind::OracleQuery, json!({})),
      node("sync", NodeKind::ToolHttp, json!({})),
      node("summary", NodeKind::OutputPrint, json!({ "message": "done" })),
    ],
    vec![
      ("start", "bg"),
      ("bg", "warm"),
      ("bg", "sync"),
      ("warm", "summary"),
      ("sync", "summary"),
    ],
  );

  let report = engine
    .execute(wf, json!({}), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(report.status, RunStatus::Completed);
  let bg = report.context.output("bg").unwrap();
  assert_eq!(bg["branches"]["warm"], json!("detached"));
  assert_eq!(bg["branches"]["sync"], json!("detached"));

  // Both detached branches finished and unlocked the convergence node.
  assert_eq!(report.context.output("warm"), Some(&json!({ "slept": 30 })));
  assert_eq!(report.context.output("sync"), Some(&json!({ "slept": 60 })));
  assert!(report.context.contains("summary"));
}

#[tokio::test]
async fn node_retry_override_runs_the_handler_again() {
  let calls = Arc::new(AtomicU32::new(0));
  let registry = HandlerRegistry::new().with(
    NodeKind::OracleQuery,
    Arc::new(Flaky {
      calls: calls.clone(),
      fail_first: 2,
    }),
  );
  let engine = engine(registry);

  let mut lookup = node("lookup", NodeKind::OracleQuery, json!({}));
  lookup.max_retry_attempts = Some(3);

  let wf = workflow(
    vec![node("start", NodeKind::TriggerManual, json!({})), lookup],
    vec![("start", "lookup")],
  );

  let report = engine
    .execute(wf, json!({}), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(report.status, RunStatus::Completed);
  assert_eq!(calls.load(Ordering::SeqCst), 3);
  assert_eq!(report.context.output("lookup"), Some(&json!({ "call": 3 })));
}

#[tokio::test]
async fn missing_handler_fails_the_run_with_registry_kind() {
  let engine = engine(HandlerRegistry::new());

  let wf = workflow(
    vec![
      node("start", NodeKind::TriggerManual, json!({})),
      node("lookup", NodeKind::OracleQuery, json!({})),
    ],
    vec![("start", "lookup")],
  );

  let report = engine
    .execute(wf, json!({}), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(report.status, RunStatus::Failed);
  let lookup = report.context.get("lookup").unwrap();
  assert_eq!(lookup.error.as_ref().unwrap().kind, "registry");
}

#[tokio::test]
async fn ambiguous_previous_output_fails_at_runtime() {
  let registry = HandlerRegistry::new()
    .with(NodeKind::OracleQuery, Arc::new(Echo))
    .with(NodeKind::OutputPrint, Arc::new(Echo));
  let engine = engine(registry);

  let wf = workflow(
    vec![
      node("start", NodeKind::TriggerManual, json!({})),
      node("a", NodeKind::OracleQuery, json!({ "v": 1 })),
      node("b", NodeKind::OracleQuery, json!({ "v": 2 })),
      node(
        "merge",
        NodeKind::OutputPrint,
        json!({ "message": "{{previous_output.v}}" }),
      ),
    ],
    vec![("start", "a"), ("start", "b"), ("a", "merge"), ("b", "merge")],
  );

  let report = engine
    .execute(wf, json!({}), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(report.status, RunStatus::Failed);
  let merge = report.context.get("merge").unwrap();
  assert_eq!(merge.error.as_ref().unwrap().kind, "resolve");
}

#[tokio::test]
async fn run_timeout_fails_the_run() {
  let registry = HandlerRegistry::new().with(NodeKind::ToolHttp, Arc::new(Sleepy { ms: 10_000 }));
  let engine = engine(registry);

  let mut wf_def = def(
    vec![
      node("start", NodeKind::TriggerManual, json!({})),
      node("slow", NodeKind::ToolHttp, json!({})),
    ],
    vec![("start", "slow")],
  );
  wf_def.timeout_ms = Some(50);
  let wf = Arc::new(Workflow::validate(wf_def).unwrap());

  let report = engine
    .execute(wf, json!({}), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(report.status, RunStatus::Failed);
  assert_ne!(report.node_states.get("slow"), Some(&NodeState::Succeeded));
}

#[tokio::test]
async fn events_arrive_in_lifecycle_order() {
  let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
  let registry = HandlerRegistry::new().with(NodeKind::OracleQuery, Arc::new(Echo));
  let invoker = ConnectorInvoker::new(registry, Arc::new(NoCredentials));
  let engine = ExecutionEngine::with_notifier(invoker, ChannelNotifier::new(tx));

  let wf = workflow(
    vec![
      node("start", NodeKind::TriggerManual, json!({})),
      node("lookup", NodeKind::OracleQuery, json!({ "q": 1 })),
    ],
    vec![("start", "lookup")],
  );

  engine
    .execute(wf, json!({}), CancellationToken::new())
    .await
    .unwrap();

  let mut events = Vec::new();
  while let Ok(event) = rx.try_recv() {
    events.push(event);
  }

  assert!(matches!(events.first(), Some(ExecutionEvent::ExecutionStarted { .. })));
  assert!(matches!(events.last(), Some(ExecutionEvent::ExecutionCompleted { .. })));

  let started = events
    .iter()
    .position(|e| matches!(e, ExecutionEvent::NodeStarted { node_id, .. } if node_id == "lookup"));
  let completed = events
    .iter()
    .position(|e| matches!(e, ExecutionEvent::NodeCompleted { node_id, .. } if node_id == "lookup"));
  assert!(started.unwrap() < completed.unwrap());
}
