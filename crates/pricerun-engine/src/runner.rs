//! Workflow runner with channel-based triggering.
//!
//! The `WorkflowRunner` owns an mpsc channel for trigger payloads and
//! executes one run per received payload. Webhook handlers, schedulers
//! or a UI hold the sender; the runner loop holds the engine.

use std::sync::Arc;

use pricerun_workflow::Workflow;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::engine::ExecutionEngine;
use crate::error::EngineError;
use crate::events::{ExecutionNotifier, NoopNotifier};
use crate::state::{RunReport, RunStatus};

pub struct WorkflowRunner<N: ExecutionNotifier = NoopNotifier> {
  sender: mpsc::Sender<serde_json::Value>,
  receiver: mpsc::Receiver<serde_json::Value>,
  engine: Arc<ExecutionEngine<N>>,
  workflow: Arc<Workflow>,
}

impl<N: ExecutionNotifier + 'static> WorkflowRunner<N> {
  pub fn new(engine: Arc<ExecutionEngine<N>>, workflow: Arc<Workflow>) -> Self {
    Self::with_buffer_size(engine, workflow, 100)
  }

  pub fn with_buffer_size(
    engine: Arc<ExecutionEngine<N>>,
    workflow: Arc<Workflow>,
    buffer_size: usize,
  ) -> Self {
    let (sender, receiver) = mpsc::channel(buffer_size);
    Self {
      sender,
      receiver,
      engine,
      workflow,
    }
  }

  /// A sender handle for triggering runs. Clone it freely.
  pub fn sender(&self) -> mpsc::Sender<serde_json::Value> {
    self.sender.clone()
  }

  /// Queue one trigger payload.
  pub async fn run(&self, payload: serde_json::Value) -> Result<(), EngineError> {
    self
      .sender
      .send(payload)
      .await
      .map_err(|_| EngineError::ChannelClosed)
  }

  /// Receive payloads and execute runs until cancelled or the channel
  /// closes. Each run gets its own child cancellation token.
  pub async fn start(mut self, cancel: CancellationToken) -> Result<(), EngineError> {
    info!(
      workflow_id = %self.workflow.workflow_id,
      workflow_name = %self.workflow.name,
      "starting workflow runner"
    );

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!(workflow_id = %self.workflow.workflow_id, "workflow runner cancelled");
          break;
        }
        payload = self.receiver.recv() => {
          let Some(payload) = payload else {
            info!(workflow_id = %self.workflow.workflow_id, "workflow runner channel closed");
            break;
          };

          let run_cancel = cancel.child_token();
          match self
            .engine
            .execute(self.workflow.clone(), payload, run_cancel)
            .await
          {
            Ok(report) => match report.status {
              RunStatus::Completed => info!(
                workflow_id = %self.workflow.workflow_id,
                run_id = %report.run_id,
                nodes = report.context.len(),
                "run completed"
              ),
              RunStatus::Cancelled => info!(
                workflow_id = %self.workflow.workflow_id,
                run_id = %report.run_id,
                "run cancelled"
              ),
              RunStatus::Failed => error!(
                workflow_id = %self.workflow.workflow_id,
                run_id = %report.run_id,
                "run failed"
              ),
            },
            Err(e) => error!(
              workflow_id = %self.workflow.workflow_id,
              error = %e,
              "run aborted"
            ),
          }
        }
      }
    }

    Ok(())
  }

  /// Execute a single run without the loop; used by the CLI and tests.
  pub async fn execute_once(
    &self,
    payload: serde_json::Value,
    cancel: CancellationToken,
  ) -> Result<RunReport, EngineError> {
    self
      .engine
      .execute(self.workflow.clone(), payload, cancel)
      .await
  }

  pub fn workflow(&self) -> &Workflow {
    &self.workflow
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;
  use std::time::Duration;

  use pricerun_config::{NodeDef, NodeKind, WorkflowDef};
  use pricerun_connector::{ConnectorInvoker, HandlerRegistry, NoCredentials};
  use pricerun_workflow::Workflow;

  use super::*;

  fn trigger_only_workflow() -> Arc<Workflow> {
    let def = WorkflowDef {
      workflow_id: "wf-runner".to_string(),
      name: "runner test".to_string(),
      description: None,
      timeout_ms: None,
      max_retry_attempts: None,
      retry_backoff: None,
      retry_initial_delay_ms: None,
      nodes: vec![NodeDef::new("start", NodeKind::TriggerManual)],
      edges: vec![],
    };
    Arc::new(Workflow::validate(def).unwrap())
  }

  fn engine() -> Arc<ExecutionEngine> {
    let invoker = ConnectorInvoker::new(HandlerRegistry::new(), Arc::new(NoCredentials));
    Arc::new(ExecutionEngine::new(invoker))
  }

  #[tokio::test]
  async fn run_sends_to_channel() {
    let mut runner = WorkflowRunner::new(engine(), trigger_only_workflow());
    runner.run(serde_json::json!({ "cusip": "x" })).await.unwrap();

    let received = runner.receiver.recv().await.unwrap();
    assert_eq!(received["cusip"], "x");
  }

  #[tokio::test]
  async fn execute_once_completes_trigger_only_workflow() {
    let runner = WorkflowRunner::new(engine(), trigger_only_workflow());
    let report = runner
      .execute_once(serde_json::json!({ "n": 1 }), CancellationToken::new())
      .await
      .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.context.output("start"), Some(&serde_json::json!({ "n": 1 })));
  }

  #[tokio::test]
  async fn cancellation_stops_the_loop() {
    let runner = WorkflowRunner::new(engine(), trigger_only_workflow());
    let cancel = CancellationToken::new();
    let loop_cancel = cancel.clone();

    let handle = tokio::spawn(async move { runner.start(loop_cancel).await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    cancel.cancel();

    assert!(handle.await.unwrap().is_ok());
  }
}
