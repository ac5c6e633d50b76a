use std::collections::HashMap;

use pricerun_workflow::ExecutionContext;
use serde::{Deserialize, Serialize};

/// Where a run ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
  Completed,
  Failed,
  Cancelled,
}

/// Per-node lifecycle. Nodes only move forward: once terminal, a state
/// never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
  Pending,
  Running,
  Succeeded,
  Failed,
  Skipped,
  /// The invocation was asked to stop mid-flight. Its eventual result is
  /// discarded; only results recorded before the cancellation remain.
  Cancelled,
}

impl NodeState {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      NodeState::Succeeded | NodeState::Failed | NodeState::Skipped | NodeState::Cancelled
    )
  }
}

/// What a finished run hands back: every recorded node result plus the
/// final state of each node the workflow declares.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
  pub run_id: String,
  pub status: RunStatus,
  pub context: ExecutionContext,
  pub node_states: HashMap<String, NodeState>,
}
