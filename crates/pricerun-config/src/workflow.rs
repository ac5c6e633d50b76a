use serde::{Deserialize, Serialize};

use crate::edge::Edge;
use crate::enums::RetryBackoff;
use crate::node::NodeDef;

/// A whole workflow as handed to the engine: an ordered node list plus
/// edges. Node order is meaningful; it breaks topological-order ties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
  pub workflow_id: String,
  pub name: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  /// Run-level deadline; a run past this is cancelled and failed.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
  /// Workflow-wide retry default for nodes without their own override.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_retry_attempts: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub retry_backoff: Option<RetryBackoff>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub retry_initial_delay_ms: Option<u64>,
  pub nodes: Vec<NodeDef>,
  pub edges: Vec<Edge>,
}
