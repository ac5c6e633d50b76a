use pricerun_workflow::GraphError;
use thiserror::Error;

/// Run-fatal failures. Node-level failures become failed `NodeResult`s
/// first; only the ones the enclosing policy does not absorb surface
/// here as [`EngineError::NodeFailed`].
#[derive(Debug, Error)]
pub enum EngineError {
  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error("run cancelled")]
  Cancelled,

  #[error("run exceeded its {timeout_ms}ms timeout")]
  Timeout { timeout_ms: u64 },

  #[error("node '{node_id}' failed: {message}")]
  NodeFailed { node_id: String, message: String },

  #[error("invalid control config on node '{node_id}': {message}")]
  ControlConfig { node_id: String, message: String },

  #[error("parallel node '{node_id}' has no branch plan")]
  MissingBranchPlan { node_id: String },

  #[error("task join error: {0}")]
  Join(String),

  #[error("workflow runner channel closed")]
  ChannelClosed,
}
