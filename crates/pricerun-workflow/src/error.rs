use thiserror::Error;

/// Structural errors. All of these are detected by [`crate::Workflow::validate`]
/// before any run starts; none can surface mid-execution.
#[derive(Debug, Error)]
pub enum GraphError {
  /// The graph contains a cycle; the node ids on the cycle are listed in
  /// traversal order.
  #[error("cycle detected through nodes {0:?}")]
  Cycle(Vec<String>),

  /// An edge endpoint references a node id that does not exist.
  #[error("edge references unknown node: from='{from}', to='{to}'")]
  DanglingEdge { from: String, to: String },

  #[error("workflow has no trigger node")]
  NoTrigger,

  #[error("workflow has multiple trigger nodes: {0:?}")]
  MultipleTriggers(Vec<String>),

  #[error("duplicate node id: {node_id}")]
  DuplicateNodeId { node_id: String },

  /// A non-trigger node with no incoming edges can never be scheduled.
  #[error("node '{node_id}' has no incoming edges but is not a trigger")]
  OrphanNode { node_id: String },

  #[error("trigger node '{node_id}' must not have incoming edges")]
  TriggerNotEntry { node_id: String },

  /// `trigger` and `previous_output` are template roots and cannot be
  /// used as node ids.
  #[error("node id '{node_id}' is reserved for variable resolution")]
  ReservedNodeId { node_id: String },

  #[error("node '{node_id}' declares category '{declared}' but type '{kind}' is a {expected} type")]
  CategoryMismatch {
    node_id: String,
    declared: String,
    kind: String,
    expected: String,
  },

  /// The subgraphs downstream of a `parallel` node do not partition into
  /// disjoint branches with a common convergence point.
  #[error("ambiguous branch partition at '{node_id}': {message}")]
  AmbiguousBranch { node_id: String, message: String },

  /// A condition that can `skip_next` must have exactly one direct
  /// successor to skip.
  #[error("condition '{node_id}' uses skip_next but has {count} direct successors")]
  AmbiguousSkipTarget { node_id: String, count: usize },

  /// A control node's config does not parse into its fixed shape.
  #[error("invalid control config on node '{node_id}': {message}")]
  InvalidControlConfig { node_id: String, message: String },
}
