use serde::{Deserialize, Serialize};

use crate::enums::{NodeCategory, NodeKind};

/// A node as the editor serializes it. `config` is opaque to the engine
/// except for the `condition` and `parallel` types, whose payloads parse
/// into [`crate::ConditionConfig`] / [`crate::ParallelConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
  pub node_id: String,
  pub category: NodeCategory,
  #[serde(rename = "type")]
  pub kind: NodeKind,
  #[serde(default)]
  pub config: serde_json::Map<String, serde_json::Value>,
  /// Per-invocation timeout override; handlers declare the default.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
  /// Node-local retry override. Takes precedence over an enclosing
  /// parallel node's retry policy and the workflow default.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_retry_attempts: Option<u32>,
}

impl NodeDef {
  pub fn new(node_id: impl Into<String>, kind: NodeKind) -> Self {
    Self {
      node_id: node_id.into(),
      category: kind.category(),
      kind,
      config: serde_json::Map::new(),
      timeout_ms: None,
      max_retry_attempts: None,
    }
  }

  pub fn with_config(mut self, config: serde_json::Value) -> Self {
    if let serde_json::Value::Object(map) = config {
      self.config = map;
    }
    self
  }
}
