//! Runtime value types produced during a run.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A missing-variable note recorded by the resolver. Non-fatal: the
/// placeholder resolves to the empty string and the consuming node
/// decides whether that is a problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveWarning {
  /// The placeholder path that did not resolve, e.g. `previous_output.price`.
  pub path: String,
}

impl std::fmt::Display for ResolveWarning {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "unresolved variable '{}'", self.path)
  }
}

/// Terminal failure detail attached to a [`NodeResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
  /// Failure class: `connector`, `timeout`, `resolve`, `credential`,
  /// `registry`, `cancelled`, or `branch`.
  pub kind: String,
  pub message: String,
  /// Total invocations made, including retries. Zero when the node never
  /// reached its handler.
  pub attempts: u32,
}

/// What one node execution produced. Retries overwrite the slot before
/// the node reaches a terminal state, never after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
  pub success: bool,
  pub output: serde_json::Value,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<ErrorInfo>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub warnings: Vec<ResolveWarning>,
}

impl NodeResult {
  pub fn ok(output: serde_json::Value) -> Self {
    Self {
      success: true,
      output,
      error: None,
      warnings: Vec::new(),
    }
  }

  pub fn failed(kind: impl Into<String>, message: impl Into<String>, attempts: u32) -> Self {
    Self {
      success: false,
      output: serde_json::Value::Null,
      error: Some(ErrorInfo {
        kind: kind.into(),
        message: message.into(),
        attempts,
      }),
      warnings: Vec::new(),
    }
  }

  pub fn with_warnings(mut self, warnings: Vec<ResolveWarning>) -> Self {
    self.warnings = warnings;
    self
  }
}

/// Per-run accumulation of node results, keyed by node id. Append-only
/// during a run and owned exclusively by that run's engine; concurrent
/// branches write disjoint keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
  results: HashMap<String, NodeResult>,
}

impl ExecutionContext {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, node_id: impl Into<String>, result: NodeResult) {
    self.results.insert(node_id.into(), result);
  }

  pub fn get(&self, node_id: &str) -> Option<&NodeResult> {
    self.results.get(node_id)
  }

  /// The `output` of a node's result, if the node has one recorded.
  pub fn output(&self, node_id: &str) -> Option<&serde_json::Value> {
    self.results.get(node_id).map(|r| &r.output)
  }

  pub fn contains(&self, node_id: &str) -> bool {
    self.results.contains_key(node_id)
  }

  pub fn results(&self) -> &HashMap<String, NodeResult> {
    &self.results
  }

  pub fn len(&self) -> usize {
    self.results.len()
  }

  pub fn is_empty(&self) -> bool {
    self.results.is_empty()
  }
}
