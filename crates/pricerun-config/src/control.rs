//! Config payloads for the two control-flow node types.
//!
//! Key names are camelCase because that is what the graph editor emits.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicOperator {
  And,
  Or,
}

impl Default for LogicOperator {
  fn default() -> Self {
    LogicOperator::And
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
  #[serde(rename = "==")]
  Eq,
  #[serde(rename = "!=")]
  Ne,
  #[serde(rename = ">")]
  Gt,
  #[serde(rename = "<")]
  Lt,
  #[serde(rename = ">=")]
  Ge,
  #[serde(rename = "<=")]
  Le,
  Contains,
  NotContains,
  StartsWith,
  EndsWith,
  IsEmpty,
  IsNotEmpty,
}

/// What the run does after the combined predicate is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionAction {
  Continue,
  Stop,
  SkipNext,
}

/// A single comparison. `field` resolves through the variable resolver;
/// a bare name is shorthand for `{{previous_output.<field>}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
  pub field: String,
  pub operator: ConditionOperator,
  /// Ignored by `is_empty` / `is_not_empty`.
  #[serde(default)]
  pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionConfig {
  #[serde(default)]
  pub logic_operator: LogicOperator,
  #[serde(default)]
  pub conditions: Vec<Condition>,
  #[serde(default = "default_on_match")]
  pub on_match: ConditionAction,
  #[serde(default = "default_on_no_match")]
  pub on_no_match: ConditionAction,
}

impl ConditionConfig {
  /// Whether either action can skip the direct successor. Used during
  /// validation to require a unique successor.
  pub fn uses_skip_next(&self) -> bool {
    self.on_match == ConditionAction::SkipNext || self.on_no_match == ConditionAction::SkipNext
  }
}

fn default_on_match() -> ConditionAction {
  ConditionAction::Continue
}

fn default_on_no_match() -> ConditionAction {
  ConditionAction::Stop
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStrategy {
  WaitAll,
  WaitAny,
  WaitNone,
}

impl Default for BranchStrategy {
  fn default() -> Self {
    BranchStrategy::WaitAll
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
  Continue,
  StopAll,
  Retry,
}

impl Default for FailurePolicy {
  fn default() -> Self {
    FailurePolicy::Continue
  }
}

/// One declared branch of a `parallel` node. Branches pair with the
/// node's direct successor edges by declaration index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchDef {
  pub name: String,
  #[serde(default = "default_enabled")]
  pub enabled: bool,
  /// Launch ordering hint; lower launches first. All enabled branches
  /// still run concurrently.
  #[serde(default)]
  pub priority: u32,
}

fn default_enabled() -> bool {
  true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelConfig {
  #[serde(default)]
  pub strategy: BranchStrategy,
  #[serde(default)]
  pub on_failure: FailurePolicy,
  /// Only consulted when `on_failure` is `retry`.
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
  #[serde(default)]
  pub branches: Vec<BranchDef>,
}

fn default_max_retries() -> u32 {
  3
}
