//! Workflow configuration types for pricerun.
//!
//! These are the serializable shapes handed to the engine by the graph
//! editor or generator: node definitions, edges, and the contractually
//! fixed config payloads of the two control-flow node types.
//!
//! Node configs are otherwise opaque maps; only `condition` and `parallel`
//! have shapes the engine interprets itself.

mod control;
mod edge;
mod enums;
mod node;
mod workflow;

pub use control::{
  BranchDef, BranchStrategy, Condition, ConditionAction, ConditionConfig, ConditionOperator,
  FailurePolicy, LogicOperator, ParallelConfig,
};
pub use edge::Edge;
pub use enums::{NodeCategory, NodeKind, RetryBackoff};
pub use node::NodeDef;
pub use workflow::WorkflowDef;
