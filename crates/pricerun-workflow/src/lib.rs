//! Validated workflow representation for pricerun.
//!
//! A [`Workflow`] is the checked form of a `WorkflowDef`: the graph is a
//! DAG, exactly one trigger exists as the sole entry point, edges are
//! sound, control-node configs parse, and every `parallel` node has a
//! clean branch partition. The engine only accepts this type, so all
//! structural errors surface before a run starts.
//!
//! This crate also owns the runtime value types shared between the
//! resolver, the connector invoker, and the engine: [`NodeResult`],
//! [`ErrorInfo`], [`ResolveWarning`], and [`ExecutionContext`].

mod branch;
mod error;
mod graph;
mod result;
mod workflow;

pub use branch::{BranchPlan, BranchSpec};
pub use error::GraphError;
pub use graph::Graph;
pub use result::{ErrorInfo, ExecutionContext, NodeResult, ResolveWarning};
pub use workflow::Workflow;
