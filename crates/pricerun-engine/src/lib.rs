//! Workflow execution for pricerun.
//!
//! [`ExecutionEngine::execute`] drives a validated workflow from its
//! trigger to a terminal state: nodes run in dependency waves, condition
//! nodes route or stop the flow, and parallel nodes fan out into
//! coordinated branches. Progress streams through an
//! [`ExecutionNotifier`]; [`WorkflowRunner`] wraps the engine in a
//! channel-fed trigger loop for long-lived deployments.

mod branch;
mod condition;
mod engine;
mod error;
mod events;
mod runner;
mod state;

pub use condition::{ConditionOutcome, evaluate as evaluate_condition};
pub use engine::ExecutionEngine;
pub use error::EngineError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use runner::WorkflowRunner;
pub use state::{NodeState, RunReport, RunStatus};
