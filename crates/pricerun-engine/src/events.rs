//! Execution events and notifiers.
//!
//! The engine emits one event per node transition and per run boundary,
//! letting consumers persist progress, stream it to a UI, or ignore it.

use pricerun_workflow::NodeResult;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionEvent {
  ExecutionStarted {
    run_id: String,
    workflow_id: String,
  },

  NodeStarted {
    run_id: String,
    node_id: String,
  },

  /// A node reached a terminal state with a result, successful or not.
  NodeCompleted {
    run_id: String,
    node_id: String,
    result: NodeResult,
  },

  /// A node was skipped, either by a `skip_next` action or because no
  /// live predecessor remained.
  NodeSkipped {
    run_id: String,
    node_id: String,
  },

  ExecutionCompleted {
    run_id: String,
  },

  ExecutionFailed {
    run_id: String,
    error: String,
  },

  /// A `wait_none` branch failed after the surrounding flow moved on.
  /// The run itself is unaffected.
  DetachedBranchFailed {
    run_id: String,
    node_id: String,
    branch: String,
  },
}

/// Receives execution events. The engine calls `notify` inline, so
/// implementations must not block.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// Forwards events to an unbounded channel. Unbounded so a slow consumer
/// never stalls the engine; volume is one event per node transition.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // The receiver may already be gone; that is fine.
    let _ = self.sender.send(event);
  }
}
