use std::collections::{HashMap, HashSet};

use pricerun_config::{
  ConditionConfig, Edge, NodeCategory, NodeDef, NodeKind, ParallelConfig, RetryBackoff,
  WorkflowDef,
};

use crate::branch::BranchPlan;
use crate::error::GraphError;
use crate::graph::Graph;

/// Node ids that would shadow variable-resolution roots.
const RESERVED_IDS: [&str; 2] = ["trigger", "previous_output"];

/// A validated workflow, ready for execution. Constructed only through
/// [`Workflow::validate`], so holding one implies every structural
/// invariant holds.
#[derive(Debug, Clone)]
pub struct Workflow {
  pub workflow_id: String,
  pub name: String,
  pub timeout_ms: Option<u64>,
  pub max_retry_attempts: Option<u32>,
  pub retry_backoff: Option<RetryBackoff>,
  pub retry_initial_delay_ms: Option<u64>,
  nodes: Vec<NodeDef>,
  index: HashMap<String, usize>,
  graph: Graph,
  trigger_id: String,
  branch_plans: HashMap<String, BranchPlan>,
}

impl Workflow {
  /// Validate a workflow definition. Checks, in order: reserved and
  /// duplicate node ids, category/type agreement, edge endpoints,
  /// trigger count and entry position, orphan nodes, acyclicity, and
  /// control-node configs (including branch partitioning for every
  /// `parallel` node and skip-target arity for every `condition`).
  pub fn validate(def: WorkflowDef) -> Result<Self, GraphError> {
    let mut index = HashMap::new();
    for (i, node) in def.nodes.iter().enumerate() {
      if RESERVED_IDS.contains(&node.node_id.as_str()) {
        return Err(GraphError::ReservedNodeId {
          node_id: node.node_id.clone(),
        });
      }
      if index.insert(node.node_id.clone(), i).is_some() {
        return Err(GraphError::DuplicateNodeId {
          node_id: node.node_id.clone(),
        });
      }
      if node.kind.category() != node.category {
        return Err(GraphError::CategoryMismatch {
          node_id: node.node_id.clone(),
          declared: node.category.to_string(),
          kind: node.kind.to_string(),
          expected: node.kind.category().to_string(),
        });
      }
    }

    for edge in &def.edges {
      if !index.contains_key(&edge.from) || !index.contains_key(&edge.to) {
        return Err(GraphError::DanglingEdge {
          from: edge.from.clone(),
          to: edge.to.clone(),
        });
      }
    }

    let order: Vec<String> = def.nodes.iter().map(|n| n.node_id.clone()).collect();
    let graph = Graph::new(order, &def.edges);

    let trigger_id = Self::check_triggers(&def.nodes, &graph)?;

    if let Some(cycle) = graph.detect_cycle() {
      return Err(GraphError::Cycle(cycle));
    }

    let branch_plans = Self::check_control_nodes(&def.nodes, &graph)?;

    Ok(Self {
      workflow_id: def.workflow_id,
      name: def.name,
      timeout_ms: def.timeout_ms,
      max_retry_attempts: def.max_retry_attempts,
      retry_backoff: def.retry_backoff,
      retry_initial_delay_ms: def.retry_initial_delay_ms,
      nodes: def.nodes,
      index,
      graph,
      trigger_id,
      branch_plans,
    })
  }

  /// Exactly one trigger, and it must be the sole entry point.
  fn check_triggers(nodes: &[NodeDef], graph: &Graph) -> Result<String, GraphError> {
    let triggers: Vec<&NodeDef> = nodes
      .iter()
      .filter(|n| n.category == NodeCategory::Trigger)
      .collect();

    let trigger = match triggers.as_slice() {
      [] => return Err(GraphError::NoTrigger),
      [one] => *one,
      many => {
        return Err(GraphError::MultipleTriggers(
          many.iter().map(|n| n.node_id.clone()).collect(),
        ));
      }
    };

    if !graph.predecessors(&trigger.node_id).is_empty() {
      return Err(GraphError::TriggerNotEntry {
        node_id: trigger.node_id.clone(),
      });
    }

    for node in nodes {
      if node.category != NodeCategory::Trigger && graph.predecessors(&node.node_id).is_empty() {
        return Err(GraphError::OrphanNode {
          node_id: node.node_id.clone(),
        });
      }
    }

    Ok(trigger.node_id.clone())
  }

  fn check_control_nodes(
    nodes: &[NodeDef],
    graph: &Graph,
  ) -> Result<HashMap<String, BranchPlan>, GraphError> {
    let mut plans = HashMap::new();
    let mut claimed: HashSet<String> = HashSet::new();

    for node in nodes {
      match node.kind {
        NodeKind::Condition => {
          let config: ConditionConfig =
            serde_json::from_value(serde_json::Value::Object(node.config.clone())).map_err(
              |e| GraphError::InvalidControlConfig {
                node_id: node.node_id.clone(),
                message: e.to_string(),
              },
            )?;

          let successors = graph.successors(&node.node_id);
          if config.uses_skip_next() && successors.len() > 1 {
            return Err(GraphError::AmbiguousSkipTarget {
              node_id: node.node_id.clone(),
              count: successors.len(),
            });
          }
        }
        NodeKind::Parallel => {
          let config: ParallelConfig =
            serde_json::from_value(serde_json::Value::Object(node.config.clone())).map_err(
              |e| GraphError::InvalidControlConfig {
                node_id: node.node_id.clone(),
                message: e.to_string(),
              },
            )?;

          let plan = BranchPlan::build(graph, &node.node_id, &config)?;
          for member in &plan.interior {
            if !claimed.insert(member.clone()) {
              return Err(GraphError::AmbiguousBranch {
                node_id: node.node_id.clone(),
                message: format!("node '{member}' already belongs to another parallel node"),
              });
            }
          }
          plans.insert(node.node_id.clone(), plan);
        }
        _ => {}
      }
    }

    Ok(plans)
  }

  pub fn node(&self, node_id: &str) -> Option<&NodeDef> {
    self.index.get(node_id).map(|i| &self.nodes[*i])
  }

  /// Nodes in insertion order.
  pub fn nodes(&self) -> &[NodeDef] {
    &self.nodes
  }

  pub fn graph(&self) -> &Graph {
    &self.graph
  }

  pub fn trigger_id(&self) -> &str {
    &self.trigger_id
  }

  pub fn branch_plan(&self, node_id: &str) -> Option<&BranchPlan> {
    self.branch_plans.get(node_id)
  }

  /// Any valid topological order, deterministic across runs.
  pub fn topological_order(&self) -> Vec<String> {
    self.graph.topological_order()
  }
}
