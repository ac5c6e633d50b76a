//! Branch partitioning for `parallel` nodes.
//!
//! The editor's parallel config declares branches by name only; which
//! nodes belong to which branch is structural. One branch exists per
//! direct successor edge, paired with the declared branch list by index.
//! A branch's members are the nodes reachable from its head and from no
//! other head. Nodes reachable from more than one head are convergence
//! points: they stay in the surrounding flow and must be reachable from
//! every head, otherwise the partition is ambiguous and validation
//! rejects the workflow.

use std::collections::HashSet;

use pricerun_config::ParallelConfig;

use crate::error::GraphError;
use crate::graph::Graph;

/// One resolved branch of a `parallel` node.
#[derive(Debug, Clone)]
pub struct BranchSpec {
  pub name: String,
  pub enabled: bool,
  pub priority: u32,
  /// The direct successor this branch starts at.
  pub head: String,
  /// All nodes executed by this branch, in node insertion order. The
  /// head is included; convergence points are not.
  pub members: Vec<String>,
}

/// The full partition for one `parallel` node.
#[derive(Debug, Clone)]
pub struct BranchPlan {
  pub branches: Vec<BranchSpec>,
  /// Union of all branch members. These nodes are scheduled by the
  /// branch coordinator, never by the surrounding frontier.
  pub interior: HashSet<String>,
}

impl BranchPlan {
  pub(crate) fn build(
    graph: &Graph,
    parallel_id: &str,
    config: &ParallelConfig,
  ) -> Result<Self, GraphError> {
    let heads = graph.successors(parallel_id);

    if config.branches.len() != heads.len() {
      return Err(GraphError::AmbiguousBranch {
        node_id: parallel_id.to_string(),
        message: format!(
          "{} branches declared but node has {} direct successors",
          config.branches.len(),
          heads.len()
        ),
      });
    }

    let reach: Vec<HashSet<String>> = heads.iter().map(|h| graph.reachable_from(h)).collect();

    // Nodes reachable from more than one head converge the branches.
    let mut shared: HashSet<&str> = HashSet::new();
    for (i, set) in reach.iter().enumerate() {
      for id in set {
        if reach
          .iter()
          .enumerate()
          .any(|(j, other)| j != i && other.contains(id))
        {
          shared.insert(id.as_str());
        }
      }
    }

    for (head, _) in heads.iter().zip(&reach) {
      if shared.contains(head.as_str()) {
        return Err(GraphError::AmbiguousBranch {
          node_id: parallel_id.to_string(),
          message: format!("branch head '{head}' is reachable from another branch"),
        });
      }
    }

    // A convergence point partially shared between some branches makes
    // membership ambiguous; it must join all of them.
    for id in &shared {
      if !reach.iter().all(|set| set.contains(*id)) {
        return Err(GraphError::AmbiguousBranch {
          node_id: parallel_id.to_string(),
          message: format!("node '{id}' converges some branches but not all"),
        });
      }
    }

    let mut branches = Vec::with_capacity(heads.len());
    let mut interior = HashSet::new();

    for (head, (def, set)) in heads.iter().zip(config.branches.iter().zip(&reach)) {
      let members: Vec<String> = graph
        .node_ids()
        .iter()
        .filter(|id| set.contains(*id) && !shared.contains(id.as_str()))
        .cloned()
        .collect();

      // Interior nodes may only be entered from inside their own branch
      // (or from the parallel node itself, for the head).
      for member in &members {
        for pred in graph.predecessors(member) {
          let ok = (pred.as_str() == parallel_id && member == head)
            || members.iter().any(|m| m == pred);
          if !ok {
            return Err(GraphError::AmbiguousBranch {
              node_id: parallel_id.to_string(),
              message: format!("node '{member}' is entered from '{pred}' outside its branch"),
            });
          }
        }
      }

      interior.extend(members.iter().cloned());
      branches.push(BranchSpec {
        name: def.name.clone(),
        enabled: def.enabled,
        priority: def.priority,
        head: head.clone(),
        members,
      });
    }

    Ok(Self { branches, interior })
  }
}
