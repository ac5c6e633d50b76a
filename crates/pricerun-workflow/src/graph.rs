use std::collections::{HashMap, HashSet};

use pricerun_config::Edge;

/// Graph structure for traversal and analysis. Node and edge insertion
/// order is preserved so traversal order is deterministic.
#[derive(Debug, Clone)]
pub struct Graph {
  /// Node ids in insertion order.
  order: Vec<String>,
  /// node_id -> downstream node ids, in edge insertion order.
  adjacency: HashMap<String, Vec<String>>,
  /// node_id -> upstream node ids, in edge insertion order.
  reverse: HashMap<String, Vec<String>>,
}

impl Graph {
  /// Build a graph from an ordered node id list and edges. Edge
  /// endpoints are assumed to be valid node ids; `Workflow::validate`
  /// checks that before constructing the graph.
  pub fn new(order: Vec<String>, edges: &[Edge]) -> Self {
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut reverse: HashMap<String, Vec<String>> = HashMap::new();

    for node_id in &order {
      adjacency.entry(node_id.clone()).or_default();
      reverse.entry(node_id.clone()).or_default();
    }

    for edge in edges {
      adjacency
        .entry(edge.from.clone())
        .or_default()
        .push(edge.to.clone());
      reverse
        .entry(edge.to.clone())
        .or_default()
        .push(edge.from.clone());
    }

    Self {
      order,
      adjacency,
      reverse,
    }
  }

  /// Node ids in insertion order.
  pub fn node_ids(&self) -> &[String] {
    &self.order
  }

  pub fn successors(&self, node_id: &str) -> &[String] {
    self
      .adjacency
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  pub fn predecessors(&self, node_id: &str) -> &[String] {
    self
      .reverse
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Nodes with no incoming edges, in insertion order.
  pub fn entry_points(&self) -> Vec<&str> {
    self
      .order
      .iter()
      .filter(|id| self.predecessors(id).is_empty())
      .map(|id| id.as_str())
      .collect()
  }

  /// Kahn's algorithm; among simultaneously-ready nodes the one inserted
  /// first is emitted first, so the order is deterministic. Assumes the
  /// graph is acyclic (checked by `detect_cycle` during validation).
  pub fn topological_order(&self) -> Vec<String> {
    let index: HashMap<&str, usize> = self
      .order
      .iter()
      .enumerate()
      .map(|(i, id)| (id.as_str(), i))
      .collect();

    let mut indegree: HashMap<&str, usize> = self
      .order
      .iter()
      .map(|id| (id.as_str(), self.predecessors(id).len()))
      .collect();

    let mut ready: std::collections::BTreeSet<usize> = indegree
      .iter()
      .filter(|(_, d)| **d == 0)
      .map(|(id, _)| index[id])
      .collect();

    let mut sorted = Vec::with_capacity(self.order.len());
    while let Some(i) = ready.pop_first() {
      let id = &self.order[i];
      sorted.push(id.clone());
      for next in self.successors(id) {
        if let Some(d) = indegree.get_mut(next.as_str()) {
          *d -= 1;
          if *d == 0 {
            if let Some(&i) = index.get(next.as_str()) {
              ready.insert(i);
            }
          }
        }
      }
    }
    sorted
  }

  /// Cycle detection via DFS coloring. Returns the node ids forming the
  /// first cycle found, in traversal order.
  pub fn detect_cycle(&self) -> Option<Vec<String>> {
    // 0 = unvisited, 1 = on the current path, 2 = done
    let mut color: HashMap<&str, u8> = self.order.iter().map(|id| (id.as_str(), 0u8)).collect();

    fn dfs<'a>(
      graph: &'a Graph,
      node: &'a str,
      color: &mut HashMap<&'a str, u8>,
      path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
      color.insert(node, 1);
      path.push(node);

      for next in graph.successors(node) {
        match color.get(next.as_str()) {
          Some(1) => {
            // Back edge: the cycle is the path suffix starting at `next`.
            let start = path.iter().position(|id| *id == next.as_str()).unwrap_or(0);
            return Some(path[start..].iter().map(|id| id.to_string()).collect());
          }
          Some(0) => {
            if let Some(cycle) = dfs(graph, next.as_str(), color, path) {
              return Some(cycle);
            }
          }
          _ => {}
        }
      }

      path.pop();
      color.insert(node, 2);
      None
    }

    let mut path = Vec::new();
    for node_id in &self.order {
      if color.get(node_id.as_str()) == Some(&0) {
        if let Some(cycle) = dfs(self, node_id.as_str(), &mut color, &mut path) {
          return Some(cycle);
        }
      }
    }
    None
  }

  /// All nodes reachable from `node_id`, including itself.
  pub fn reachable_from(&self, node_id: &str) -> HashSet<String> {
    let mut seen = HashSet::new();
    let mut stack = vec![node_id.to_string()];
    while let Some(id) = stack.pop() {
      if seen.insert(id.clone()) {
        for next in self.successors(&id) {
          if !seen.contains(next) {
            stack.push(next.clone());
          }
        }
      }
    }
    seen
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn edge(from: &str, to: &str) -> Edge {
    Edge::new(from, to)
  }

  fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn topological_order_breaks_ties_by_insertion_order() {
    // a fans out to c and b; both are ready at the same time.
    let graph = Graph::new(
      ids(&["a", "c", "b", "d"]),
      &[edge("a", "c"), edge("a", "b"), edge("c", "d"), edge("b", "d")],
    );

    assert_eq!(graph.topological_order(), ids(&["a", "c", "b", "d"]));
  }

  #[test]
  fn detect_cycle_reports_cycle_members() {
    let graph = Graph::new(
      ids(&["a", "b", "c"]),
      &[edge("a", "b"), edge("b", "c"), edge("c", "b")],
    );

    let cycle = graph.detect_cycle().unwrap();
    assert_eq!(cycle, ids(&["b", "c"]));
  }

  #[test]
  fn acyclic_graph_has_no_cycle() {
    let graph = Graph::new(ids(&["a", "b"]), &[edge("a", "b")]);
    assert!(graph.detect_cycle().is_none());
  }

  #[test]
  fn reachability_and_neighbors() {
    let graph = Graph::new(
      ids(&["t", "a", "b", "c"]),
      &[edge("t", "a"), edge("a", "b"), edge("a", "c")],
    );

    assert_eq!(graph.successors("a"), &ids(&["b", "c"])[..]);
    assert_eq!(graph.predecessors("b"), &ids(&["a"])[..]);
    assert_eq!(graph.entry_points(), vec!["t"]);

    let reach = graph.reachable_from("a");
    assert!(reach.contains("a") && reach.contains("b") && reach.contains("c"));
    assert!(!reach.contains("t"));
  }
}
