use std::collections::{HashMap, HashSet, VecDeque};

use crate::node::{Connection, Node};

/// Graph structure for traversal and analysis.
#[derive(Debug, Clone)]
pub struct Graph {
  /// Node ids in authored order.
  order: Vec<String>,
  /// Adjacency list: node_id -> list of downstream node_ids.
  adjacency: HashMap<String, Vec<String>>,
}

impl Graph {
  /// Build a graph from nodes and connections.
  ///
  /// Fallback references (`errorPolicy.fallbackNodeId`) count as edges: a
  /// fallback target is reachable through the node that names it.
  pub fn new(nodes: &[Node], connections: &[Connection]) -> Self {
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    for node in nodes {
      adjacency.entry(node.node_id.clone()).or_default();
    }

    let fallback_edges = nodes.iter().filter_map(|n| {
      n.error_policy
        .fallback_node_id
        .as_ref()
        .map(|f| (n.node_id.clone(), f.clone()))
    });
    let edges = connections
      .iter()
      .map(|c| (c.source_id.clone(), c.target_id.clone()))
      .chain(fallback_edges);

    for (from, to) in edges {
      adjacency.entry(from).or_default().push(to);
    }

    Self {
      order: nodes.iter().map(|n| n.node_id.clone()).collect(),
      adjacency,
    }
  }

  /// Get downstream nodes for a given node.
  pub fn downstream(&self, node_id: &str) -> &[String] {
    self
      .adjacency
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// All nodes reachable from `start`, including `start` itself.
  pub fn reachable_from(&self, start: &str) -> HashSet<String> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([start.to_string()]);

    while let Some(id) = queue.pop_front() {
      if !seen.insert(id.clone()) {
        continue;
      }
      for next in self.downstream(&id) {
        if !seen.contains(next) {
          queue.push_back(next.clone());
        }
      }
    }

    seen
  }

  /// Find a node that participates in a cycle, if any.
  ///
  /// Kahn's algorithm: repeatedly remove nodes with no remaining incoming
  /// edges. Whatever is left sits on a cycle or downstream of one; the first
  /// such node in authored order that lies on a cycle is returned.
  pub fn find_cycle(&self) -> Option<String> {
    let mut in_degree: HashMap<&str, usize> =
      self.adjacency.keys().map(|id| (id.as_str(), 0)).collect();
    for targets in self.adjacency.values() {
      for target in targets {
        *in_degree.entry(target.as_str()).or_default() += 1;
      }
    }

    let mut queue: VecDeque<&str> = in_degree
      .iter()
      .filter(|(_, degree)| **degree == 0)
      .map(|(id, _)| *id)
      .collect();

    while let Some(id) = queue.pop_front() {
      for target in self.downstream(id) {
        if let Some(degree) = in_degree.get_mut(target.as_str()) {
          *degree -= 1;
          if *degree == 0 {
            queue.push_back(target.as_str());
          }
        }
      }
    }

    let remaining: HashSet<&str> = in_degree
      .into_iter()
      .filter(|(_, degree)| *degree > 0)
      .map(|(id, _)| id)
      .collect();
    if remaining.is_empty() {
      return None;
    }

    // Nodes only downstream of a cycle are left over too; report one that
    // can reach itself.
    self
      .order
      .iter()
      .filter(|id| remaining.contains(id.as_str()))
      .find(|id| {
        self
          .downstream(id)
          .iter()
          .any(|next| self.reachable_from(next).contains(id.as_str()))
      })
      .or_else(|| self.order.iter().find(|id| remaining.contains(id.as_str())))
      .cloned()
  }
}
