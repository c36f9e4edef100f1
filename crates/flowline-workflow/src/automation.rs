use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;
use crate::graph::Graph;
use crate::node::{Connection, Node};

/// A validated automation ready for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Automation {
  pub automation_id: String,
  pub name: String,
  /// Nodes in authored order. Scheduling follows this order.
  pub nodes: Vec<Node>,
  pub connections: Vec<Connection>,
  pub trigger_id: String,
  /// Nodes with no path from the trigger. They never run.
  pub unreachable: Vec<String>,
}

impl Automation {
  /// Build the graph structure for traversal.
  pub fn graph(&self) -> Graph {
    Graph::new(&self.nodes, &self.connections)
  }

  /// Get a node by ID.
  pub fn get_node(&self, node_id: &str) -> Option<&Node> {
    self.nodes.iter().find(|n| n.node_id == node_id)
  }

  pub fn node(&self, node_id: &str) -> Result<&Node, WorkflowError> {
    self
      .get_node(node_id)
      .ok_or_else(|| WorkflowError::NodeNotFound(node_id.to_string()))
  }

  /// Outgoing connections of a node, in authored order.
  pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
    self.connections.iter().filter(move |c| c.source_id == node_id)
  }
}
