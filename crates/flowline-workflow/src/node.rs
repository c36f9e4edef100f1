use flowline_config::{ErrorPolicyDef, NodeKind};
use serde::{Deserialize, Serialize};

/// A validated node in a locked automation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
  pub node_id: String,
  pub kind: NodeKind,
  pub subtype: String,
  pub config: serde_json::Map<String, serde_json::Value>,
  pub enabled: bool,
  pub error_policy: ErrorPolicyDef,
  pub timeout_ms: Option<u64>,
}

impl Node {
  pub fn is_trigger(&self) -> bool {
    self.kind == NodeKind::Trigger
  }
}

/// Gate on a connection. `If`/`Unless` carry the raw predicate spec; it is
/// parsed at evaluation time so a malformed predicate fails closed instead of
/// rejecting the whole graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "predicate", rename_all = "snake_case")]
pub enum EdgeCondition {
  Always,
  If(serde_json::Value),
  Unless(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
  pub connection_id: String,
  pub source_id: String,
  pub target_id: String,
  pub condition: EdgeCondition,
}
