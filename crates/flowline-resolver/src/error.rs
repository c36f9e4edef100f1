use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading an automation graph.
#[derive(Debug, Error)]
pub enum ResolveError {
  /// No automation with this id exists.
  #[error("automation not found: {automation_id}")]
  NotFound { automation_id: String },

  /// Graph has no trigger node.
  #[error("automation has no trigger node")]
  NoTrigger,

  /// Graph has more than one trigger node.
  #[error("automation has multiple trigger nodes: {node_ids:?}")]
  MultipleTriggers { node_ids: Vec<String> },

  /// Duplicate node ID.
  #[error("duplicate node id: {node_id}")]
  DuplicateNodeId { node_id: String },

  /// Node id that placeholders could not address.
  #[error("node id '{node_id}' is not addressable: {reason}")]
  UnaddressableNodeId {
    node_id: String,
    reason: &'static str,
  },

  /// Connection endpoint references a node that doesn't exist.
  #[error("connection '{connection_id}' references unknown node '{node_id}'")]
  DanglingConnection {
    connection_id: String,
    node_id: String,
  },

  /// An `if`/`unless` connection has no predicate.
  #[error("connection '{connection_id}' is conditional but has no conditionConfig")]
  MissingConditionConfig { connection_id: String },

  /// `onError: fallback` without a `fallbackNodeId`.
  #[error("node '{node_id}' uses fallback error policy without a fallbackNodeId")]
  MissingFallbackNode { node_id: String },

  /// `fallbackNodeId` points at a node that doesn't exist.
  #[error("node '{node_id}' names unknown fallback node '{fallback_node_id}'")]
  UnknownFallbackNode {
    node_id: String,
    fallback_node_id: String,
  },

  /// Cycle detected in the automation graph.
  #[error("cycle detected in automation graph at node '{node_id}'")]
  CycleDetected { node_id: String },

  /// Failed to read a definition.
  #[error("failed to read definition {path}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// Failed to parse a definition.
  #[error("failed to parse definition {path}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

impl ResolveError {
  /// True for errors caused by a malformed graph, as opposed to a missing or
  /// unreadable definition.
  pub fn is_validation(&self) -> bool {
    matches!(
      self,
      ResolveError::NoTrigger
        | ResolveError::MultipleTriggers { .. }
        | ResolveError::DuplicateNodeId { .. }
        | ResolveError::UnaddressableNodeId { .. }
        | ResolveError::DanglingConnection { .. }
        | ResolveError::MissingConditionConfig { .. }
        | ResolveError::MissingFallbackNode { .. }
        | ResolveError::UnknownFallbackNode { .. }
        | ResolveError::CycleDetected { .. }
    )
  }
}
