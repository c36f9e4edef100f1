use thiserror::Error;

use flowline_resolver::ResolveError;
use flowline_store::{ExecutionStatus, StoreError};
use flowline_workflow::WorkflowError;

use crate::state::NodeState;

/// Errors surfaced by the engine to its callers.
///
/// Node failures are not here: they go through each node's error policy and
/// end up on the execution record.
#[derive(Debug, Error)]
pub enum EngineError {
  /// Graph failed to load or validate. Raised before a run is created.
  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error("store error: {0}")]
  Store(#[from] StoreError),

  #[error(transparent)]
  Workflow(#[from] WorkflowError),

  #[error("run not found: {run_id}")]
  RunNotFound { run_id: String },

  #[error("run {run_id} already finished as {status:?}")]
  AlreadyFinished {
    run_id: String,
    status: ExecutionStatus,
  },

  /// A node state change the state machine forbids.
  #[error("invalid transition for node '{node_id}': {from:?} -> {to:?}")]
  InvalidTransition {
    node_id: String,
    from: NodeState,
    to: NodeState,
  },

  #[error("checkpoint for run {run_id} is unusable")]
  Checkpoint {
    run_id: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("automation runner channel closed")]
  ChannelClosed,
}
