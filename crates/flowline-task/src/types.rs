use std::sync::Arc;
use std::time::Duration;

use flowline_context::RunContext;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

/// Context provided to a handler during execution.
#[derive(Debug, Clone)]
pub struct TaskContext {
  /// Run (execution) ID.
  pub run_id: String,

  /// Node ID within the automation.
  pub node_id: String,

  /// 1-based dispatch attempt.
  pub attempt: u32,

  /// Snapshot of the run context at dispatch time.
  pub run: Arc<RunContext>,

  /// Cancelled when the run is cancelled. Handlers may honour it.
  pub cancel: CancellationToken,
}

impl TaskContext {
  pub fn new(run_id: impl Into<String>, node_id: impl Into<String>, run: Arc<RunContext>) -> Self {
    Self {
      run_id: run_id.into(),
      node_id: node_id.into(),
      attempt: 1,
      run,
      cancel: CancellationToken::new(),
    }
  }

  pub fn with_attempt(mut self, attempt: u32) -> Self {
    self.attempt = attempt;
    self
  }

  pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
    self.cancel = cancel;
    self
  }
}

/// Output produced by a completed handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOutput {
  pub output: Map<String, Value>,

  /// Stop the branch here: outgoing connections are not evaluated.
  pub halt_branch: bool,
}

impl TaskOutput {
  pub fn new(output: Map<String, Value>) -> Self {
    Self {
      output,
      halt_branch: false,
    }
  }

  /// Build from a JSON value. Non-object values are wrapped as `{"value": ..}`.
  pub fn from_value(value: Value) -> Self {
    match value {
      Value::Object(map) => Self::new(map),
      other => {
        let mut map = Map::new();
        map.insert("value".to_string(), other);
        Self::new(map)
      }
    }
  }

  pub fn halted(mut self) -> Self {
    self.halt_branch = true;
    self
  }
}

/// What a handler asks the scheduler to do with its branch.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
  Completed(TaskOutput),
  Suspend(SuspendRequest),
}

/// A request to park the branch until something happens. Only delay and
/// wait handlers produce these.
#[derive(Debug, Clone, PartialEq)]
pub enum SuspendRequest {
  /// Resume after a fixed duration.
  Delay { duration: Duration },

  /// Resume when a named event is delivered; fail after `timeout`.
  Event {
    event_name: String,
    timeout: Option<Duration>,
  },

  /// Resume once the predicate holds, re-checked on every poll; fail after
  /// `timeout`.
  Condition {
    predicate: Value,
    timeout: Option<Duration>,
  },
}
