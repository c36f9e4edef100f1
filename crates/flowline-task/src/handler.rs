use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::TaskError;
use crate::types::{TaskContext, TaskOutcome};

/// Contract every node subtype implements.
///
/// Handlers must be safe to re-run under retry, or return `false` from
/// [`NodeHandler::retryable`].
#[async_trait]
pub trait NodeHandler: Send + Sync {
  /// Execute with the node's config. String leaves have already been
  /// template-resolved unless [`NodeHandler::resolve_templates`] is `false`.
  async fn execute(
    &self,
    config: &Map<String, Value>,
    ctx: &TaskContext,
  ) -> Result<TaskOutcome, TaskError>;

  fn retryable(&self) -> bool {
    true
  }

  /// Only delay and wait handlers may return [`TaskOutcome::Suspend`].
  fn may_suspend(&self) -> bool {
    false
  }

  /// Handlers that evaluate predicates resolve operands themselves.
  fn resolve_templates(&self) -> bool {
    true
  }
}

/// Deserialize a node config into a handler's typed config.
pub(crate) fn parse_config<T: DeserializeOwned>(config: &Map<String, Value>) -> Result<T, TaskError> {
  serde_json::from_value(Value::Object(config.clone())).map_err(|e| TaskError::InvalidInput {
    field: "config".to_string(),
    message: e.to_string(),
  })
}

/// Reject a required string field that is absent or empty.
pub(crate) fn require(field: &str, value: Option<String>) -> Result<String, TaskError> {
  match value {
    Some(v) if !v.trim().is_empty() => Ok(v),
    _ => Err(TaskError::MissingInput {
      field: field.to_string(),
    }),
  }
}
