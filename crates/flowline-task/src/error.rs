use thiserror::Error;

/// Errors that can occur during node execution.
#[derive(Debug, Error)]
pub enum TaskError {
  /// No handler registered for the node's subtype.
  #[error("unsupported node subtype: {subtype}")]
  UnsupportedNode { subtype: String },

  /// Missing (or empty after template resolution) required config field.
  #[error("missing required input: {field}")]
  MissingInput { field: String },

  /// Invalid config value.
  #[error("invalid input '{field}': {message}")]
  InvalidInput { field: String, message: String },

  /// Domain failure inside a handler.
  #[error("{message}")]
  Handler { message: String },

  /// HTTP request failed.
  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  /// Handler or wait exceeded its configured duration.
  #[error("timed out after {timeout_ms}ms")]
  Timeout { timeout_ms: u64 },

  /// Handler observed the run's cancellation token.
  #[error("cancelled")]
  Cancelled,
}

impl TaskError {
  pub fn handler(message: impl Into<String>) -> Self {
    TaskError::Handler {
      message: message.into(),
    }
  }

  /// Whether re-dispatching could plausibly succeed. Config errors and
  /// unknown subtypes fail the same way every time.
  pub fn is_retryable(&self) -> bool {
    !matches!(
      self,
      TaskError::UnsupportedNode { .. }
        | TaskError::MissingInput { .. }
        | TaskError::InvalidInput { .. }
        | TaskError::Cancelled
    )
  }
}
