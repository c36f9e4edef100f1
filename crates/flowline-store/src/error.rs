use crate::types::ExecutionStatus;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A second finalizing write for the same execution.
  #[error("execution {execution_id} already finalized as {status:?}")]
  AlreadyFinalized {
    execution_id: String,
    status: ExecutionStatus,
  },

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("migration failed: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),
}
