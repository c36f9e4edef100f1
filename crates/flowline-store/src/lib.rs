//! Flowline Store
//!
//! This crate provides the execution store: an append-only record of every
//! run for observability and idempotent re-entry.
//!
//! The [`Store`] trait defines operations for:
//! - Creating and finalizing executions (exactly one finalizing write)
//! - Appending per-node results
//! - Trigger dedup keys
//! - Suspensions and checkpoints of parked runs

mod error;
mod sqlite;
mod types;

pub use error::StoreError;
pub use sqlite::SqliteStore;
pub use sqlx::types::Json;
pub use types::{
  CreateOutcome, ExecutionRecord, ExecutionStatus, NodeResult, NodeStatus, Suspension,
  SuspensionKind,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Storage trait for executions.
#[async_trait]
pub trait Store: Send + Sync {
  /// Create a `running` execution. With a dedup key, creation is idempotent
  /// per `(automation_id, key)`: a repeat returns the existing execution id
  /// and writes nothing.
  async fn create_execution(
    &self,
    record: &ExecutionRecord,
    dedup_key: Option<&str>,
  ) -> Result<CreateOutcome, StoreError>;

  /// Get an execution with its per-node results.
  async fn get_execution(&self, execution_id: &str) -> Result<ExecutionRecord, StoreError>;

  /// Most recent executions of an automation, newest first.
  async fn list_executions(
    &self,
    automation_id: &str,
    limit: u32,
  ) -> Result<Vec<ExecutionRecord>, StoreError>;

  /// Move a running execution to a terminal status. Fails with
  /// `AlreadyFinalized` if it was finalized before.
  async fn finalize_execution(
    &self,
    execution_id: &str,
    status: ExecutionStatus,
    error_message: Option<&str>,
    completed_at: DateTime<Utc>,
  ) -> Result<ExecutionRecord, StoreError>;

  async fn append_node_result(&self, result: &NodeResult) -> Result<(), StoreError>;

  async fn list_node_results(&self, execution_id: &str) -> Result<Vec<NodeResult>, StoreError>;

  /// Insert or replace the suspension for `(execution_id, node_id)`.
  async fn save_suspension(&self, suspension: &Suspension) -> Result<(), StoreError>;

  /// Claim a suspension by deleting it. Only one caller gets `true`.
  async fn take_suspension(&self, execution_id: &str, node_id: &str) -> Result<bool, StoreError>;

  /// All suspensions, oldest first.
  async fn list_suspensions(&self) -> Result<Vec<Suspension>, StoreError>;

  async fn list_suspensions_for(&self, execution_id: &str) -> Result<Vec<Suspension>, StoreError>;

  /// Remove every suspension of an execution; returns how many.
  async fn delete_suspensions(&self, execution_id: &str) -> Result<u64, StoreError>;

  async fn save_checkpoint(
    &self,
    execution_id: &str,
    state: &serde_json::Value,
  ) -> Result<(), StoreError>;

  async fn load_checkpoint(
    &self,
    execution_id: &str,
  ) -> Result<Option<serde_json::Value>, StoreError>;

  async fn delete_checkpoint(&self, execution_id: &str) -> Result<(), StoreError>;
}
