use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::types::Json;

use crate::error::StoreError;
use crate::types::{CreateOutcome, ExecutionRecord, ExecutionStatus, NodeResult, Suspension};
use crate::Store;

/// SQLite-based store implementation.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if missing) a database at `url`, e.g.
  /// `sqlite:///home/me/.flowline/flowline.db`.
  pub async fn connect(url: &str) -> Result<Self, StoreError> {
    let options = SqliteConnectOptions::from_str(url)?
      .create_if_missing(true)
      .journal_mode(SqliteJournalMode::Wal)
      .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    Ok(Self::new(pool))
  }

  /// A migrated in-memory database. The pool holds a single connection that
  /// never expires, since each SQLite memory connection is its own database.
  pub async fn in_memory() -> Result<Self, StoreError> {
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .idle_timeout(None)
      .max_lifetime(None)
      .connect("sqlite::memory:")
      .await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), StoreError> {
    sqlx::migrate!("../../migrations").run(&self.pool).await?;
    Ok(())
  }

  async fn fetch_execution(&self, execution_id: &str) -> Result<ExecutionRecord, StoreError> {
    sqlx::query_as(
      r#"
      SELECT execution_id, automation_id, status, trigger_type, trigger_data,
             started_at, completed_at, error_message, execution_time_ms
      FROM executions
      WHERE execution_id = ?
      "#,
    )
    .bind(execution_id)
    .fetch_optional(&self.pool)
    .await?
    .ok_or_else(|| StoreError::NotFound(format!("execution {}", execution_id)))
  }
}

#[async_trait]
impl Store for SqliteStore {
  async fn create_execution(
    &self,
    record: &ExecutionRecord,
    dedup_key: Option<&str>,
  ) -> Result<CreateOutcome, StoreError> {
    let mut tx = self.pool.begin().await?;

    if let Some(key) = dedup_key {
      let claimed = sqlx::query(
        r#"
        INSERT OR IGNORE INTO trigger_dedup (automation_id, event_key, execution_id)
        VALUES (?, ?, ?)
        "#,
      )
      .bind(&record.automation_id)
      .bind(key)
      .bind(&record.execution_id)
      .execute(&mut *tx)
      .await?
      .rows_affected();

      if claimed == 0 {
        let execution_id: String = sqlx::query_scalar(
          "SELECT execution_id FROM trigger_dedup WHERE automation_id = ? AND event_key = ?",
        )
        .bind(&record.automation_id)
        .bind(key)
        .fetch_one(&mut *tx)
        .await?;
        tx.rollback().await?;
        return Ok(CreateOutcome::Duplicate { execution_id });
      }
    }

    sqlx::query(
      r#"
      INSERT INTO executions (execution_id, automation_id, status, trigger_type, trigger_data,
                              started_at, completed_at, error_message, execution_time_ms)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(&record.execution_id)
    .bind(&record.automation_id)
    .bind(record.status)
    .bind(&record.trigger_type)
    .bind(&record.trigger_data)
    .bind(record.started_at)
    .bind(record.completed_at)
    .bind(&record.error_message)
    .bind(record.execution_time_ms)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(CreateOutcome::Created)
  }

  async fn get_execution(&self, execution_id: &str) -> Result<ExecutionRecord, StoreError> {
    let mut record = self.fetch_execution(execution_id).await?;
    record.per_node_results = self.list_node_results(execution_id).await?;
    Ok(record)
  }

  async fn list_executions(
    &self,
    automation_id: &str,
    limit: u32,
  ) -> Result<Vec<ExecutionRecord>, StoreError> {
    let mut records: Vec<ExecutionRecord> = sqlx::query_as(
      r#"
      SELECT execution_id, automation_id, status, trigger_type, trigger_data,
             started_at, completed_at, error_message, execution_time_ms
      FROM executions
      WHERE automation_id = ?
      ORDER BY started_at DESC, rowid DESC
      LIMIT ?
      "#,
    )
    .bind(automation_id)
    .bind(i64::from(limit))
    .fetch_all(&self.pool)
    .await?;

    for record in &mut records {
      record.per_node_results = self.list_node_results(&record.execution_id).await?;
    }

    Ok(records)
  }

  async fn finalize_execution(
    &self,
    execution_id: &str,
    status: ExecutionStatus,
    error_message: Option<&str>,
    completed_at: DateTime<Utc>,
  ) -> Result<ExecutionRecord, StoreError> {
    let current = self.fetch_execution(execution_id).await?;
    if current.status.is_terminal() {
      return Err(StoreError::AlreadyFinalized {
        execution_id: execution_id.to_string(),
        status: current.status,
      });
    }

    let elapsed_ms = (completed_at - current.started_at).num_milliseconds().max(0);

    // Guarded on 'running' so only one finalizing write can land
    let updated = sqlx::query(
      r#"
      UPDATE executions
      SET status = ?, completed_at = ?, error_message = ?, execution_time_ms = ?
      WHERE execution_id = ? AND status = 'running'
      "#,
    )
    .bind(status)
    .bind(completed_at)
    .bind(error_message)
    .bind(elapsed_ms)
    .bind(execution_id)
    .execute(&self.pool)
    .await?
    .rows_affected();

    if updated == 0 {
      let now = self.fetch_execution(execution_id).await?;
      return Err(StoreError::AlreadyFinalized {
        execution_id: execution_id.to_string(),
        status: now.status,
      });
    }

    self.get_execution(execution_id).await
  }

  async fn append_node_result(&self, result: &NodeResult) -> Result<(), StoreError> {
    sqlx::query(
      r#"
      INSERT INTO node_results (result_id, execution_id, node_id, attempt, status, output, error,
                                started_at, completed_at)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(&result.result_id)
    .bind(&result.execution_id)
    .bind(&result.node_id)
    .bind(result.attempt)
    .bind(result.status)
    .bind(&result.output)
    .bind(&result.error)
    .bind(result.started_at)
    .bind(result.completed_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn list_node_results(&self, execution_id: &str) -> Result<Vec<NodeResult>, StoreError> {
    let results = sqlx::query_as(
      r#"
      SELECT result_id, execution_id, node_id, attempt, status, output, error,
             started_at, completed_at
      FROM node_results
      WHERE execution_id = ?
      ORDER BY rowid ASC
      "#,
    )
    .bind(execution_id)
    .fetch_all(&self.pool)
    .await?;

    Ok(results)
  }

  async fn save_suspension(&self, suspension: &Suspension) -> Result<(), StoreError> {
    sqlx::query(
      r#"
      INSERT OR REPLACE INTO suspensions (execution_id, node_id, automation_id, kind, resume_at,
                                          event_name, predicate, deadline, created_at)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(&suspension.execution_id)
    .bind(&suspension.node_id)
    .bind(&suspension.automation_id)
    .bind(suspension.kind)
    .bind(suspension.resume_at)
    .bind(&suspension.event_name)
    .bind(&suspension.predicate)
    .bind(suspension.deadline)
    .bind(suspension.created_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn take_suspension(&self, execution_id: &str, node_id: &str) -> Result<bool, StoreError> {
    let deleted = sqlx::query("DELETE FROM suspensions WHERE execution_id = ? AND node_id = ?")
      .bind(execution_id)
      .bind(node_id)
      .execute(&self.pool)
      .await?
      .rows_affected();

    Ok(deleted == 1)
  }

  async fn list_suspensions(&self) -> Result<Vec<Suspension>, StoreError> {
    let suspensions = sqlx::query_as(
      r#"
      SELECT execution_id, node_id, automation_id, kind, resume_at, event_name, predicate,
             deadline, created_at
      FROM suspensions
      ORDER BY created_at ASC, rowid ASC
      "#,
    )
    .fetch_all(&self.pool)
    .await?;

    Ok(suspensions)
  }

  async fn list_suspensions_for(&self, execution_id: &str) -> Result<Vec<Suspension>, StoreError> {
    let suspensions = sqlx::query_as(
      r#"
      SELECT execution_id, node_id, automation_id, kind, resume_at, event_name, predicate,
             deadline, created_at
      FROM suspensions
      WHERE execution_id = ?
      ORDER BY created_at ASC, rowid ASC
      "#,
    )
    .bind(execution_id)
    .fetch_all(&self.pool)
    .await?;

    Ok(suspensions)
  }

  async fn delete_suspensions(&self, execution_id: &str) -> Result<u64, StoreError> {
    let deleted = sqlx::query("DELETE FROM suspensions WHERE execution_id = ?")
      .bind(execution_id)
      .execute(&self.pool)
      .await?
      .rows_affected();

    Ok(deleted)
  }

  async fn save_checkpoint(
    &self,
    execution_id: &str,
    state: &serde_json::Value,
  ) -> Result<(), StoreError> {
    sqlx::query(
      r#"
      INSERT INTO run_checkpoints (execution_id, state, updated_at)
      VALUES (?, ?, ?)
      ON CONFLICT (execution_id) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at
      "#,
    )
    .bind(execution_id)
    .bind(Json(state))
    .bind(Utc::now())
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn load_checkpoint(
    &self,
    execution_id: &str,
  ) -> Result<Option<serde_json::Value>, StoreError> {
    let state: Option<Json<serde_json::Value>> =
      sqlx::query_scalar("SELECT state FROM run_checkpoints WHERE execution_id = ?")
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await?;

    Ok(state.map(|s| s.0))
  }

  async fn delete_checkpoint(&self, execution_id: &str) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM run_checkpoints WHERE execution_id = ?")
      .bind(execution_id)
      .execute(&self.pool)
      .await?;

    Ok(())
  }
}
