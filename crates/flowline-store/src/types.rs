use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

/// Status of an execution (run).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ExecutionStatus {
  Running,
  Completed,
  Failed,
  Cancelled,
}

impl ExecutionStatus {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, ExecutionStatus::Running)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      ExecutionStatus::Running => "running",
      ExecutionStatus::Completed => "completed",
      ExecutionStatus::Failed => "failed",
      ExecutionStatus::Cancelled => "cancelled",
    }
  }
}

/// Terminal status of a node within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum NodeStatus {
  Succeeded,
  Failed,
  Skipped,
}

/// An execution as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ExecutionRecord {
  pub execution_id: String,
  pub automation_id: String,
  pub status: ExecutionStatus,
  pub trigger_type: String,
  pub trigger_data: Json<serde_json::Value>,
  pub started_at: DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
  pub error_message: Option<String>,
  pub execution_time_ms: Option<i64>,
  /// Loaded from `node_results`, in append order.
  #[sqlx(skip)]
  #[serde(default)]
  pub per_node_results: Vec<NodeResult>,
}

impl ExecutionRecord {
  /// A fresh `running` record.
  pub fn start(
    execution_id: impl Into<String>,
    automation_id: impl Into<String>,
    trigger_type: impl Into<String>,
    trigger_data: serde_json::Value,
    started_at: DateTime<Utc>,
  ) -> Self {
    Self {
      execution_id: execution_id.into(),
      automation_id: automation_id.into(),
      status: ExecutionStatus::Running,
      trigger_type: trigger_type.into(),
      trigger_data: Json(trigger_data),
      started_at,
      completed_at: None,
      error_message: None,
      execution_time_ms: None,
      per_node_results: Vec::new(),
    }
  }
}

/// One dispatch attempt's result (or a skip) for a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct NodeResult {
  pub result_id: String,
  pub execution_id: String,
  pub node_id: String,
  /// 1-based attempt; 0 for nodes that were never dispatched.
  pub attempt: i32,
  pub status: NodeStatus,
  pub output: Option<Json<serde_json::Value>>,
  pub error: Option<String>,
  pub started_at: DateTime<Utc>,
  pub completed_at: DateTime<Utc>,
}

/// What a suspended branch is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum SuspensionKind {
  Delay,
  Event,
  Condition,
  /// A timed-out wait parked until its next attempt.
  Retry,
}

/// A parked branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Suspension {
  pub execution_id: String,
  pub node_id: String,
  pub automation_id: String,
  pub kind: SuspensionKind,
  /// When a delay elapses or a retry is due.
  pub resume_at: Option<DateTime<Utc>>,
  /// Event a `wait_for_event` node awaits.
  pub event_name: Option<String>,
  /// Predicate a `wait_for_condition` node re-checks.
  pub predicate: Option<Json<serde_json::Value>>,
  /// When a wait gives up and the node fails.
  pub deadline: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
}

impl Suspension {
  /// Whether this suspension should be looked at by a poll at `now`.
  pub fn is_due(&self, now: DateTime<Utc>) -> bool {
    let elapsed = |t: Option<DateTime<Utc>>| t.is_some_and(|t| t <= now);
    match self.kind {
      SuspensionKind::Delay | SuspensionKind::Retry => elapsed(self.resume_at),
      SuspensionKind::Event => elapsed(self.deadline),
      SuspensionKind::Condition => true,
    }
  }
}

/// Result of creating an execution with a dedup key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
  Created,
  /// The key was already claimed by this execution.
  Duplicate { execution_id: String },
}
