use chrono::{Duration, TimeZone, Utc};
use flowline_store::{
  CreateOutcome, ExecutionRecord, ExecutionStatus, NodeResult, NodeStatus, SqliteStore, Store,
  StoreError, Suspension, SuspensionKind,
};
use serde_json::json;
use sqlx::types::Json;

fn record(id: &str, automation: &str, minute: u32) -> ExecutionRecord {
  ExecutionRecord::start(
    id,
    automation,
    "webhook",
    json!({ "email": "a@b.com" }),
    Utc.with_ymd_and_hms(2025, 1, 1, 12, minute, 0).unwrap(),
  )
}

fn result(execution_id: &str, node_id: &str, attempt: i32, status: NodeStatus) -> NodeResult {
  let at = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 1).unwrap();
  NodeResult {
    result_id: format!("{}-{}-{}", execution_id, node_id, attempt),
    execution_id: execution_id.to_string(),
    node_id: node_id.to_string(),
    attempt,
    status,
    output: Some(Json(json!({ "ok": status == NodeStatus::Succeeded }))),
    error: (status == NodeStatus::Failed).then(|| "boom".to_string()),
    started_at: at,
    completed_at: at,
  }
}

#[tokio::test]
async fn test_create_get_and_finalize_once() {
  let store = SqliteStore::in_memory().await.unwrap();
  let run = record("run-1", "auto", 0);

  assert_eq!(
    store.create_execution(&run, None).await.unwrap(),
    CreateOutcome::Created
  );

  let loaded = store.get_execution("run-1").await.unwrap();
  assert_eq!(loaded.status, ExecutionStatus::Running);
  assert_eq!(loaded.completed_at, None);
  assert_eq!(loaded.trigger_data.0, json!({ "email": "a@b.com" }));

  let done_at = run.started_at + Duration::milliseconds(1_500);
  let finalized = store
    .finalize_execution("run-1", ExecutionStatus::Failed, Some("node x failed"), done_at)
    .await
    .unwrap();
  assert_eq!(finalized.status, ExecutionStatus::Failed);
  assert_eq!(finalized.execution_time_ms, Some(1_500));
  assert_eq!(finalized.error_message.as_deref(), Some("node x failed"));

  let again = store
    .finalize_execution("run-1", ExecutionStatus::Completed, None, done_at)
    .await
    .unwrap_err();
  assert!(matches!(
    again,
    StoreError::AlreadyFinalized {
      status: ExecutionStatus::Failed,
      ..
    }
  ));
}

#[tokio::test]
async fn test_missing_execution() {
  let store = SqliteStore::in_memory().await.unwrap();
  assert!(matches!(
    store.get_execution("nope").await.unwrap_err(),
    StoreError::NotFound(_)
  ));
}

#[tokio::test]
async fn test_node_results_are_run_scoped_and_ordered() {
  let store = SqliteStore::in_memory().await.unwrap();
  store.create_execution(&record("a", "auto", 0), None).await.unwrap();
  store.create_execution(&record("b", "auto", 1), None).await.unwrap();

  store
    .append_node_result(&result("a", "call", 1, NodeStatus::Failed))
    .await
    .unwrap();
  store
    .append_node_result(&result("b", "call", 1, NodeStatus::Succeeded))
    .await
    .unwrap();
  store
    .append_node_result(&result("a", "call", 2, NodeStatus::Failed))
    .await
    .unwrap();
  store
    .append_node_result(&result("a", "tag", 0, NodeStatus::Skipped))
    .await
    .unwrap();

  let a = store.get_execution("a").await.unwrap();
  let attempts: Vec<(String, i32)> = a
    .per_node_results
    .iter()
    .map(|r| (r.node_id.clone(), r.attempt))
    .collect();
  assert_eq!(
    attempts,
    vec![
      ("call".to_string(), 1),
      ("call".to_string(), 2),
      ("tag".to_string(), 0)
    ]
  );

  let b = store.get_execution("b").await.unwrap();
  assert_eq!(b.per_node_results.len(), 1);
}

#[tokio::test]
async fn test_list_executions_newest_first_with_limit() {
  let store = SqliteStore::in_memory().await.unwrap();
  for (i, id) in ["r0", "r1", "r2"].iter().enumerate() {
    store
      .create_execution(&record(id, "auto", i as u32), None)
      .await
      .unwrap();
  }
  store
    .create_execution(&record("other", "elsewhere", 9), None)
    .await
    .unwrap();

  let listed = store.list_executions("auto", 2).await.unwrap();
  let ids: Vec<&str> = listed.iter().map(|r| r.execution_id.as_str()).collect();
  assert_eq!(ids, vec!["r2", "r1"]);
}

#[tokio::test]
async fn test_dedup_key_returns_existing_execution() {
  let store = SqliteStore::in_memory().await.unwrap();

  let first = store
    .create_execution(&record("run-1", "auto", 0), Some("evt-42"))
    .await
    .unwrap();
  let second = store
    .create_execution(&record("run-2", "auto", 1), Some("evt-42"))
    .await
    .unwrap();
  let other_automation = store
    .create_execution(&record("run-3", "other", 2), Some("evt-42"))
    .await
    .unwrap();

  assert_eq!(first, CreateOutcome::Created);
  assert_eq!(
    second,
    CreateOutcome::Duplicate {
      execution_id: "run-1".to_string()
    }
  );
  assert_eq!(other_automation, CreateOutcome::Created);
  assert!(matches!(
    store.get_execution("run-2").await.unwrap_err(),
    StoreError::NotFound(_)
  ));
}

#[tokio::test]
async fn test_suspensions_claimed_once() {
  let store = SqliteStore::in_memory().await.unwrap();
  store.create_execution(&record("run-1", "auto", 0), None).await.unwrap();

  let now = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
  let suspension = Suspension {
    execution_id: "run-1".to_string(),
    node_id: "wait".to_string(),
    automation_id: "auto".to_string(),
    kind: SuspensionKind::Delay,
    resume_at: Some(now + Duration::minutes(5)),
    event_name: None,
    predicate: None,
    deadline: None,
    created_at: now,
  };
  store.save_suspension(&suspension).await.unwrap();

  let listed = store.list_suspensions().await.unwrap();
  assert_eq!(listed, vec![suspension.clone()]);
  assert!(!listed[0].is_due(now));
  assert!(listed[0].is_due(now + Duration::minutes(5)));

  assert!(store.take_suspension("run-1", "wait").await.unwrap());
  assert!(!store.take_suspension("run-1", "wait").await.unwrap());
  assert!(store.list_suspensions_for("run-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_retry_suspension_replaces_wait() {
  let store = SqliteStore::in_memory().await.unwrap();
  store.create_execution(&record("run-1", "auto", 0), None).await.unwrap();

  let now = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
  let wait = Suspension {
    execution_id: "run-1".to_string(),
    node_id: "wait".to_string(),
    automation_id: "auto".to_string(),
    kind: SuspensionKind::Event,
    resume_at: None,
    event_name: Some("paid".to_string()),
    predicate: None,
    deadline: Some(now + Duration::hours(1)),
    created_at: now,
  };
  store.save_suspension(&wait).await.unwrap();

  let retry = Suspension {
    kind: SuspensionKind::Retry,
    resume_at: Some(now + Duration::seconds(30)),
    event_name: None,
    deadline: None,
    ..wait
  };
  store.save_suspension(&retry).await.unwrap();

  let listed = store.list_suspensions_for("run-1").await.unwrap();
  assert_eq!(listed, vec![retry]);
  assert!(!listed[0].is_due(now));
  assert!(listed[0].is_due(now + Duration::seconds(30)));
}

#[tokio::test]
async fn test_checkpoint_upsert_and_delete() {
  let store = SqliteStore::in_memory().await.unwrap();
  store.create_execution(&record("run-1", "auto", 0), None).await.unwrap();

  assert_eq!(store.load_checkpoint("run-1").await.unwrap(), None);

  store.save_checkpoint("run-1", &json!({ "v": 1 })).await.unwrap();
  store.save_checkpoint("run-1", &json!({ "v": 2 })).await.unwrap();
  assert_eq!(
    store.load_checkpoint("run-1").await.unwrap(),
    Some(json!({ "v": 2 }))
  );

  store.delete_checkpoint("run-1").await.unwrap();
  assert_eq!(store.load_checkpoint("run-1").await.unwrap(), None);
}
