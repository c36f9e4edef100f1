//! Automation execution engine.
//!
//! The `Engine` turns trigger events into runs, drives them through the
//! scheduler and keeps the execution store in step. Suspended runs are
//! checkpointed and picked up again by [`Engine::resume_due`] and
//! [`Engine::deliver_event`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use flowline_context::condition;
use flowline_resolver::Resolver;
use flowline_store::{
  CreateOutcome, ExecutionRecord, ExecutionStatus, Store, StoreError, Suspension, SuspensionKind,
};
use flowline_task::{HandlerRegistry, TaskError, TaskOutput};
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::scheduler::{RunOutcome, Scheduler};
use crate::state::{NodeState, RunState};
use crate::supervisor::Attempt;
use crate::trigger::TriggerEvent;

/// How a suspended node is settled when its run is picked up again.
enum Resolution {
  Complete(Map<String, Value>),
  /// The wait ran out of time.
  TimedOut(String),
  /// Backoff after a timed-out wait elapsed; dispatch the node again.
  Redispatch,
}

/// The automation execution engine.
///
/// Safe to share across tasks behind an `Arc`. Work on any single run is
/// serialized by a per-run lock, so a run has one writer at a time.
pub struct Engine {
  resolver: Arc<dyn Resolver>,
  scheduler: Scheduler,
  /// Cancellation tokens of runs currently being driven.
  active: Mutex<HashMap<String, CancellationToken>>,
  run_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Engine {
  /// Create an engine that discards execution events.
  pub fn new(
    resolver: Arc<dyn Resolver>,
    store: Arc<dyn Store>,
    registry: Arc<HandlerRegistry>,
    config: EngineConfig,
  ) -> Self {
    Self::with_notifier(resolver, store, registry, config, Arc::new(NoopNotifier))
  }

  pub fn with_notifier(
    resolver: Arc<dyn Resolver>,
    store: Arc<dyn Store>,
    registry: Arc<HandlerRegistry>,
    config: EngineConfig,
    notifier: Arc<dyn ExecutionNotifier>,
  ) -> Self {
    Self {
      resolver,
      scheduler: Scheduler {
        store,
        registry,
        notifier,
        config,
      },
      active: Mutex::new(HashMap::new()),
      run_locks: Mutex::new(HashMap::new()),
    }
  }

  pub fn config(&self) -> &EngineConfig {
    &self.scheduler.config
  }

  fn store(&self) -> &dyn Store {
    self.scheduler.store.as_ref()
  }

  fn notify(&self, event: ExecutionEvent) {
    self.scheduler.notifier.notify(event);
  }

  /// Start a run for a trigger event and drive it until it finishes or
  /// suspends. Returns the run id.
  ///
  /// The graph is loaded and validated first; an invalid automation fails
  /// here and no execution record is written. A trigger whose external event
  /// id was already seen for the automation returns the earlier run's id
  /// without doing anything.
  #[instrument(skip(self, event), fields(automation_id = %event.automation_id))]
  pub async fn start_run(&self, event: TriggerEvent) -> Result<String, EngineError> {
    let automation = self.resolver.load_graph(&event.automation_id).await?;

    let run_id = uuid::Uuid::new_v4().to_string();
    let record = ExecutionRecord::start(
      run_id.as_str(),
      automation.automation_id.as_str(),
      event.trigger_type.as_str(),
      event.payload.clone(),
      Utc::now(),
    );

    let created = self
      .store()
      .create_execution(&record, event.external_event_id.as_deref())
      .await?;
    if let CreateOutcome::Duplicate { execution_id } = created {
      info!(
        run_id = %execution_id,
        external_event_id = ?event.external_event_id,
        "trigger_duplicate"
      );
      return Ok(execution_id);
    }

    let lock = self.run_lock(&run_id).await;
    let _guard = lock.lock_owned().await;
    let cancel = self.register(&run_id).await;

    info!(
      run_id = %run_id,
      trigger_type = %event.trigger_type,
      "run_started"
    );
    self.notify(ExecutionEvent::RunStarted {
      run_id: run_id.clone(),
      automation_id: automation.automation_id.clone(),
    });

    let mut state = RunState::new(run_id.as_str(), automation, event.payload);
    let result = match self.scheduler.start(&mut state).await {
      Ok(()) => self.scheduler.drive(&mut state, &cancel).await,
      Err(e) => Err(e),
    };

    self.unregister(&run_id).await;
    self.finish(&state, settle(&run_id, result)).await?;
    Ok(run_id)
  }

  /// Get a run with its per-node results.
  pub async fn get_run(&self, run_id: &str) -> Result<ExecutionRecord, EngineError> {
    self
      .store()
      .get_execution(run_id)
      .await
      .map_err(|e| match e {
        StoreError::NotFound(_) => EngineError::RunNotFound {
          run_id: run_id.to_string(),
        },
        other => other.into(),
      })
  }

  /// Most recent runs of an automation, newest first.
  pub async fn list_runs(
    &self,
    automation_id: &str,
    limit: u32,
  ) -> Result<Vec<ExecutionRecord>, EngineError> {
    Ok(self.store().list_executions(automation_id, limit).await?)
  }

  /// Cancel a run.
  ///
  /// A run being driven stops dispatching once its in-flight nodes return
  /// and is finalized as cancelled by its driver. A suspended run is
  /// finalized here and its suspensions dropped.
  pub async fn cancel_run(&self, run_id: &str) -> Result<(), EngineError> {
    if let Some(token) = self.active.lock().await.get(run_id) {
      info!(run_id = %run_id, "run_cancel_requested");
      token.cancel();
      return Ok(());
    }

    // Unknown ids fail before a run lock is created for them
    self.get_run(run_id).await?;

    let lock = self.run_lock(run_id).await;
    let _guard = lock.lock_owned().await;

    let record = self.get_run(run_id).await?;
    if record.status.is_terminal() {
      return Err(EngineError::AlreadyFinished {
        run_id: run_id.to_string(),
        status: record.status,
      });
    }

    self.store().delete_suspensions(run_id).await?;
    self.store().delete_checkpoint(run_id).await?;
    self
      .store()
      .finalize_execution(run_id, ExecutionStatus::Cancelled, None, Utc::now())
      .await?;
    self.run_locks.lock().await.remove(run_id);

    info!(run_id = %run_id, "run_cancelled");
    self.notify(ExecutionEvent::RunCancelled {
      run_id: run_id.to_string(),
    });
    Ok(())
  }

  /// Pick up every suspension that is due at `now`.
  ///
  /// Elapsed delays complete, event waits past their deadline time out, and
  /// condition waits are re-evaluated. A timed-out wait with retries left
  /// under its error policy is parked again and re-dispatched once its
  /// backoff elapses. Returns how many nodes were settled.
  #[instrument(skip(self))]
  pub async fn resume_due(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
    let due: Vec<Suspension> = self
      .store()
      .list_suspensions()
      .await?
      .into_iter()
      .filter(|s| s.is_due(now))
      .collect();

    let mut settled = 0;
    for suspension in due {
      let result = match suspension.kind {
        SuspensionKind::Delay => {
          self
            .resume(suspension, now, |_, s| {
              let delayed_ms = (now - s.created_at).num_milliseconds().max(0);
              let mut output = Map::new();
              output.insert("resumed_at".to_string(), json!(now.to_rfc3339()));
              output.insert("delayed_ms".to_string(), json!(delayed_ms));
              Some(Resolution::Complete(output))
            })
            .await
        }
        SuspensionKind::Event => {
          self
            .resume(suspension, now, |_, s| Some(Resolution::TimedOut(timed_out(s))))
            .await
        }
        SuspensionKind::Condition => {
          self
            .resume(suspension, now, |state, s| {
              condition_met(state, s).or_else(|| {
                s.deadline
                  .is_some_and(|d| d <= now)
                  .then(|| Resolution::TimedOut(timed_out(s)))
              })
            })
            .await
        }
        SuspensionKind::Retry => {
          self
            .resume(suspension, now, |_, _| Some(Resolution::Redispatch))
            .await
        }
      };

      match result {
        Ok(true) => settled += 1,
        Ok(false) => {}
        Err(e) => warn!(error = %e, "resume_failed"),
      }
    }

    Ok(settled)
  }

  /// Deliver a named event to the parked runs of an automation.
  ///
  /// The payload is stored in each receiving run's context under
  /// `events.<name>`. Nodes waiting for this event complete with it;
  /// condition waits are re-checked against the updated context. Waits past
  /// their deadline are left for [`Engine::resume_due`]. Returns how many
  /// waiting nodes were settled.
  pub async fn deliver_event(
    &self,
    automation_id: &str,
    event_name: &str,
    payload: Value,
  ) -> Result<usize, EngineError> {
    let now = Utc::now();
    let waiting: Vec<Suspension> = self
      .store()
      .list_suspensions()
      .await?
      .into_iter()
      .filter(|s| {
        s.automation_id == automation_id
          && match s.kind {
            SuspensionKind::Event => s.event_name.as_deref() == Some(event_name),
            SuspensionKind::Condition => true,
            SuspensionKind::Delay | SuspensionKind::Retry => false,
          }
      })
      .collect();

    let mut delivered = 0;
    for suspension in waiting {
      let result = self
        .resume(suspension, now, |state, s| {
          if s.deadline.is_some_and(|d| d <= now) {
            return None;
          }
          state.context.record_event(event_name, payload.clone());

          if s.kind == SuspensionKind::Condition {
            return condition_met(state, s);
          }
          let mut output = Map::new();
          output.insert("event".to_string(), json!(event_name));
          output.insert("payload".to_string(), payload.clone());
          Some(Resolution::Complete(output))
        })
        .await;

      match result {
        Ok(true) => delivered += 1,
        Ok(false) => {}
        Err(e) => warn!(error = %e, "event_delivery_failed"),
      }
    }

    info!(
      automation_id = %automation_id,
      event_name = %event_name,
      delivered,
      "event_delivered"
    );
    Ok(delivered)
  }

  /// Settle one suspended node and continue its run.
  ///
  /// Returns false when there was nothing to do: the run already ended, the
  /// node was settled by someone else, or `decide` chose to keep waiting.
  /// Context changes `decide` makes while choosing to wait are checkpointed.
  async fn resume<F>(
    &self,
    suspension: Suspension,
    now: DateTime<Utc>,
    decide: F,
  ) -> Result<bool, EngineError>
  where
    F: FnOnce(&mut RunState, &Suspension) -> Option<Resolution>,
  {
    let run_id = suspension.execution_id.clone();
    let node_id = suspension.node_id.clone();

    let lock = self.run_lock(&run_id).await;
    let _guard = lock.lock_owned().await;

    let Some(checkpoint) = self.store().load_checkpoint(&run_id).await? else {
      return Ok(false);
    };
    let mut state: RunState =
      serde_json::from_value(checkpoint).map_err(|source| EngineError::Checkpoint {
        run_id: run_id.clone(),
        source,
      })?;

    if state.nodes.get(&node_id) != NodeState::Suspended {
      return Ok(false);
    }
    let before = state.context.clone();
    let Some(resolution) = decide(&mut state, &suspension) else {
      if state.context != before {
        self.save_checkpoint(&state).await?;
      }
      return Ok(false);
    };
    if !self.store().take_suspension(&run_id, &node_id).await? {
      return Ok(false);
    }

    let cancel = self.register(&run_id).await;
    info!(run_id = %run_id, node_id = %node_id, kind = ?suspension.kind, "node_resumed");

    let attempt_no = state.attempts.get(&node_id).copied().unwrap_or(1);
    let settled = match resolution {
      Resolution::Complete(output) => {
        let attempt = Attempt {
          attempt: attempt_no,
          started_at: suspension.created_at,
          completed_at: now,
          error: None,
        };
        self
          .scheduler
          .complete(&mut state, &node_id, Some(&attempt), TaskOutput::new(output))
          .await
      }
      Resolution::TimedOut(error) => {
        let attempt = Attempt {
          attempt: attempt_no,
          started_at: suspension.created_at,
          completed_at: now,
          error: Some(error.clone()),
        };
        self
          .scheduler
          .wait_timed_out(&mut state, &node_id, attempt, now)
          .await
      }
      Resolution::Redispatch => {
        self
          .scheduler
          .redispatch(&mut state, &node_id, attempt_no + 1, &cancel)
          .await
      }
    };

    let result = match settled {
      Ok(()) => self.scheduler.drive(&mut state, &cancel).await,
      Err(e) => Err(e),
    };

    self.unregister(&run_id).await;
    self.finish(&state, settle(&run_id, result)).await?;
    Ok(true)
  }

  /// Persist where a drive left the run.
  async fn finish(&self, state: &RunState, outcome: RunOutcome) -> Result<(), EngineError> {
    let run_id = state.run_id.as_str();

    let (status, error_message) = match outcome {
      RunOutcome::Suspended => {
        self.save_checkpoint(state).await?;
        info!(run_id = %run_id, "run_suspended");
        self.notify(ExecutionEvent::RunSuspended {
          run_id: run_id.to_string(),
        });
        return Ok(());
      }
      RunOutcome::Completed => (ExecutionStatus::Completed, None),
      RunOutcome::Failed(error) => (ExecutionStatus::Failed, Some(error)),
      RunOutcome::Cancelled => (ExecutionStatus::Cancelled, None),
    };

    self.store().delete_suspensions(run_id).await?;
    self.store().delete_checkpoint(run_id).await?;
    let record = self
      .store()
      .finalize_execution(run_id, status, error_message.as_deref(), Utc::now())
      .await?;
    self.run_locks.lock().await.remove(run_id);

    let event = match status {
      ExecutionStatus::Completed => {
        info!(run_id = %run_id, execution_time_ms = ?record.execution_time_ms, "run_completed");
        ExecutionEvent::RunCompleted {
          run_id: run_id.to_string(),
        }
      }
      ExecutionStatus::Cancelled => {
        info!(run_id = %run_id, "run_cancelled");
        ExecutionEvent::RunCancelled {
          run_id: run_id.to_string(),
        }
      }
      _ => {
        let error = error_message.unwrap_or_default();
        error!(run_id = %run_id, error = %error, "run_failed");
        ExecutionEvent::RunFailed {
          run_id: run_id.to_string(),
          error,
        }
      }
    };
    self.notify(event);
    Ok(())
  }

  async fn save_checkpoint(&self, state: &RunState) -> Result<(), EngineError> {
    let checkpoint = serde_json::to_value(state).map_err(|source| EngineError::Checkpoint {
      run_id: state.run_id.clone(),
      source,
    })?;
    self.store().save_checkpoint(&state.run_id, &checkpoint).await?;
    Ok(())
  }

  async fn run_lock(&self, run_id: &str) -> Arc<Mutex<()>> {
    self
      .run_locks
      .lock()
      .await
      .entry(run_id.to_string())
      .or_default()
      .clone()
  }

  async fn register(&self, run_id: &str) -> CancellationToken {
    let token = CancellationToken::new();
    self
      .active
      .lock()
      .await
      .insert(run_id.to_string(), token.clone());
    token
  }

  async fn unregister(&self, run_id: &str) {
    self.active.lock().await.remove(run_id);
  }
}

/// A drive that errored fails the run with that error.
fn settle(run_id: &str, result: Result<RunOutcome, EngineError>) -> RunOutcome {
  result.unwrap_or_else(|e| {
    error!(run_id = %run_id, error = %e, "run_error");
    RunOutcome::Failed(e.to_string())
  })
}

/// Completes a condition wait whose predicate now holds.
fn condition_met(state: &RunState, suspension: &Suspension) -> Option<Resolution> {
  let satisfied = suspension
    .predicate
    .as_ref()
    .is_some_and(|p| condition::evaluate_or_false(&p.0, &state.context));
  satisfied.then(|| {
    let mut output = Map::new();
    output.insert("satisfied".to_string(), Value::Bool(true));
    Resolution::Complete(output)
  })
}

fn timed_out(suspension: &Suspension) -> String {
  let timeout_ms = suspension
    .deadline
    .map(|d| (d - suspension.created_at).num_milliseconds().max(0) as u64)
    .unwrap_or_default();
  TaskError::Timeout { timeout_ms }.to_string()
}
