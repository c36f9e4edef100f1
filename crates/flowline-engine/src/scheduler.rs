//! Graph traversal for one run.
//!
//! The scheduler is the only writer of a run's [`RunState`]. Ready nodes are
//! dispatched as a batch onto spawned tasks; their results are applied back
//! in authored order once the whole batch has finished, so the same inputs
//! always produce the same node results.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flowline_context::{RunContext, condition, template};
use flowline_store::{Json, NodeResult, NodeStatus, Store, Suspension, SuspensionKind};
use flowline_task::{HandlerRegistry, SuspendRequest, TaskError, TaskOutcome, TaskOutput};
use flowline_workflow::{EdgeCondition, Node, NotificationChannel};
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{ExecutionEvent, ExecutionNotifier};
use crate::state::{NodeState, RunState};
use crate::supervisor::{
  Attempt, Dispatch, FailureAction, Supervised, failure_action, max_attempts, retry_delay, supervise,
};

/// Where a drive left the run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
  Completed,
  Failed(String),
  /// At least one node is parked and nothing else can proceed.
  Suspended,
  Cancelled,
}

pub(crate) struct Scheduler {
  pub store: Arc<dyn Store>,
  pub registry: Arc<HandlerRegistry>,
  pub notifier: Arc<dyn ExecutionNotifier>,
  pub config: EngineConfig,
}

impl Scheduler {
  /// Complete the trigger node with the run's trigger data.
  pub async fn start(&self, state: &mut RunState) -> Result<(), EngineError> {
    let trigger_id = state.automation.trigger_id.clone();
    let payload = state.context.trigger_data().clone();
    let now = Utc::now();

    state.nodes.transition(&trigger_id, NodeState::Ready)?;
    state.nodes.transition(&trigger_id, NodeState::Running)?;
    state.nodes.transition(&trigger_id, NodeState::Succeeded)?;
    state.attempts.insert(trigger_id.clone(), 1);
    state.context.record_output(trigger_id.as_str(), payload.clone());

    let attempt = Attempt {
      attempt: 1,
      started_at: now,
      completed_at: now,
      error: None,
    };
    self
      .append(state, &trigger_id, &attempt, NodeStatus::Succeeded, Some(payload.clone()))
      .await?;
    self.notifier.notify(ExecutionEvent::NodeCompleted {
      run_id: state.run_id.clone(),
      node_id: trigger_id.clone(),
      output: payload,
    });

    self.activate_outgoing(state, &trigger_id);
    Ok(())
  }

  /// Run ready nodes until nothing else can make progress.
  pub async fn drive(
    &self,
    state: &mut RunState,
    cancel: &CancellationToken,
  ) -> Result<RunOutcome, EngineError> {
    loop {
      if cancel.is_cancelled() {
        return Ok(RunOutcome::Cancelled);
      }
      if state.failure.is_some() {
        break;
      }

      let ready = state.nodes.ready(&state.automation);
      if ready.is_empty() {
        break;
      }

      let snapshot = Arc::new(state.context.clone());
      let mut jobs = Vec::with_capacity(ready.len());

      for node_id in &ready {
        let node = state.automation.node(node_id)?.clone();
        if !node.enabled {
          self.pass_through(state, &node).await?;
          continue;
        }

        state.nodes.transition(node_id, NodeState::Running)?;
        let config = self.render_config(&state.run_id, &node, &snapshot);
        jobs.push(self.dispatch_job(state, node, config, snapshot.clone(), cancel));
      }

      if jobs.is_empty() {
        continue;
      }

      let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_nodes.max(1)));
      let mut ids = Vec::with_capacity(jobs.len());
      let mut handles = Vec::with_capacity(jobs.len());

      for job in jobs {
        ids.push(job.node.node_id.clone());
        let semaphore = semaphore.clone();
        handles.push(tokio::spawn(async move {
          let _permit = semaphore.acquire_owned().await;
          supervise(job).await
        }));
      }

      let results = futures::future::join_all(handles).await;

      for (node_id, result) in ids.into_iter().zip(results) {
        let supervised = result.unwrap_or_else(|e| {
          let now = Utc::now();
          Supervised {
            node_id,
            attempts: vec![Attempt {
              attempt: 1,
              started_at: now,
              completed_at: now,
              error: Some(format!("task join error: {}", e)),
            }],
            outcome: Err(TaskError::handler(format!("task join error: {}", e))),
          }
        });
        self.apply(state, supervised).await?;
      }
    }

    Ok(outcome(state))
  }

  /// Resolve `{{...}}` placeholders unless the handler reads the raw config.
  fn render_config(&self, run_id: &str, node: &Node, ctx: &RunContext) -> Map<String, Value> {
    let wants_templates = self
      .registry
      .get(&node.subtype)
      .map(|h| h.resolve_templates())
      .unwrap_or(true);
    if !wants_templates {
      return node.config.clone();
    }

    let rendered = template::resolve_config(&node.config, ctx);
    if !rendered.is_complete() {
      warn!(
        run_id = %run_id,
        node_id = %node.node_id,
        paths = ?rendered.unresolved,
        "template_unresolved"
      );
    }
    rendered.value
  }

  fn dispatch_job(
    &self,
    state: &RunState,
    node: Node,
    config: Map<String, Value>,
    run: Arc<RunContext>,
    cancel: &CancellationToken,
  ) -> Dispatch {
    let timeout_ms = node.timeout_ms.unwrap_or(self.config.default_node_timeout_ms);
    Dispatch {
      run_id: state.run_id.clone(),
      node,
      config,
      run,
      registry: self.registry.clone(),
      notifier: self.notifier.clone(),
      timeout: Duration::from_millis(timeout_ms),
      retry_cap: Duration::from_millis(self.config.max_retry_delay_ms),
      cancel: cancel.clone(),
      first_attempt: 1,
    }
  }

  /// A disabled node succeeds with an empty output and is never dispatched.
  async fn pass_through(&self, state: &mut RunState, node: &Node) -> Result<(), EngineError> {
    let now = Utc::now();
    state.nodes.transition(&node.node_id, NodeState::Succeeded)?;
    state
      .context
      .record_output(node.node_id.as_str(), Value::Object(Map::new()));

    let attempt = Attempt {
      attempt: 0,
      started_at: now,
      completed_at: now,
      error: None,
    };
    self
      .append(
        state,
        &node.node_id,
        &attempt,
        NodeStatus::Succeeded,
        Some(Value::Object(Map::new())),
      )
      .await?;
    debug!(run_id = %state.run_id, node_id = %node.node_id, "node_disabled");
    self.notifier.notify(ExecutionEvent::NodeCompleted {
      run_id: state.run_id.clone(),
      node_id: node.node_id.clone(),
      output: Value::Object(Map::new()),
    });

    self.activate_outgoing(state, &node.node_id);
    Ok(())
  }

  /// Apply one node's supervised result to the run.
  async fn apply(&self, state: &mut RunState, supervised: Supervised) -> Result<(), EngineError> {
    let Supervised {
      node_id,
      attempts,
      outcome,
    } = supervised;

    if let Some(last) = attempts.last() {
      state.attempts.insert(node_id.clone(), last.attempt);
    }

    match outcome {
      Ok(TaskOutcome::Completed(output)) => {
        let (failed, last) = split_last(&attempts);
        for attempt in failed {
          self
            .append(state, &node_id, attempt, NodeStatus::Failed, None)
            .await?;
        }
        self.complete(state, &node_id, last, output).await
      }
      Ok(TaskOutcome::Suspend(request)) => {
        let (failed, _) = split_last(&attempts);
        for attempt in failed {
          self
            .append(state, &node_id, attempt, NodeStatus::Failed, None)
            .await?;
        }
        self.suspend(state, &node_id, request).await
      }
      Err(TaskError::Cancelled) => {
        for attempt in &attempts {
          self
            .append(state, &node_id, attempt, NodeStatus::Failed, None)
            .await?;
        }
        state.nodes.transition(&node_id, NodeState::Failed)?;
        self.notifier.notify(ExecutionEvent::NodeFailed {
          run_id: state.run_id.clone(),
          node_id,
          error: TaskError::Cancelled.to_string(),
        });
        Ok(())
      }
      Err(e) => self.fail(state, &node_id, &attempts, &e.to_string()).await,
    }
  }

  /// Mark a node succeeded and open its outgoing connections.
  pub async fn complete(
    &self,
    state: &mut RunState,
    node_id: &str,
    attempt: Option<&Attempt>,
    output: TaskOutput,
  ) -> Result<(), EngineError> {
    let value = Value::Object(output.output);
    if let Some(attempt) = attempt {
      self
        .append(state, node_id, attempt, NodeStatus::Succeeded, Some(value.clone()))
        .await?;
    }

    state.nodes.transition(node_id, NodeState::Succeeded)?;
    state.context.record_output(node_id, value.clone());
    info!(run_id = %state.run_id, node_id = %node_id, "node_completed");
    self.notifier.notify(ExecutionEvent::NodeCompleted {
      run_id: state.run_id.clone(),
      node_id: node_id.to_string(),
      output: value,
    });

    if output.halt_branch {
      debug!(run_id = %state.run_id, node_id = %node_id, "branch_halted");
    } else {
      self.activate_outgoing(state, node_id);
    }
    Ok(())
  }

  async fn suspend(
    &self,
    state: &mut RunState,
    node_id: &str,
    request: SuspendRequest,
  ) -> Result<(), EngineError> {
    let now = Utc::now();
    let suspension = suspension_for(state, node_id, request, now);
    self.store.save_suspension(&suspension).await?;

    state.nodes.transition(node_id, NodeState::Suspended)?;
    info!(
      run_id = %state.run_id,
      node_id = %node_id,
      kind = ?suspension.kind,
      resume_at = ?suspension.resume_at,
      deadline = ?suspension.deadline,
      "node_suspended"
    );
    self.notifier.notify(ExecutionEvent::NodeSuspended {
      run_id: state.run_id.clone(),
      node_id: node_id.to_string(),
    });
    Ok(())
  }

  /// A parked wait ran out of time.
  ///
  /// With attempts left under a retry policy the node stays suspended until
  /// its backoff elapses and is then dispatched again. Otherwise it fails.
  pub async fn wait_timed_out(
    &self,
    state: &mut RunState,
    node_id: &str,
    attempt: Attempt,
    now: DateTime<Utc>,
  ) -> Result<(), EngineError> {
    let node = state.automation.node(node_id)?.clone();
    let error = attempt.error.clone().unwrap_or_default();
    let retryable = self
      .registry
      .get(&node.subtype)
      .map(|h| h.retryable())
      .unwrap_or(false);
    let max = max_attempts(&node.error_policy, retryable);
    if attempt.attempt >= max {
      return self.fail(state, node_id, &[attempt], &error).await;
    }

    self
      .append(state, node_id, &attempt, NodeStatus::Failed, None)
      .await?;

    let cap = Duration::from_millis(self.config.max_retry_delay_ms);
    let delay = retry_delay(&node.error_policy, attempt.attempt, cap);
    let suspension = Suspension {
      execution_id: state.run_id.clone(),
      node_id: node_id.to_string(),
      automation_id: state.automation_id().to_string(),
      kind: SuspensionKind::Retry,
      resume_at: Some(after(now, delay)),
      event_name: None,
      predicate: None,
      deadline: None,
      created_at: now,
    };
    self.store.save_suspension(&suspension).await?;

    warn!(
      run_id = %state.run_id,
      node_id = %node_id,
      attempt = attempt.attempt,
      max_attempts = max,
      delay_ms = delay.as_millis() as u64,
      error = %error,
      "node_retrying"
    );
    self.notifier.notify(ExecutionEvent::NodeRetrying {
      run_id: state.run_id.clone(),
      node_id: node_id.to_string(),
      attempt: attempt.attempt,
      delay_ms: delay.as_millis() as u64,
    });
    Ok(())
  }

  /// Dispatch a suspended node again as attempt `attempt`.
  pub async fn redispatch(
    &self,
    state: &mut RunState,
    node_id: &str,
    attempt: u32,
    cancel: &CancellationToken,
  ) -> Result<(), EngineError> {
    let node = state.automation.node(node_id)?.clone();
    state.nodes.transition(node_id, NodeState::Running)?;

    let snapshot = Arc::new(state.context.clone());
    let config = self.render_config(&state.run_id, &node, &snapshot);
    let mut job = self.dispatch_job(state, node, config, snapshot, cancel);
    job.first_attempt = attempt;

    let supervised = supervise(job).await;
    self.apply(state, supervised).await
  }

  /// A node failed for good: record it and apply its error policy.
  pub async fn fail(
    &self,
    state: &mut RunState,
    node_id: &str,
    attempts: &[Attempt],
    error: &str,
  ) -> Result<(), EngineError> {
    let node = state.automation.node(node_id)?.clone();
    let action = failure_action(&node.error_policy);

    if action == FailureAction::Skip {
      if let Some(last) = attempts.last() {
        let skipped = Attempt {
          error: None,
          ..last.clone()
        };
        self
          .append(state, node_id, &skipped, NodeStatus::Skipped, None)
          .await?;
      }
    } else {
      for attempt in attempts {
        self
          .append(state, node_id, attempt, NodeStatus::Failed, None)
          .await?;
      }
    }

    self.notify_error(state, &node, error);

    match action {
      FailureAction::Stop => {
        state.nodes.transition(node_id, NodeState::Failed)?;
        state.context.mark_visited(node_id);
        error!(run_id = %state.run_id, node_id = %node_id, error = %error, "node_failed");
        self.node_failed(state, node_id, error);
        state.failure = Some(format!("node '{}' failed: {}", node_id, error));
      }
      FailureAction::Continue(default_output) => {
        state.nodes.transition(node_id, NodeState::Failed)?;
        warn!(run_id = %state.run_id, node_id = %node_id, error = %error, "node_failed_continue");
        self.node_failed(state, node_id, error);
        state
          .context
          .record_output(node_id, Value::Object(default_output));
        self.activate_outgoing(state, node_id);
      }
      FailureAction::Skip => {
        state.nodes.transition(node_id, NodeState::Skipped)?;
        warn!(run_id = %state.run_id, node_id = %node_id, error = %error, "node_skipped");
        self.notifier.notify(ExecutionEvent::NodeSkipped {
          run_id: state.run_id.clone(),
          node_id: node_id.to_string(),
        });
        state
          .context
          .record_output(node_id, Value::Object(Map::new()));
        self.activate_outgoing(state, node_id);
      }
      FailureAction::Fallback(fallback_id) => {
        state.nodes.transition(node_id, NodeState::Failed)?;
        state.context.mark_visited(node_id);
        warn!(
          run_id = %state.run_id,
          node_id = %node_id,
          fallback_node_id = %fallback_id,
          error = %error,
          "node_failed_fallback"
        );
        self.node_failed(state, node_id, error);
        state.nodes.activate(&fallback_id);
      }
    }

    Ok(())
  }

  fn node_failed(&self, state: &RunState, node_id: &str, error: &str) {
    self.notifier.notify(ExecutionEvent::NodeFailed {
      run_id: state.run_id.clone(),
      node_id: node_id.to_string(),
      error: error.to_string(),
    });
  }

  /// Fire the node's `errorNotification`, if any.
  fn notify_error(&self, state: &RunState, node: &Node, error: &str) {
    let Some(notification) = &node.error_policy.error_notification else {
      return;
    };

    if notification.channel == NotificationChannel::Log {
      error!(
        run_id = %state.run_id,
        automation_id = %state.automation_id(),
        node_id = %node.node_id,
        error = %error,
        "error_notification"
      );
    }
    self.notifier.notify(ExecutionEvent::ErrorNotification {
      run_id: state.run_id.clone(),
      automation_id: state.automation_id().to_string(),
      node_id: node.node_id.clone(),
      channel: notification.channel,
      recipient: notification.recipient.clone(),
      error: error.to_string(),
    });
  }

  /// Evaluate each outgoing connection and activate the targets that pass.
  fn activate_outgoing(&self, state: &mut RunState, node_id: &str) {
    let targets: Vec<String> = state
      .automation
      .outgoing(node_id)
      .filter(|c| edge_passes(&c.condition, &state.context, &c.connection_id))
      .map(|c| c.target_id.clone())
      .collect();

    for target in targets {
      if state.nodes.activate(&target) {
        debug!(run_id = %state.run_id, node_id = %target, "node_ready");
      }
    }
  }

  async fn append(
    &self,
    state: &RunState,
    node_id: &str,
    attempt: &Attempt,
    status: NodeStatus,
    output: Option<Value>,
  ) -> Result<(), EngineError> {
    let result = NodeResult {
      result_id: uuid::Uuid::new_v4().to_string(),
      execution_id: state.run_id.clone(),
      node_id: node_id.to_string(),
      attempt: attempt.attempt as i32,
      status,
      output: output.map(Json),
      error: attempt.error.clone(),
      started_at: attempt.started_at,
      completed_at: attempt.completed_at,
    };
    self.store.append_node_result(&result).await?;
    Ok(())
  }
}

fn split_last(attempts: &[Attempt]) -> (&[Attempt], Option<&Attempt>) {
  match attempts.split_last() {
    Some((last, rest)) => (rest, Some(last)),
    None => (&[], None),
  }
}

fn edge_passes(gate: &EdgeCondition, ctx: &RunContext, connection_id: &str) -> bool {
  match gate {
    EdgeCondition::Always => true,
    EdgeCondition::If(spec) => condition::evaluate_or_false(spec, ctx),
    EdgeCondition::Unless(spec) => match condition::evaluate(spec, ctx) {
      Ok(matched) => !matched,
      Err(e) => {
        warn!(connection_id = %connection_id, error = %e, "predicate_invalid");
        false
      }
    },
  }
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
  chrono::Duration::from_std(delay)
    .ok()
    .and_then(|d| now.checked_add_signed(d))
    .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn suspension_for(
  state: &RunState,
  node_id: &str,
  request: SuspendRequest,
  now: DateTime<Utc>,
) -> Suspension {
  let after = |d: Duration| after(now, d);

  let mut suspension = Suspension {
    execution_id: state.run_id.clone(),
    node_id: node_id.to_string(),
    automation_id: state.automation_id().to_string(),
    kind: SuspensionKind::Delay,
    resume_at: None,
    event_name: None,
    predicate: None,
    deadline: None,
    created_at: now,
  };

  match request {
    SuspendRequest::Delay { duration } => {
      suspension.resume_at = Some(after(duration));
    }
    SuspendRequest::Event {
      event_name,
      timeout,
    } => {
      suspension.kind = SuspensionKind::Event;
      suspension.event_name = Some(event_name);
      suspension.deadline = timeout.map(after);
    }
    SuspendRequest::Condition { predicate, timeout } => {
      suspension.kind = SuspensionKind::Condition;
      suspension.predicate = Some(Json(predicate));
      suspension.deadline = timeout.map(after);
    }
  }

  suspension
}

fn outcome(state: &RunState) -> RunOutcome {
  if let Some(error) = &state.failure {
    RunOutcome::Failed(error.clone())
  } else if state.nodes.any(NodeState::Suspended) {
    RunOutcome::Suspended
  } else {
    RunOutcome::Completed
  }
}
