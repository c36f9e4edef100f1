//! Per-node error policy: retries with backoff, and what happens once a node
//! has failed for good.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flowline_context::RunContext;
use flowline_task::{HandlerRegistry, TaskContext, TaskError, TaskOutcome};
use flowline_workflow::{BackoffStrategy, ErrorPolicy, Node, OnError};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::events::{ExecutionEvent, ExecutionNotifier};

/// Delay before retry number `retry` (1-based).
///
/// `base` is the policy's `retryDelay`: fixed waits `base` every time, linear
/// waits `base * retry`, exponential doubles from `base` (1, 2, 4, ...).
/// Never exceeds `cap`.
pub fn retry_delay(policy: &ErrorPolicy, retry: u32, cap: Duration) -> Duration {
  let base = Duration::from_secs(policy.retry_delay);
  let retry = retry.max(1);
  let delay = match policy.backoff_strategy {
    BackoffStrategy::Fixed => base,
    BackoffStrategy::Linear => base.saturating_mul(retry),
    BackoffStrategy::Exponential => base.saturating_mul(1u32 << (retry - 1).min(20)),
  };
  delay.min(cap)
}

/// Total dispatch attempts a node gets.
pub fn max_attempts(policy: &ErrorPolicy, handler_retryable: bool) -> u32 {
  if policy.on_error == OnError::Retry && handler_retryable {
    policy.max_retries.saturating_add(1)
  } else {
    1
  }
}

/// What the scheduler does with a node that failed for good.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureAction {
  /// Fail the run.
  Stop,
  /// Mark the node failed; downstream sees this output.
  Continue(Map<String, Value>),
  /// Mark the node skipped; downstream sees an empty output.
  Skip,
  /// Mark the node failed and hand control to this node.
  Fallback(String),
}

pub fn failure_action(policy: &ErrorPolicy) -> FailureAction {
  match policy.on_error {
    OnError::Stop => FailureAction::Stop,
    OnError::Continue => FailureAction::Continue(policy.default_output.clone().unwrap_or_default()),
    OnError::Skip => FailureAction::Skip,
    OnError::Fallback | OnError::Retry => match &policy.fallback_node_id {
      Some(id) => FailureAction::Fallback(id.clone()),
      None => FailureAction::Stop,
    },
  }
}

/// One dispatch attempt, as recorded in the execution store.
#[derive(Debug, Clone)]
pub struct Attempt {
  pub attempt: u32,
  pub started_at: DateTime<Utc>,
  pub completed_at: DateTime<Utc>,
  pub error: Option<String>,
}

/// Result of running a node under its policy.
#[derive(Debug)]
pub struct Supervised {
  pub node_id: String,
  pub attempts: Vec<Attempt>,
  pub outcome: Result<TaskOutcome, TaskError>,
}

/// Everything a spawned node task needs.
pub struct Dispatch {
  pub run_id: String,
  pub node: Node,
  pub config: Map<String, Value>,
  pub run: Arc<RunContext>,
  pub registry: Arc<HandlerRegistry>,
  pub notifier: Arc<dyn ExecutionNotifier>,
  pub timeout: Duration,
  pub retry_cap: Duration,
  pub cancel: CancellationToken,
  /// Attempt number of the first try; above 1 when a timed-out wait is
  /// dispatched again.
  pub first_attempt: u32,
}

/// Dispatch a node, retrying per its policy.
///
/// Each attempt is bounded by the node timeout. Retries stop early for
/// errors that cannot succeed on a second try, and on cancellation.
#[instrument(skip_all, fields(run_id = %job.run_id, node_id = %job.node.node_id))]
pub async fn supervise(job: Dispatch) -> Supervised {
  let Dispatch {
    run_id,
    node,
    config,
    run,
    registry,
    notifier,
    timeout,
    retry_cap,
    cancel,
    first_attempt,
  } = job;

  let retryable = registry
    .get(&node.subtype)
    .map(|h| h.retryable())
    .unwrap_or(false);
  let max = max_attempts(&node.error_policy, retryable);
  let timeout_ms = timeout.as_millis() as u64;

  let mut attempts = Vec::new();
  let mut attempt = first_attempt.max(1);

  loop {
    info!(run_id = %run_id, node_id = %node.node_id, attempt, "node_started");
    notifier.notify(ExecutionEvent::NodeStarted {
      run_id: run_id.clone(),
      node_id: node.node_id.clone(),
      attempt,
    });

    let ctx = TaskContext::new(run_id.as_str(), node.node_id.as_str(), run.clone())
      .with_attempt(attempt)
      .with_cancel(cancel.clone());

    let started_at = Utc::now();
    let result = match tokio::time::timeout(timeout, registry.dispatch(&node.subtype, &config, &ctx)).await {
      Ok(result) => result,
      Err(_) => Err(TaskError::Timeout { timeout_ms }),
    };
    let completed_at = Utc::now();

    match result {
      Ok(outcome) => {
        attempts.push(Attempt {
          attempt,
          started_at,
          completed_at,
          error: None,
        });
        return Supervised {
          node_id: node.node_id,
          attempts,
          outcome: Ok(outcome),
        };
      }
      Err(e) => {
        attempts.push(Attempt {
          attempt,
          started_at,
          completed_at,
          error: Some(e.to_string()),
        });

        if attempt >= max || !e.is_retryable() || cancel.is_cancelled() {
          return Supervised {
            node_id: node.node_id,
            attempts,
            outcome: Err(e),
          };
        }

        let delay = retry_delay(&node.error_policy, attempt, retry_cap);
        warn!(
          run_id = %run_id,
          node_id = %node.node_id,
          attempt,
          max_attempts = max,
          delay_ms = delay.as_millis() as u64,
          error = %e,
          "node_retrying"
        );
        notifier.notify(ExecutionEvent::NodeRetrying {
          run_id: run_id.clone(),
          node_id: node.node_id.clone(),
          attempt,
          delay_ms: delay.as_millis() as u64,
        });

        tokio::select! {
          _ = cancel.cancelled() => {
            return Supervised {
              node_id: node.node_id,
              attempts,
              outcome: Err(e),
            };
          }
          _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
      }
    }
  }
}
