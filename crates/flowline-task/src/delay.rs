//! Suspending handlers: `delay`, `wait_for_event`, `wait_for_condition`.
//!
//! None of them sleep. They return a [`SuspendRequest`] and the engine
//! persists it, so a parked branch survives a restart.

use std::time::Duration;

use async_trait::async_trait;
use flowline_context::condition::as_number;
use flowline_context::evaluate_or_false;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::error::TaskError;
use crate::handler::{NodeHandler, parse_config, require};
use crate::types::{SuspendRequest, TaskContext, TaskOutcome, TaskOutput};

/// Convert an amount and unit name into a duration. Unit defaults to minutes.
pub fn duration_from(amount: &Value, unit: Option<&str>) -> Result<Duration, TaskError> {
  let amount = as_number(amount)
    .filter(|n| *n >= 0.0)
    .ok_or_else(|| TaskError::InvalidInput {
      field: "duration".to_string(),
      message: format!("expected a non-negative number, got {}", amount),
    })?;

  let seconds_per_unit = match unit.unwrap_or("minutes") {
    "ms" | "millisecond" | "milliseconds" => 0.001,
    "s" | "second" | "seconds" => 1.0,
    "m" | "minute" | "minutes" => 60.0,
    "h" | "hour" | "hours" => 3_600.0,
    "d" | "day" | "days" => 86_400.0,
    other => {
      return Err(TaskError::InvalidInput {
        field: "unit".to_string(),
        message: format!("unknown unit: {}", other),
      });
    }
  };

  Duration::try_from_secs_f64(amount * seconds_per_unit).map_err(|e| TaskError::InvalidInput {
    field: "duration".to_string(),
    message: e.to_string(),
  })
}

fn optional_timeout(timeout: Option<Value>, unit: Option<&str>) -> Result<Option<Duration>, TaskError> {
  match timeout {
    None | Some(Value::Null) => Ok(None),
    Some(Value::String(s)) if s.is_empty() => Ok(None),
    Some(v) => duration_from(&v, unit).map(Some),
  }
}

#[derive(Debug, Deserialize)]
struct DelayConfig {
  #[serde(default)]
  duration: Value,
  unit: Option<String>,
}

/// `delay`
pub struct DelayHandler;

#[async_trait]
impl NodeHandler for DelayHandler {
  async fn execute(
    &self,
    config: &Map<String, Value>,
    _ctx: &TaskContext,
  ) -> Result<TaskOutcome, TaskError> {
    let config: DelayConfig = parse_config(config)?;
    let duration = duration_from(&config.duration, config.unit.as_deref())?;

    if duration.is_zero() {
      return Ok(TaskOutcome::Completed(TaskOutput::from_value(
        json!({ "delayed_ms": 0 }),
      )));
    }

    Ok(TaskOutcome::Suspend(SuspendRequest::Delay { duration }))
  }

  fn may_suspend(&self) -> bool {
    true
  }
}

#[derive(Debug, Deserialize)]
struct WaitEventConfig {
  #[serde(alias = "event_name")]
  event: Option<String>,
  timeout: Option<Value>,
  timeout_unit: Option<String>,
}

/// `wait_for_event`
pub struct WaitForEventHandler;

#[async_trait]
impl NodeHandler for WaitForEventHandler {
  async fn execute(
    &self,
    config: &Map<String, Value>,
    _ctx: &TaskContext,
  ) -> Result<TaskOutcome, TaskError> {
    let config: WaitEventConfig = parse_config(config)?;

    Ok(TaskOutcome::Suspend(SuspendRequest::Event {
      event_name: require("event", config.event)?,
      timeout: optional_timeout(config.timeout, config.timeout_unit.as_deref())?,
    }))
  }

  fn may_suspend(&self) -> bool {
    true
  }
}

#[derive(Debug, Deserialize)]
struct WaitConditionConfig {
  condition: Option<Value>,
  timeout: Option<Value>,
  timeout_unit: Option<String>,
}

/// `wait_for_condition`. Completes at once if the predicate already holds.
pub struct WaitForConditionHandler;

#[async_trait]
impl NodeHandler for WaitForConditionHandler {
  async fn execute(
    &self,
    config: &Map<String, Value>,
    ctx: &TaskContext,
  ) -> Result<TaskOutcome, TaskError> {
    let config: WaitConditionConfig = parse_config(config)?;
    let predicate = config.condition.ok_or_else(|| TaskError::MissingInput {
      field: "condition".to_string(),
    })?;
    let timeout = optional_timeout(config.timeout, config.timeout_unit.as_deref())?;

    if evaluate_or_false(&predicate, &ctx.run) {
      return Ok(TaskOutcome::Completed(TaskOutput::from_value(
        json!({ "satisfied": true }),
      )));
    }

    Ok(TaskOutcome::Suspend(SuspendRequest::Condition {
      predicate,
      timeout,
    }))
  }

  fn may_suspend(&self) -> bool {
    true
  }

  fn resolve_templates(&self) -> bool {
    false
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use flowline_context::RunContext;
  use std::sync::Arc;

  fn ctx(trigger: Value) -> TaskContext {
    TaskContext::new("run", "wait", Arc::new(RunContext::new(trigger)))
  }

  #[test]
  fn test_duration_units() {
    assert_eq!(duration_from(&json!(5), None).unwrap(), Duration::from_secs(300));
    assert_eq!(
      duration_from(&json!("2"), Some("hours")).unwrap(),
      Duration::from_secs(7_200)
    );
    assert_eq!(
      duration_from(&json!(1.5), Some("seconds")).unwrap(),
      Duration::from_millis(1_500)
    );
    assert!(duration_from(&json!(-1), None).is_err());
    assert!(duration_from(&json!(1), Some("fortnights")).is_err());
    assert!(duration_from(&json!("soon"), None).is_err());
  }

  #[tokio::test]
  async fn test_delay_suspends() {
    let config = json!({ "duration": 5, "unit": "minutes" });
    let outcome = DelayHandler
      .execute(config.as_object().unwrap(), &ctx(json!({})))
      .await
      .unwrap();

    assert_eq!(
      outcome,
      TaskOutcome::Suspend(SuspendRequest::Delay {
        duration: Duration::from_secs(300)
      })
    );
  }

  #[tokio::test]
  async fn test_wait_for_event_requires_name() {
    let config = json!({ "timeout": 1 });
    let err = WaitForEventHandler
      .execute(config.as_object().unwrap(), &ctx(json!({})))
      .await
      .unwrap_err();
    assert!(matches!(err, TaskError::MissingInput { .. }));

    let config = json!({ "event": "invoice.paid", "timeout": 2, "timeout_unit": "days" });
    let outcome = WaitForEventHandler
      .execute(config.as_object().unwrap(), &ctx(json!({})))
      .await
      .unwrap();
    assert_eq!(
      outcome,
      TaskOutcome::Suspend(SuspendRequest::Event {
        event_name: "invoice.paid".to_string(),
        timeout: Some(Duration::from_secs(172_800)),
      })
    );
  }

  #[tokio::test]
  async fn test_wait_for_condition_short_circuits() {
    let config = json!({
      "condition": { "path": "trigger.paid", "operator": "equals", "value": true }
    });

    let done = WaitForConditionHandler
      .execute(config.as_object().unwrap(), &ctx(json!({ "paid": true })))
      .await
      .unwrap();
    assert!(matches!(done, TaskOutcome::Completed(_)));

    let parked = WaitForConditionHandler
      .execute(config.as_object().unwrap(), &ctx(json!({ "paid": false })))
      .await
      .unwrap();
    assert!(matches!(
      parked,
      TaskOutcome::Suspend(SuspendRequest::Condition { timeout: None, .. })
    ));
  }
}
