//! Condition and filter subtypes.
//!
//! Condition nodes publish `{"result": bool}` for outgoing `if`/`unless`
//! connections to test, e.g. `{"path": "score.result", "operator": "equals",
//! "value": true}`. A filter whose predicate fails halts its branch.

use async_trait::async_trait;
use flowline_context::condition::{as_datetime, as_number};
use flowline_context::{RunContext, evaluate_or_false, resolve_value};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::error::TaskError;
use crate::handler::{NodeHandler, parse_config};
use crate::types::{TaskContext, TaskOutcome, TaskOutput};

/// The predicate of a node config: either under `condition`, or the config
/// itself when it looks like a predicate.
fn predicate_of(config: &Map<String, Value>) -> Result<Value, TaskError> {
  if let Some(predicate) = config.get("condition") {
    return Ok(predicate.clone());
  }
  let inline = ["operator", "all", "any", "not"]
    .iter()
    .any(|k| config.contains_key(*k));
  if inline {
    return Ok(Value::Object(config.clone()));
  }
  Err(TaskError::MissingInput {
    field: "condition".to_string(),
  })
}

fn path_value<'a>(run: &'a RunContext, field: &str) -> Option<&'a Value> {
  let field = field.trim();
  let field = field
    .strip_prefix("{{")
    .and_then(|f| f.strip_suffix("}}"))
    .unwrap_or(field);
  run.lookup(field.trim())
}

fn result(value: bool, extra: Value) -> TaskOutcome {
  let mut out = TaskOutput::from_value(json!({ "result": value }));
  if let Value::Object(extra) = extra {
    out.output.extend(extra);
  }
  TaskOutcome::Completed(out)
}

/// `condition`: generic predicate.
pub struct ConditionHandler;

#[async_trait]
impl NodeHandler for ConditionHandler {
  async fn execute(
    &self,
    config: &Map<String, Value>,
    ctx: &TaskContext,
  ) -> Result<TaskOutcome, TaskError> {
    let predicate = predicate_of(config)?;
    Ok(result(evaluate_or_false(&predicate, &ctx.run), Value::Null))
  }

  fn resolve_templates(&self) -> bool {
    false
  }
}

#[derive(Debug, Deserialize)]
struct ScoreConfig {
  #[serde(default = "default_score_field")]
  field: String,
  threshold: Value,
  /// Compare with `>=` instead of `>`.
  #[serde(default)]
  inclusive: bool,
}

fn default_score_field() -> String {
  "trigger.score".to_string()
}

/// `score_threshold`: passes when the score exceeds the threshold. A missing
/// or non-numeric score fails closed.
pub struct ScoreThresholdHandler;

#[async_trait]
impl NodeHandler for ScoreThresholdHandler {
  async fn execute(
    &self,
    config: &Map<String, Value>,
    ctx: &TaskContext,
  ) -> Result<TaskOutcome, TaskError> {
    let config: ScoreConfig = parse_config(config)?;
    let threshold = as_number(&resolve_value(&config.threshold, &ctx.run).value).ok_or_else(|| {
      TaskError::InvalidInput {
        field: "threshold".to_string(),
        message: "expected a number".to_string(),
      }
    })?;

    let score = path_value(&ctx.run, &config.field).cloned();
    let passed = match score.as_ref().and_then(as_number) {
      Some(s) if config.inclusive => s >= threshold,
      Some(s) => s > threshold,
      None => false,
    };

    Ok(result(
      passed,
      json!({ "score": score, "threshold": threshold }),
    ))
  }

  fn resolve_templates(&self) -> bool {
    false
  }
}

#[derive(Debug, Deserialize)]
struct DateRangeConfig {
  field: String,
  start: Option<Value>,
  end: Option<Value>,
}

/// `date_range`: passes when the date at `field` lies within `[start, end]`.
/// Either bound may be omitted.
pub struct DateRangeHandler;

#[async_trait]
impl NodeHandler for DateRangeHandler {
  async fn execute(
    &self,
    config: &Map<String, Value>,
    ctx: &TaskContext,
  ) -> Result<TaskOutcome, TaskError> {
    let config: DateRangeConfig = parse_config(config)?;
    let bound = |b: &Option<Value>| -> Result<Option<_>, TaskError> {
      match b {
        None | Some(Value::Null) => Ok(None),
        Some(v) => as_datetime(&resolve_value(v, &ctx.run).value)
          .map(Some)
          .ok_or_else(|| TaskError::InvalidInput {
            field: "date_range".to_string(),
            message: format!("not a date: {}", v),
          }),
      }
    };
    let start = bound(&config.start)?;
    let end = bound(&config.end)?;

    let passed = match path_value(&ctx.run, &config.field).and_then(as_datetime) {
      Some(at) => start.is_none_or(|s| at >= s) && end.is_none_or(|e| at <= e),
      None => false,
    };

    Ok(result(passed, Value::Null))
  }

  fn resolve_templates(&self) -> bool {
    false
  }
}

/// `filter`: lets the branch continue only when the predicate holds.
pub struct FilterHandler;

#[async_trait]
impl NodeHandler for FilterHandler {
  async fn execute(
    &self,
    config: &Map<String, Value>,
    ctx: &TaskContext,
  ) -> Result<TaskOutcome, TaskError> {
    let predicate = predicate_of(config)?;
    let passed = evaluate_or_false(&predicate, &ctx.run);

    let out = TaskOutput::from_value(json!({ "passed": passed }));
    Ok(TaskOutcome::Completed(if passed { out } else { out.halted() }))
  }

  fn resolve_templates(&self) -> bool {
    false
  }
}
