//! `custom_code`: evaluate a sandboxed expression against the run context.
//!
//! The expression language is minijinja's expression syntax. The context
//! exposes `trigger`, `nodes` (outputs keyed by node id, for ids that aren't
//! valid identifiers), every node output by its id, and `vars` from config:
//! ```json
//! { "code": "trigger.amount * 1.2 if trigger.country == 'DE' else trigger.amount" }
//! ```
//!
//! Evaluation is bounded twice: by `timeout_ms`, and by `fuel`, the number of
//! VM instructions it may execute. Fuel is what actually stops a runaway
//! expression; the timeout only stops waiting for it.

use std::time::Duration;

use async_trait::async_trait;
use minijinja::{Environment, ErrorKind};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::error::TaskError;
use crate::handler::{NodeHandler, parse_config, require};
use crate::types::{TaskContext, TaskOutcome, TaskOutput};

const DEFAULT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_FUEL: u64 = 50_000;

#[derive(Debug, Deserialize)]
struct CodeConfig {
  #[serde(alias = "expression")]
  code: Option<String>,
  timeout_ms: Option<u64>,
  fuel: Option<u64>,
  #[serde(default)]
  vars: Map<String, Value>,
}

pub struct CustomCodeHandler;

#[async_trait]
impl NodeHandler for CustomCodeHandler {
  async fn execute(
    &self,
    config: &Map<String, Value>,
    ctx: &TaskContext,
  ) -> Result<TaskOutcome, TaskError> {
    let config: CodeConfig = parse_config(config)?;
    let code = require("code", config.code)?;
    let timeout_ms = config.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
    let fuel = config.fuel.unwrap_or(DEFAULT_FUEL);

    let mut scope = Map::new();
    scope.insert("trigger".to_string(), ctx.run.trigger_data().clone());
    let nodes: Map<String, Value> = ctx
      .run
      .node_outputs()
      .iter()
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect();
    for (id, output) in &nodes {
      scope.entry(id.clone()).or_insert_with(|| output.clone());
    }
    scope.insert("nodes".to_string(), Value::Object(nodes));
    scope.insert("vars".to_string(), Value::Object(config.vars));

    // The evaluation thread cannot be interrupted; on timeout or cancel the
    // result is abandoned and the thread runs until its fuel is spent.
    let eval =
      tokio::task::spawn_blocking(move || eval_expression(&code, fuel, &Value::Object(scope)));

    let joined = tokio::select! {
      biased;
      _ = ctx.cancel.cancelled() => return Err(TaskError::Cancelled),
      joined = tokio::time::timeout(Duration::from_millis(timeout_ms), eval) => joined,
    };

    let result = joined
      .map_err(|_| TaskError::Timeout { timeout_ms })?
      .map_err(|e| TaskError::handler(format!("custom code panicked: {}", e)))??;

    Ok(TaskOutcome::Completed(TaskOutput::from_value(
      json!({ "result": result }),
    )))
  }
}

fn eval_expression(code: &str, fuel: u64, scope: &Value) -> Result<Value, TaskError> {
  let mut env = Environment::new();
  env.set_fuel(Some(fuel));
  let expr = env
    .compile_expression(code)
    .map_err(|e| TaskError::InvalidInput {
      field: "code".to_string(),
      message: e.to_string(),
    })?;
  let value = expr
    .eval(minijinja::Value::from_serialize(scope))
    .map_err(|e| match e.kind() {
      // Deterministic, so never retried
      ErrorKind::OutOfFuel => TaskError::InvalidInput {
        field: "code".to_string(),
        message: format!("expression exceeded {} instructions", fuel),
      },
      _ => TaskError::handler(format!("custom code failed: {}", e)),
    })?;

  serde_json::to_value(&value).map_err(|e| TaskError::handler(e.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use flowline_context::RunContext;
  use std::sync::Arc;

  fn ctx() -> TaskContext {
    let mut run = RunContext::new(json!({ "amount": 100, "country": "DE" }));
    run.record_output("lookup", json!({ "rate": 3 }));
    TaskContext::new("run", "code", Arc::new(run))
  }

  async fn run(config: Value) -> Result<TaskOutcome, TaskError> {
    CustomCodeHandler
      .execute(config.as_object().unwrap(), &ctx())
      .await
  }

  #[tokio::test]
  async fn test_evaluates_against_context() {
    let outcome = run(json!({
      "code": "trigger.amount * lookup.rate + vars.bonus if trigger.country == 'DE' else 0",
      "vars": { "bonus": 1 }
    }))
    .await
    .unwrap();

    let TaskOutcome::Completed(out) = outcome else {
      panic!("expected completion");
    };
    assert_eq!(out.output["result"], json!(301));
  }

  #[tokio::test]
  async fn test_syntax_error_is_invalid_input() {
    let err = run(json!({ "code": "trigger.amount +" })).await.unwrap_err();
    assert!(matches!(err, TaskError::InvalidInput { .. }));
  }

  #[tokio::test]
  async fn test_runaway_expression_stops_on_fuel() {
    let err = run(json!({
      "code": "trigger.amount + trigger.amount + trigger.amount + trigger.amount + trigger.amount",
      "fuel": 3
    }))
    .await
    .unwrap_err();

    assert!(matches!(err, TaskError::InvalidInput { ref message, .. } if message.contains("3 instructions")));
    assert!(!err.is_retryable());
  }

  #[tokio::test]
  async fn test_default_fuel_is_enough_for_ordinary_code() {
    let outcome = run(json!({ "code": "[trigger.amount, lookup.rate] | sum" }))
      .await
      .unwrap();

    let TaskOutcome::Completed(out) = outcome else {
      panic!("expected completion");
    };
    assert_eq!(out.output["result"], json!(103));
  }

  #[tokio::test]
  async fn test_cancelled() {
    let ctx = ctx();
    ctx.cancel.cancel();
    let config = json!({ "code": "1 + 1" });

    let err = CustomCodeHandler
      .execute(config.as_object().unwrap(), &ctx)
      .await
      .unwrap_err();

    assert!(matches!(err, TaskError::Cancelled));
  }
}
