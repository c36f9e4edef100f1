use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{error, info, warn};

use crate::error::TaskError;
use crate::handler::{NodeHandler, parse_config};
use crate::types::{TaskContext, TaskOutcome, TaskOutput};

#[derive(Debug, Deserialize)]
struct LogConfig {
  #[serde(default)]
  message: String,
  #[serde(default)]
  level: Option<String>,
}

/// `log`: write a message to the run's log.
pub struct LogHandler;

#[async_trait]
impl NodeHandler for LogHandler {
  async fn execute(
    &self,
    config: &Map<String, Value>,
    ctx: &TaskContext,
  ) -> Result<TaskOutcome, TaskError> {
    let config: LogConfig = parse_config(config)?;

    match config.level.as_deref() {
      Some("error") => error!(run_id = %ctx.run_id, node_id = %ctx.node_id, "{}", config.message),
      Some("warn") => warn!(run_id = %ctx.run_id, node_id = %ctx.node_id, "{}", config.message),
      _ => info!(run_id = %ctx.run_id, node_id = %ctx.node_id, "{}", config.message),
    }

    Ok(TaskOutcome::Completed(TaskOutput::from_value(
      json!({ "message": config.message }),
    )))
  }
}
