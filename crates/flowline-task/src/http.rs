use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::TaskError;
use crate::handler::{NodeHandler, parse_config, require};
use crate::types::{TaskContext, TaskOutcome, TaskOutput};

/// Expected config for HTTP nodes.
#[derive(Debug, Deserialize)]
struct HttpConfig {
  method: Option<String>,
  url: Option<String>,
  #[serde(default)]
  headers: HashMap<String, String>,
  #[serde(default)]
  body: Option<Value>,
  /// Treat non-2xx responses as failures. Defaults to true.
  #[serde(default = "default_true")]
  fail_on_status: bool,
}

fn default_true() -> bool {
  true
}

/// `http_request`, `webhook_call` and `api_call`.
///
/// They differ only in the default method: `webhook_call` posts, the others
/// get.
pub struct HttpHandler {
  client: Client,
  default_method: Method,
}

impl HttpHandler {
  pub fn new(client: Client) -> Self {
    Self {
      client,
      default_method: Method::GET,
    }
  }

  pub fn webhook(client: Client) -> Self {
    Self {
      client,
      default_method: Method::POST,
    }
  }

  async fn send(&self, config: HttpConfig) -> Result<TaskOutput, TaskError> {
    let method = match config.method.as_deref().filter(|m| !m.is_empty()) {
      Some(m) => parse_method(m)?,
      None => self.default_method.clone(),
    };
    let url = require("url", config.url)?;

    let mut request = self.client.request(method.clone(), &url);
    for (key, value) in &config.headers {
      request = request.header(key, value);
    }
    if let Some(body) = &config.body {
      request = request.json(body);
    }

    debug!(method = %method, url = %url, "http_request");
    let response = request.send().await?;

    let status = response.status();
    let headers: HashMap<String, String> = response
      .headers()
      .iter()
      .filter_map(|(k, v)| {
        v.to_str()
          .ok()
          .map(|val| (k.as_str().to_string(), val.to_string()))
      })
      .collect();

    let body = response.text().await?;

    if config.fail_on_status && !status.is_success() {
      return Err(TaskError::handler(format!(
        "{} {} returned {}",
        method, url, status
      )));
    }

    // Try to parse body as JSON, fall back to string
    let body_value = serde_json::from_str(&body).unwrap_or(Value::String(body));

    Ok(TaskOutput::from_value(json!({
      "status": status.as_u16(),
      "headers": headers,
      "body": body_value,
    })))
  }
}

#[async_trait]
impl NodeHandler for HttpHandler {
  async fn execute(
    &self,
    config: &Map<String, Value>,
    ctx: &TaskContext,
  ) -> Result<TaskOutcome, TaskError> {
    let config: HttpConfig = parse_config(config)?;

    tokio::select! {
      biased;
      _ = ctx.cancel.cancelled() => Err(TaskError::Cancelled),
      result = self.send(config) => result.map(TaskOutcome::Completed),
    }
  }
}

fn parse_method(method: &str) -> Result<Method, TaskError> {
  match method.to_uppercase().as_str() {
    "GET" => Ok(Method::GET),
    "POST" => Ok(Method::POST),
    "PUT" => Ok(Method::PUT),
    "DELETE" => Ok(Method::DELETE),
    "PATCH" => Ok(Method::PATCH),
    "HEAD" => Ok(Method::HEAD),
    "OPTIONS" => Ok(Method::OPTIONS),
    _ => Err(TaskError::InvalidInput {
      field: "method".to_string(),
      message: format!("unsupported HTTP method: {}", method),
    }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use flowline_context::RunContext;
  use std::sync::Arc;

  fn ctx() -> TaskContext {
    TaskContext::new("run", "call", Arc::new(RunContext::default()))
  }

  #[test]
  fn test_parse_method() {
    assert_eq!(parse_method("post").unwrap(), Method::POST);
    assert!(matches!(
      parse_method("BREW"),
      Err(TaskError::InvalidInput { .. })
    ));
  }

  #[tokio::test]
  async fn test_missing_url() {
    let handler = HttpHandler::new(Client::new());
    let config = json!({ "url": "" });

    let err = handler
      .execute(config.as_object().unwrap(), &ctx())
      .await
      .unwrap_err();

    assert!(matches!(err, TaskError::MissingInput { ref field } if field == "url"));
    assert!(!err.is_retryable());
  }

  #[tokio::test]
  async fn test_cancelled_before_send() {
    let handler = HttpHandler::webhook(Client::new());
    let ctx = ctx();
    ctx.cancel.cancel();
    let config = json!({ "url": "http://127.0.0.1:9/hook" });

    let err = handler
      .execute(config.as_object().unwrap(), &ctx)
      .await
      .unwrap_err();

    assert!(matches!(err, TaskError::Cancelled));
  }
}
