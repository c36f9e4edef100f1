use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Client;
use serde_json::{Map, Value};

use crate::code::CustomCodeHandler;
use crate::contact::{
  AddTagHandler, ContactDirectory, CreateContactHandler, InMemoryContacts, UpdateContactHandler,
};
use crate::delay::{DelayHandler, WaitForConditionHandler, WaitForEventHandler};
use crate::email::{LogMailer, Mailer, SendEmailHandler};
use crate::error::TaskError;
use crate::handler::NodeHandler;
use crate::http::HttpHandler;
use crate::log::LogHandler;
use crate::logic::{ConditionHandler, DateRangeHandler, FilterHandler, ScoreThresholdHandler};
use crate::types::{TaskContext, TaskOutcome};

/// Collaborators the built-in handlers talk to.
#[derive(Clone)]
pub struct Builtins {
  pub mailer: Arc<dyn Mailer>,
  pub contacts: Arc<dyn ContactDirectory>,
  pub http: Client,
}

impl Default for Builtins {
  fn default() -> Self {
    Self {
      mailer: Arc::new(LogMailer),
      contacts: Arc::new(InMemoryContacts::new()),
      http: Client::new(),
    }
  }
}

/// Maps node subtypes to handlers.
///
/// Built once at process start and handed to the engine.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
  handlers: HashMap<String, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
  /// An empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry with every built-in subtype registered.
  pub fn with_builtins(builtins: Builtins) -> Self {
    let mut registry = Self::new();
    let Builtins {
      mailer,
      contacts,
      http,
    } = builtins;

    registry.register("send_email", Arc::new(SendEmailHandler::new(mailer)));
    registry.register(
      "create_contact",
      Arc::new(CreateContactHandler::new(contacts.clone())),
    );
    registry.register(
      "update_contact",
      Arc::new(UpdateContactHandler::new(contacts.clone())),
    );
    registry.register("add_tag", Arc::new(AddTagHandler::new(contacts)));
    registry.register("http_request", Arc::new(HttpHandler::new(http.clone())));
    registry.register("api_call", Arc::new(HttpHandler::new(http.clone())));
    registry.register("webhook_call", Arc::new(HttpHandler::webhook(http)));
    registry.register("delay", Arc::new(DelayHandler));
    registry.register("wait_for_event", Arc::new(WaitForEventHandler));
    registry.register("wait_for_condition", Arc::new(WaitForConditionHandler));
    registry.register("custom_code", Arc::new(CustomCodeHandler));
    registry.register("condition", Arc::new(ConditionHandler));
    registry.register("score_threshold", Arc::new(ScoreThresholdHandler));
    registry.register("date_range", Arc::new(DateRangeHandler));
    registry.register("filter", Arc::new(FilterHandler));
    registry.register("log", Arc::new(LogHandler));

    registry
  }

  /// Register (or replace) the handler for a subtype.
  pub fn register(&mut self, subtype: impl Into<String>, handler: Arc<dyn NodeHandler>) {
    self.handlers.insert(subtype.into(), handler);
  }

  pub fn get(&self, subtype: &str) -> Result<Arc<dyn NodeHandler>, TaskError> {
    self
      .handlers
      .get(subtype)
      .cloned()
      .ok_or_else(|| TaskError::UnsupportedNode {
        subtype: subtype.to_string(),
      })
  }

  pub fn contains(&self, subtype: &str) -> bool {
    self.handlers.contains_key(subtype)
  }

  /// Registered subtypes, sorted.
  pub fn subtypes(&self) -> Vec<&str> {
    let mut subtypes: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
    subtypes.sort_unstable();
    subtypes
  }

  /// Look up and run the handler for `subtype`.
  ///
  /// A suspension from a handler that may not suspend is a handler error.
  pub async fn dispatch(
    &self,
    subtype: &str,
    config: &Map<String, Value>,
    ctx: &TaskContext,
  ) -> Result<TaskOutcome, TaskError> {
    let handler = self.get(subtype)?;
    let outcome = handler.execute(config, ctx).await?;

    if matches!(outcome, TaskOutcome::Suspend(_)) && !handler.may_suspend() {
      return Err(TaskError::handler(format!(
        "subtype '{}' is not allowed to suspend",
        subtype
      )));
    }

    Ok(outcome)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{SuspendRequest, TaskOutput};
  use async_trait::async_trait;
  use flowline_context::RunContext;
  use std::time::Duration;

  struct Rogue;

  #[async_trait]
  impl NodeHandler for Rogue {
    async fn execute(
      &self,
      _config: &Map<String, Value>,
      _ctx: &TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
      Ok(TaskOutcome::Suspend(SuspendRequest::Delay {
        duration: Duration::from_secs(1),
      }))
    }
  }

  struct Echo;

  #[async_trait]
  impl NodeHandler for Echo {
    async fn execute(
      &self,
      config: &Map<String, Value>,
      _ctx: &TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
      Ok(TaskOutcome::Completed(TaskOutput::new(config.clone())))
    }
  }

  fn ctx() -> TaskContext {
    TaskContext::new("run", "n", Arc::new(RunContext::default()))
  }

  #[test]
  fn test_builtins_registered() {
    let registry = HandlerRegistry::with_builtins(Builtins::default());
    for subtype in [
      "send_email",
      "create_contact",
      "update_contact",
      "add_tag",
      "http_request",
      "webhook_call",
      "api_call",
      "delay",
      "wait_for_event",
      "wait_for_condition",
      "custom_code",
      "condition",
      "score_threshold",
      "date_range",
      "filter",
      "log",
    ] {
      assert!(registry.contains(subtype), "missing {}", subtype);
    }
  }

  #[tokio::test]
  async fn test_unknown_subtype() {
    let registry = HandlerRegistry::new();
    let err = registry
      .dispatch("teleport", &Map::new(), &ctx())
      .await
      .unwrap_err();
    assert!(matches!(err, TaskError::UnsupportedNode { subtype } if subtype == "teleport"));
  }

  #[tokio::test]
  async fn test_dispatch_and_suspend_guard() {
    let mut registry = HandlerRegistry::new();
    registry.register("echo", Arc::new(Echo));
    registry.register("rogue", Arc::new(Rogue));

    let mut config = Map::new();
    config.insert("k".to_string(), Value::from(1));
    let outcome = registry.dispatch("echo", &config, &ctx()).await.unwrap();
    assert_eq!(outcome, TaskOutcome::Completed(TaskOutput::new(config)));

    let err = registry
      .dispatch("rogue", &Map::new(), &ctx())
      .await
      .unwrap_err();
    assert!(matches!(err, TaskError::Handler { .. }));
  }
}
