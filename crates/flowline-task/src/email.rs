use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::info;

use crate::error::TaskError;
use crate::handler::{NodeHandler, parse_config, require};
use crate::types::{TaskContext, TaskOutcome, TaskOutput};

#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
  pub to: String,
  pub from: Option<String>,
  pub subject: String,
  pub body: String,
}

/// Outbound email transport.
#[async_trait]
pub trait Mailer: Send + Sync {
  /// Send a message, returning the provider's message id.
  async fn send(&self, message: &EmailMessage) -> Result<String, TaskError>;
}

/// Mailer that only records the send in the log.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
  async fn send(&self, message: &EmailMessage) -> Result<String, TaskError> {
    let message_id = uuid::Uuid::new_v4().to_string();
    info!(
      message_id = %message_id,
      to = %message.to,
      subject = %message.subject,
      "email_sent"
    );
    Ok(message_id)
  }
}

#[derive(Debug, Deserialize)]
struct EmailConfig {
  to: Option<String>,
  from: Option<String>,
  #[serde(default)]
  subject: String,
  #[serde(default)]
  body: String,
}

/// `send_email`. Not retryable: a second attempt could deliver twice.
pub struct SendEmailHandler {
  mailer: Arc<dyn Mailer>,
}

impl SendEmailHandler {
  pub fn new(mailer: Arc<dyn Mailer>) -> Self {
    Self { mailer }
  }
}

#[async_trait]
impl NodeHandler for SendEmailHandler {
  async fn execute(
    &self,
    config: &Map<String, Value>,
    _ctx: &TaskContext,
  ) -> Result<TaskOutcome, TaskError> {
    let config: EmailConfig = parse_config(config)?;
    let message = EmailMessage {
      to: require("to", config.to)?,
      from: config.from.filter(|f| !f.is_empty()),
      subject: config.subject,
      body: config.body,
    };

    let message_id = self.mailer.send(&message).await?;

    Ok(TaskOutcome::Completed(TaskOutput::from_value(json!({
      "message_id": message_id,
      "to": message.to,
    }))))
  }

  fn retryable(&self) -> bool {
    false
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use flowline_context::RunContext;
  use std::sync::Mutex;

  #[derive(Default)]
  struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
  }

  #[async_trait]
  impl Mailer for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> Result<String, TaskError> {
      self.sent.lock().unwrap().push(message.clone());
      Ok("msg-1".to_string())
    }
  }

  fn ctx() -> TaskContext {
    TaskContext::new("run", "email", Arc::new(RunContext::default()))
  }

  #[tokio::test]
  async fn test_sends_through_mailer() {
    let mailer = Arc::new(RecordingMailer::default());
    let handler = SendEmailHandler::new(mailer.clone());
    let config = json!({ "to": "a@b.com", "subject": "Hi", "body": "Welcome" });

    let outcome = handler
      .execute(config.as_object().unwrap(), &ctx())
      .await
      .unwrap();

    let TaskOutcome::Completed(out) = outcome else {
      panic!("expected completion");
    };
    assert_eq!(out.output["message_id"], json!("msg-1"));
    assert_eq!(mailer.sent.lock().unwrap()[0].subject, "Hi");
    assert!(!handler.retryable());
  }

  #[tokio::test]
  async fn test_empty_recipient_rejected() {
    let handler = SendEmailHandler::new(Arc::new(LogMailer));
    // An unresolved `{{trigger.email}}` arrives as ""
    let config = json!({ "to": "", "subject": "Hi" });

    let err = handler
      .execute(config.as_object().unwrap(), &ctx())
      .await
      .unwrap_err();

    assert!(matches!(err, TaskError::MissingInput { field } if field == "to"));
  }
}
