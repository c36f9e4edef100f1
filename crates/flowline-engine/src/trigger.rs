use chrono::{DateTime, Utc};
use flowline_config::TriggerType;
use serde::{Deserialize, Serialize};

/// An adapter's request to run an automation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEvent {
  pub automation_id: String,
  pub trigger_type: TriggerType,
  #[serde(default)]
  pub payload: serde_json::Value,
  pub received_at: DateTime<Utc>,
  /// Dedup key. Webhook adapters should supply one; schedule and manual
  /// triggers may omit it.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub external_event_id: Option<String>,
}

impl TriggerEvent {
  pub fn new(
    automation_id: impl Into<String>,
    trigger_type: TriggerType,
    payload: serde_json::Value,
  ) -> Self {
    Self {
      automation_id: automation_id.into(),
      trigger_type,
      payload,
      received_at: Utc::now(),
      external_event_id: None,
    }
  }

  pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
    self.external_event_id = Some(event_id.into());
    self
  }
}
