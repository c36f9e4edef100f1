use serde::{Deserialize, Serialize};

use crate::enums::{BackoffStrategy, NotificationChannel, OnError};

/// Error policy as authored on a node.
///
/// `retry_delay` is in seconds and is the base delay fed to the backoff
/// strategy.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPolicyDef {
  #[serde(default)]
  pub on_error: OnError,
  #[serde(default)]
  pub max_retries: u32,
  #[serde(default)]
  pub retry_delay: u64,
  #[serde(default)]
  pub backoff_strategy: BackoffStrategy,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub fallback_node_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub default_output: Option<serde_json::Map<String, serde_json::Value>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error_notification: Option<ErrorNotificationDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorNotificationDef {
  pub channel: NotificationChannel,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub recipient: Option<String>,
}
