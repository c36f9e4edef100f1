use std::fmt;

use serde::{Deserialize, Serialize};

/// The role a node plays in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
  Trigger,
  Action,
  Condition,
  Filter,
  Delay,
}

/// How a connection gates its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
  #[default]
  Always,
  If,
  Unless,
}

/// Per-node reaction to a failed dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
  #[default]
  Stop,
  Continue,
  Retry,
  Fallback,
  Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
  #[default]
  Fixed,
  Linear,
  Exponential,
}

/// Where an error notification is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
  Email,
  InApp,
  Log,
}

/// The adapter that produced a trigger event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
  Webhook,
  Schedule,
  Event,
  Api,
  #[default]
  Manual,
}

impl TriggerType {
  pub fn as_str(&self) -> &'static str {
    match self {
      TriggerType::Webhook => "webhook",
      TriggerType::Schedule => "schedule",
      TriggerType::Event => "event",
      TriggerType::Api => "api",
      TriggerType::Manual => "manual",
    }
  }
}

impl fmt::Display for TriggerType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for TriggerType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "webhook" => Ok(TriggerType::Webhook),
      "schedule" => Ok(TriggerType::Schedule),
      "event" => Ok(TriggerType::Event),
      "api" => Ok(TriggerType::Api),
      "manual" => Ok(TriggerType::Manual),
      other => Err(format!("unknown trigger type: {}", other)),
    }
  }
}
