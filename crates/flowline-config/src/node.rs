use serde::{Deserialize, Serialize};

use crate::enums::NodeKind;
use crate::policy::ErrorPolicyDef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDef {
  pub id: String,
  #[serde(rename = "type")]
  pub kind: NodeKind,
  /// Key into the handler registry, e.g. "send_email".
  pub subtype: String,
  /// Opaque per-subtype configuration. String leaves may hold `{{scope.path}}`
  /// placeholders.
  #[serde(default)]
  pub config: serde_json::Map<String, serde_json::Value>,
  #[serde(default = "default_enabled")]
  pub is_enabled: bool,
  #[serde(default)]
  pub error_policy: ErrorPolicyDef,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
}

fn default_enabled() -> bool {
  true
}
