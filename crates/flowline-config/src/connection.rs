use serde::{Deserialize, Serialize};

use crate::enums::ConditionType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDef {
  pub id: String,
  pub source_id: String,
  pub target_id: String,
  #[serde(default)]
  pub condition_type: ConditionType,
  /// Predicate spec, required when `condition_type` is not `always`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub condition_config: Option<serde_json::Value>,
}
