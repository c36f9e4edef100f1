use serde::{Deserialize, Serialize};

use crate::connection::ConnectionDef;
use crate::node::NodeDef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationDef {
  pub id: String,
  #[serde(default)]
  pub name: String,
  pub nodes: Vec<NodeDef>,
  #[serde(default)]
  pub connections: Vec<ConnectionDef>,
}
