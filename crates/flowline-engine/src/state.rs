use std::collections::BTreeMap;

use flowline_context::RunContext;
use flowline_workflow::Automation;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// State of a node within one run.
///
/// States only move forward: a node is activated at most once per run. The
/// one way back is a suspended wait that timed out being dispatched again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
  #[default]
  Waiting,
  Ready,
  Running,
  /// Parked by a delay or wait handler until resumed.
  Suspended,
  Succeeded,
  Failed,
  Skipped,
}

impl NodeState {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      NodeState::Succeeded | NodeState::Failed | NodeState::Skipped
    )
  }

  fn can_become(&self, to: NodeState) -> bool {
    use NodeState::*;
    matches!(
      (*self, to),
      (Waiting, Ready)
        | (Ready, Running)
        // Disabled nodes pass through without dispatch
        | (Ready, Succeeded)
        | (Running, Succeeded | Failed | Skipped | Suspended)
        | (Suspended, Succeeded | Failed | Skipped)
        // Timed-out wait retried
        | (Suspended, Running)
    )
  }
}

/// Per-node states of a run, keyed by node id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStates {
  states: BTreeMap<String, NodeState>,
}

impl NodeStates {
  /// Every node of the automation starts out waiting.
  pub fn new(automation: &Automation) -> Self {
    Self {
      states: automation
        .nodes
        .iter()
        .map(|n| (n.node_id.clone(), NodeState::Waiting))
        .collect(),
    }
  }

  pub fn get(&self, node_id: &str) -> NodeState {
    self.states.get(node_id).copied().unwrap_or_default()
  }

  pub fn transition(&mut self, node_id: &str, to: NodeState) -> Result<(), EngineError> {
    let from = self.get(node_id);
    if !from.can_become(to) {
      return Err(EngineError::InvalidTransition {
        node_id: node_id.to_string(),
        from,
        to,
      });
    }
    self.states.insert(node_id.to_string(), to);
    Ok(())
  }

  /// Move a waiting node to ready. Returns false if it was already activated
  /// (first arrival wins on fan-in).
  pub fn activate(&mut self, node_id: &str) -> bool {
    if self.get(node_id) != NodeState::Waiting {
      return false;
    }
    self.states.insert(node_id.to_string(), NodeState::Ready);
    true
  }

  /// Ready nodes in authored order.
  pub fn ready(&self, automation: &Automation) -> Vec<String> {
    self.in_state(automation, NodeState::Ready)
  }

  pub fn in_state(&self, automation: &Automation, state: NodeState) -> Vec<String> {
    automation
      .nodes
      .iter()
      .filter(|n| self.get(&n.node_id) == state)
      .map(|n| n.node_id.clone())
      .collect()
  }

  pub fn any(&self, state: NodeState) -> bool {
    self.states.values().any(|s| *s == state)
  }
}

/// Everything needed to continue a run, persisted as its checkpoint while
/// suspended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
  pub run_id: String,
  /// Graph snapshot taken when the run started.
  pub automation: Automation,
  pub context: RunContext,
  pub nodes: NodeStates,
  /// Dispatch attempts used per node.
  pub attempts: BTreeMap<String, u32>,
  /// Set once a node failure resolved to `stop`.
  pub failure: Option<String>,
}

impl RunState {
  pub fn new(run_id: impl Into<String>, automation: Automation, trigger_data: serde_json::Value) -> Self {
    let nodes = NodeStates::new(&automation);
    Self {
      run_id: run_id.into(),
      automation,
      context: RunContext::new(trigger_data),
      nodes,
      attempts: BTreeMap::new(),
      failure: None,
    }
  }

  pub fn automation_id(&self) -> &str {
    &self.automation.automation_id
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use flowline_workflow::{Node, NodeKind};

  fn automation() -> Automation {
    let node = |id: &str, kind| Node {
      node_id: id.to_string(),
      kind,
      subtype: "log".to_string(),
      config: Default::default(),
      enabled: true,
      error_policy: Default::default(),
      timeout_ms: None,
    };
    Automation {
      automation_id: "a".to_string(),
      name: String::new(),
      nodes: vec![
        node("t", NodeKind::Trigger),
        node("x", NodeKind::Action),
        node("y", NodeKind::Action),
      ],
      connections: vec![],
      trigger_id: "t".to_string(),
      unreachable: vec![],
    }
  }

  #[test]
  fn test_forward_transitions() {
    let mut states = NodeStates::new(&automation());
    states.transition("x", NodeState::Ready).unwrap();
    states.transition("x", NodeState::Running).unwrap();
    states.transition("x", NodeState::Suspended).unwrap();
    states.transition("x", NodeState::Succeeded).unwrap();
    assert_eq!(states.get("x"), NodeState::Succeeded);
  }

  #[test]
  fn test_no_revisits() {
    let mut states = NodeStates::new(&automation());
    states.transition("x", NodeState::Ready).unwrap();
    states.transition("x", NodeState::Running).unwrap();

    assert!(matches!(
      states.transition("x", NodeState::Ready),
      Err(EngineError::InvalidTransition { .. })
    ));
    assert!(matches!(
      states.transition("x", NodeState::Waiting),
      Err(EngineError::InvalidTransition { .. })
    ));
    assert!(!states.activate("x"));
  }

  #[test]
  fn test_suspended_wait_can_run_again() {
    let mut states = NodeStates::new(&automation());
    states.transition("x", NodeState::Ready).unwrap();
    states.transition("x", NodeState::Running).unwrap();
    states.transition("x", NodeState::Suspended).unwrap();
    states.transition("x", NodeState::Running).unwrap();
    states.transition("x", NodeState::Suspended).unwrap();
    states.transition("x", NodeState::Failed).unwrap();

    assert!(matches!(
      states.transition("x", NodeState::Running),
      Err(EngineError::InvalidTransition { .. })
    ));
    assert!(!states.activate("x"));
  }

  #[test]
  fn test_first_arrival_activation() {
    let mut states = NodeStates::new(&automation());
    assert!(states.activate("y"));
    assert!(!states.activate("y"));
    assert!(states.activate("x"));
    assert_eq!(states.ready(&automation()), vec!["x".to_string(), "y".to_string()]);
  }
}
