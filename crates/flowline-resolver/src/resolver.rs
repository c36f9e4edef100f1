use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{instrument, warn};

use flowline_config::{AutomationDef, ConditionType, ConnectionDef, NodeDef, NodeKind, OnError};
use flowline_context::{EVENTS_SCOPE, TRIGGER_SCOPE};
use flowline_workflow::{Automation, Connection, EdgeCondition, Node};

use crate::error::ResolveError;
use crate::source::DefinitionSource;

/// Resolver turns an automation id into a validated, locked [`Automation`].
#[async_trait]
pub trait Resolver: Send + Sync {
  /// Load and validate the graph for an automation.
  ///
  /// This process:
  /// 1. Fetches the definition from its source (`NotFound` if absent)
  /// 2. Validates the graph structure (one trigger, no dangling or
  ///    unconfigured connections, no cycles)
  /// 3. Flags nodes unreachable from the trigger
  async fn load_graph(&self, automation_id: &str) -> Result<Automation, ResolveError>;
}

/// Standard resolver backed by a [`DefinitionSource`].
pub struct StandardResolver<S: DefinitionSource> {
  source: S,
}

impl<S: DefinitionSource> StandardResolver<S> {
  pub fn new(source: S) -> Self {
    Self { source }
  }

  pub fn source(&self) -> &S {
    &self.source
  }
}

#[async_trait]
impl<S: DefinitionSource> Resolver for StandardResolver<S> {
  #[instrument(skip(self))]
  async fn load_graph(&self, automation_id: &str) -> Result<Automation, ResolveError> {
    let def = self
      .source
      .get(automation_id)
      .await?
      .ok_or_else(|| ResolveError::NotFound {
        automation_id: automation_id.to_string(),
      })?;

    validate(def)
  }
}

/// Validate an automation definition and lock it.
///
/// Runs once per load so a malformed graph fails before any side effects.
pub fn validate(def: AutomationDef) -> Result<Automation, ResolveError> {
  // Collect node IDs and check for duplicates
  let mut node_ids = HashSet::new();
  for node in &def.nodes {
    check_addressable(node)?;
    if !node_ids.insert(node.id.as_str()) {
      return Err(ResolveError::DuplicateNodeId {
        node_id: node.id.clone(),
      });
    }
  }

  let trigger_id = find_trigger(&def.nodes)?;

  for conn in &def.connections {
    validate_connection(&node_ids, conn)?;
  }

  for node in &def.nodes {
    validate_error_policy(&node_ids, node)?;
  }

  let nodes: Vec<Node> = def.nodes.into_iter().map(lock_node).collect();
  let connections: Vec<Connection> = def.connections.into_iter().map(lock_connection).collect();

  let mut automation = Automation {
    automation_id: def.id,
    name: def.name,
    nodes,
    connections,
    trigger_id,
    unreachable: Vec::new(),
  };

  let graph = automation.graph();
  if let Some(node_id) = graph.find_cycle() {
    return Err(ResolveError::CycleDetected { node_id });
  }

  let reachable = graph.reachable_from(&automation.trigger_id);
  automation.unreachable = automation
    .nodes
    .iter()
    .filter(|n| !reachable.contains(&n.node_id))
    .map(|n| n.node_id.clone())
    .collect();

  if !automation.unreachable.is_empty() {
    warn!(
      automation_id = %automation.automation_id,
      unreachable = ?automation.unreachable,
      "unreachable_nodes"
    );
  }

  Ok(automation)
}

fn find_trigger(nodes: &[NodeDef]) -> Result<String, ResolveError> {
  let triggers: Vec<String> = nodes
    .iter()
    .filter(|n| n.kind == NodeKind::Trigger)
    .map(|n| n.id.clone())
    .collect();

  match triggers.as_slice() {
    [] => Err(ResolveError::NoTrigger),
    [only] => Ok(only.clone()),
    _ => Err(ResolveError::MultipleTriggers {
      node_ids: triggers.clone(),
    }),
  }
}

/// Node ids are the first segment of a `{{path}}`, so they can't contain the
/// separator or shadow a built-in scope. The trigger may be called `trigger`
/// since its output is the trigger payload anyway.
fn check_addressable(node: &NodeDef) -> Result<(), ResolveError> {
  let reason = if node.id.trim().is_empty() {
    Some("must not be blank")
  } else if node.id.contains('.') {
    Some("contains '.'")
  } else if node.id != node.id.trim() {
    Some("has surrounding whitespace")
  } else if node.id == EVENTS_SCOPE {
    Some("'events' is a reserved scope")
  } else if node.id == TRIGGER_SCOPE && node.kind != NodeKind::Trigger {
    Some("'trigger' is reserved for the trigger node")
  } else {
    None
  };

  match reason {
    Some(reason) => Err(ResolveError::UnaddressableNodeId {
      node_id: node.id.clone(),
      reason,
    }),
    None => Ok(()),
  }
}

fn validate_connection(node_ids: &HashSet<&str>, conn: &ConnectionDef) -> Result<(), ResolveError> {
  for endpoint in [&conn.source_id, &conn.target_id] {
    if !node_ids.contains(endpoint.as_str()) {
      return Err(ResolveError::DanglingConnection {
        connection_id: conn.id.clone(),
        node_id: endpoint.clone(),
      });
    }
  }

  let has_config = conn.condition_config.as_ref().is_some_and(|c| !c.is_null());
  if conn.condition_type != ConditionType::Always && !has_config {
    return Err(ResolveError::MissingConditionConfig {
      connection_id: conn.id.clone(),
    });
  }

  Ok(())
}

fn validate_error_policy(node_ids: &HashSet<&str>, node: &NodeDef) -> Result<(), ResolveError> {
  let policy = &node.error_policy;
  match &policy.fallback_node_id {
    Some(fallback) if !node_ids.contains(fallback.as_str()) => {
      Err(ResolveError::UnknownFallbackNode {
        node_id: node.id.clone(),
        fallback_node_id: fallback.clone(),
      })
    }
    None if policy.on_error == OnError::Fallback => Err(ResolveError::MissingFallbackNode {
      node_id: node.id.clone(),
    }),
    _ => Ok(()),
  }
}

fn lock_node(def: NodeDef) -> Node {
  Node {
    node_id: def.id,
    kind: def.kind,
    subtype: def.subtype,
    config: def.config,
    enabled: def.is_enabled,
    error_policy: def.error_policy,
    timeout_ms: def.timeout_ms,
  }
}

fn lock_connection(def: ConnectionDef) -> Connection {
  let predicate = def.condition_config.unwrap_or_default();
  let condition = match def.condition_type {
    ConditionType::Always => EdgeCondition::Always,
    ConditionType::If => EdgeCondition::If(predicate),
    ConditionType::Unless => EdgeCondition::Unless(predicate),
  };

  Connection {
    connection_id: def.id,
    source_id: def.source_id,
    target_id: def.target_id,
    condition,
  }
}
