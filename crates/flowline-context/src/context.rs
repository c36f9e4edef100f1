use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Placeholder scope that addresses the trigger payload.
pub const TRIGGER_SCOPE: &str = "trigger";

/// Placeholder scope that addresses events delivered to a parked run, as
/// `events.<name>.<field>`.
pub const EVENTS_SCOPE: &str = "events";

/// Accumulated state of a single run.
///
/// The trigger payload is fixed at creation. Node outputs are written by the
/// scheduler only, one node at a time. Delivered events are kept by name, the
/// latest payload winning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
  trigger_data: Value,
  node_outputs: BTreeMap<String, Value>,
  visited: BTreeSet<String>,
  #[serde(default)]
  events: BTreeMap<String, Value>,
}

impl RunContext {
  pub fn new(trigger_data: Value) -> Self {
    Self {
      trigger_data,
      node_outputs: BTreeMap::new(),
      visited: BTreeSet::new(),
      events: BTreeMap::new(),
    }
  }

  pub fn trigger_data(&self) -> &Value {
    &self.trigger_data
  }

  pub fn node_outputs(&self) -> &BTreeMap<String, Value> {
    &self.node_outputs
  }

  pub fn output(&self, node_id: &str) -> Option<&Value> {
    self.node_outputs.get(node_id)
  }

  /// Record a node's result and mark it visited.
  pub fn record_output(&mut self, node_id: impl Into<String>, output: Value) {
    let node_id = node_id.into();
    self.visited.insert(node_id.clone());
    self.node_outputs.insert(node_id, output);
  }

  pub fn mark_visited(&mut self, node_id: impl Into<String>) {
    self.visited.insert(node_id.into());
  }

  pub fn is_visited(&self, node_id: &str) -> bool {
    self.visited.contains(node_id)
  }

  pub fn visited(&self) -> &BTreeSet<String> {
    &self.visited
  }

  pub fn record_event(&mut self, name: impl Into<String>, payload: Value) {
    self.events.insert(name.into(), payload);
  }

  pub fn event(&self, name: &str) -> Option<&Value> {
    self.events.get(name)
  }

  /// Look up a dotted path such as `trigger.contact.email` or `fetch.items.0`.
  ///
  /// The first segment is the scope: `trigger`, `events` followed by an
  /// event name, or a node id. Remaining segments walk object keys; numeric
  /// segments also index arrays. Returns `None` when any segment is absent.
  /// A present `null` is `Some(Null)`.
  pub fn lookup(&self, path: &str) -> Option<&Value> {
    let mut segments = path.trim().split('.').map(str::trim);

    let scope = segments.next().filter(|s| !s.is_empty())?;
    let mut current = match scope {
      TRIGGER_SCOPE => &self.trigger_data,
      EVENTS_SCOPE => self.events.get(segments.next()?)?,
      _ => self.node_outputs.get(scope)?,
    };

    for segment in segments {
      current = match current {
        Value::Object(map) => map.get(segment)?,
        Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
        _ => return None,
      };
    }

    Some(current)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn context() -> RunContext {
    let mut ctx = RunContext::new(json!({
      "email": "a@b.com",
      "contact": { "name": "Ada", "tags": ["vip", "beta"] },
      "score": null
    }));
    ctx.record_output("fetch", json!({ "status": 200, "items": [{ "id": 7 }] }));
    ctx
  }

  #[test]
  fn test_lookup_trigger_scope() {
    let ctx = context();
    assert_eq!(ctx.lookup("trigger.email"), Some(&json!("a@b.com")));
    assert_eq!(ctx.lookup("trigger.contact.name"), Some(&json!("Ada")));
    assert_eq!(ctx.lookup("trigger.contact.tags.1"), Some(&json!("beta")));
  }

  #[test]
  fn test_lookup_node_scope() {
    let ctx = context();
    assert_eq!(ctx.lookup("fetch.status"), Some(&json!(200)));
    assert_eq!(ctx.lookup("fetch.items.0.id"), Some(&json!(7)));
    assert!(ctx.is_visited("fetch"));
  }

  #[test]
  fn test_lookup_missing() {
    let ctx = context();
    assert_eq!(ctx.lookup("trigger.phone"), None);
    assert_eq!(ctx.lookup("nobody.field"), None);
    assert_eq!(ctx.lookup("trigger.email.deeper"), None);
    assert_eq!(ctx.lookup("fetch.items.9"), None);
    assert_eq!(ctx.lookup(""), None);
  }

  #[test]
  fn test_lookup_present_null() {
    let ctx = context();
    assert_eq!(ctx.lookup("trigger.score"), Some(&Value::Null));
  }

  #[test]
  fn test_lookup_events_scope() {
    let mut ctx = context();
    assert_eq!(ctx.lookup("events.paid.amount"), None);

    ctx.record_event("paid", json!({ "amount": 10 }));
    ctx.record_event("paid", json!({ "amount": 25 }));
    assert_eq!(ctx.lookup("events.paid.amount"), Some(&json!(25)));
    assert_eq!(ctx.lookup("events.paid"), ctx.event("paid"));
    assert_eq!(ctx.lookup("events"), None);
    assert!(!ctx.is_visited("paid"));
  }

  #[test]
  fn test_checkpoint_without_events_still_loads() {
    let ctx: RunContext = serde_json::from_value(json!({
      "trigger_data": { "a": 1 },
      "node_outputs": {},
      "visited": []
    }))
    .unwrap();
    assert_eq!(ctx.lookup("trigger.a"), Some(&json!(1)));
  }

  #[test]
  fn test_scope_alone_returns_whole_value() {
    let ctx = context();
    assert_eq!(ctx.lookup("fetch"), ctx.output("fetch"));
  }
}
