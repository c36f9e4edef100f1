//! Flowline Config
//!
//! This crate contains the serializable automation definition types for
//! flowline. These types represent an automation graph exactly as the
//! authoring surface saved it, before the resolver validates it into an
//! immutable [`Automation`](../flowline_workflow/struct.Automation.html)
//! snapshot.
//!
//! Definitions can be loaded from:
//! - JSON files (via CLI with `flowline run automation.json`)
//! - A definitions directory (`<root>/<automation_id>.json`)
//!
//! Keys are camelCase on the wire:
//!
//! ```json
//! {
//!   "id": "lead-nurture",
//!   "nodes": [
//!     { "id": "start", "type": "trigger", "subtype": "webhook" },
//!     { "id": "welcome", "type": "action", "subtype": "send_email",
//!       "config": { "to": "{{trigger.email}}", "subject": "Hi" },
//!       "errorPolicy": { "onError": "retry", "maxRetries": 2 } }
//!   ],
//!   "connections": [
//!     { "id": "c1", "sourceId": "start", "targetId": "welcome" }
//!   ]
//! }
//! ```

mod automation;
mod connection;
mod enums;
mod node;
mod policy;

pub use automation::AutomationDef;
pub use connection::ConnectionDef;
pub use enums::{BackoffStrategy, ConditionType, NodeKind, NotificationChannel, OnError, TriggerType};
pub use node::NodeDef;
pub use policy::{ErrorNotificationDef, ErrorPolicyDef};
