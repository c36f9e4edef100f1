//! Flowline Workflow
//!
//! This crate provides the validated automation representation for flowline.
//! An [`Automation`] is the immutable snapshot the engine executes: produced
//! once by the resolver at load time, never edited during a run.
//!
//! Key differences from `flowline-config`:
//! - Graph invariants hold (exactly one trigger, no dangling connections,
//!   no cycles, conditional connections carry a predicate)
//! - Connection conditions are a closed [`EdgeCondition`] type
//! - Unreachable nodes are identified and flagged
//! - Node order is preserved, so scheduling is deterministic

mod automation;
mod error;
mod graph;
mod node;

pub use automation::Automation;
pub use error::WorkflowError;
pub use graph::Graph;
pub use node::{Connection, EdgeCondition, Node};

pub use flowline_config::{
  BackoffStrategy, ErrorNotificationDef as ErrorNotification, ErrorPolicyDef as ErrorPolicy,
  NodeKind, NotificationChannel, OnError,
};
