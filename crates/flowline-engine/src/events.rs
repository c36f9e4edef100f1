//! Execution events and notifiers for observability.
//!
//! Events are emitted during a run to allow consumers to observe progress,
//! stream to UIs, deliver error notifications, etc.

use flowline_workflow::NotificationChannel;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionEvent {
  RunStarted {
    run_id: String,
    automation_id: String,
  },

  /// A dispatch attempt started.
  NodeStarted {
    run_id: String,
    node_id: String,
    attempt: u32,
  },

  NodeCompleted {
    run_id: String,
    node_id: String,
    output: serde_json::Value,
  },

  /// A node reached a terminal failure (after any retries).
  NodeFailed {
    run_id: String,
    node_id: String,
    error: String,
  },

  NodeRetrying {
    run_id: String,
    node_id: String,
    attempt: u32,
    delay_ms: u64,
  },

  NodeSkipped {
    run_id: String,
    node_id: String,
  },

  NodeSuspended {
    run_id: String,
    node_id: String,
  },

  /// A node's `errorNotification` side effect.
  ErrorNotification {
    run_id: String,
    automation_id: String,
    node_id: String,
    channel: NotificationChannel,
    recipient: Option<String>,
    error: String,
  },

  /// The run parked on one or more suspended nodes.
  RunSuspended { run_id: String },

  RunCompleted { run_id: String },

  RunFailed { run_id: String, error: String },

  RunCancelled { run_id: String },
}

/// Trait for receiving execution events.
///
/// The engine calls `notify` for each event; implementations decide what to
/// do with them (persist, broadcast, send an email, ignore, etc.).
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that sends events to an unbounded channel.
///
/// Unbounded so a slow consumer never stalls a run; volume is a handful of
/// events per node.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }

  /// A notifier and the receiving end of its channel.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Self::new(sender), receiver)
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Ignore send errors - receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
