//! Flowline Engine
//!
//! This crate runs automations: it turns trigger events into runs, walks the
//! locked graph, dispatches nodes to their handlers under each node's error
//! policy and records everything in the execution store.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     AutomationRunner                        │
//! │  - owns mpsc channel of TriggerEvents                       │
//! │  - one task per run, periodic resume of due suspensions     │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                             │
//! │  - start_run / cancel_run / resume_due / deliver_event      │
//! │  - dedup, checkpoints, exactly-once finalization            │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Scheduler + Supervisor                    │
//! │  - node state machine, edge conditions, fan-in              │
//! │  - retries, backoff, timeouts, fallback/continue/skip       │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     HandlerRegistry                         │
//! │  - subtype → NodeHandler (flowline-task)                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod engine;
mod error;
mod events;
mod runner;
mod scheduler;
mod state;
mod supervisor;
mod trigger;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::EngineError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use runner::AutomationRunner;
pub use scheduler::RunOutcome;
pub use state::{NodeState, NodeStates, RunState};
pub use supervisor::{FailureAction, failure_action, max_attempts, retry_delay};
pub use trigger::TriggerEvent;

pub use flowline_config::TriggerType;
