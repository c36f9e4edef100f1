//! Automation runner with channel-based triggering.
//!
//! The `AutomationRunner` owns an mpsc channel for receiving trigger events,
//! starts a run for each one and periodically resumes due suspensions.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::trigger::TriggerEvent;

/// A runner that starts runs in response to trigger events.
///
/// # Usage
///
/// ```ignore
/// let runner = AutomationRunner::new(engine);
///
/// // Hand the sender to trigger adapters (webhooks, schedules, UI, etc.)
/// let sender = runner.sender();
///
/// // Start the loop
/// let cancel = CancellationToken::new();
/// runner.start(cancel).await?;
/// ```
pub struct AutomationRunner {
  sender: mpsc::Sender<TriggerEvent>,
  receiver: mpsc::Receiver<TriggerEvent>,
  engine: Arc<Engine>,
  resume_interval: Duration,
}

impl AutomationRunner {
  pub fn new(engine: Arc<Engine>) -> Self {
    Self::with_buffer_size(engine, 100)
  }

  pub fn with_buffer_size(engine: Arc<Engine>, buffer_size: usize) -> Self {
    let (sender, receiver) = mpsc::channel(buffer_size);
    Self {
      sender,
      receiver,
      engine,
      resume_interval: Duration::from_secs(1),
    }
  }

  /// How often due suspensions are checked.
  pub fn with_resume_interval(mut self, interval: Duration) -> Self {
    self.resume_interval = interval;
    self
  }

  /// Get a sender handle for submitting trigger events.
  pub fn sender(&self) -> mpsc::Sender<TriggerEvent> {
    self.sender.clone()
  }

  /// Submit a trigger event through the channel.
  pub async fn submit(&self, event: TriggerEvent) -> Result<(), EngineError> {
    self
      .sender
      .send(event)
      .await
      .map_err(|_| EngineError::ChannelClosed)
  }

  pub fn engine(&self) -> &Engine {
    &self.engine
  }

  /// Start the loop.
  ///
  /// Blocks until the cancellation token is triggered or the channel closes.
  /// Each event is run on its own task, so runs proceed concurrently. Due
  /// suspensions are resumed on a task of their own too, at most one sweep at
  /// a time; a tick that lands while a sweep is still going is skipped. Runs
  /// already started are left to finish.
  pub async fn start(mut self, cancel: CancellationToken) -> Result<(), EngineError> {
    info!("runner_started");

    let mut ticker = tokio::time::interval(self.resume_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut sweep: Option<JoinHandle<()>> = None;

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!("runner_cancelled");
          break;
        }
        event = self.receiver.recv() => {
          match event {
            Some(event) => {
              let engine = self.engine.clone();
              tokio::spawn(async move {
                let automation_id = event.automation_id.clone();
                match engine.start_run(event).await {
                  Ok(run_id) => {
                    info!(automation_id = %automation_id, run_id = %run_id, "trigger_handled");
                  }
                  Err(e) => {
                    error!(automation_id = %automation_id, error = %e, "trigger_rejected");
                  }
                }
              });
            }
            None => {
              info!("runner_channel_closed");
              break;
            }
          }
        }
        _ = ticker.tick() => {
          if sweep.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("resume_sweep_busy");
            continue;
          }
          let engine = self.engine.clone();
          sweep = Some(tokio::spawn(async move {
            if let Err(e) = engine.resume_due(Utc::now()).await {
              error!(error = %e, "resume_due_failed");
            }
          }));
        }
      }
    }

    Ok(())
  }
}
