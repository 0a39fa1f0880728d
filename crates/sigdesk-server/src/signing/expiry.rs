//! Periodic expiry sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::orchestrator::SessionOrchestrator;

/// Expires overdue sessions on a fixed interval.
pub struct ExpiryScheduler {
    orchestrator: Arc<SessionOrchestrator>,
    interval: Duration,
}

impl ExpiryScheduler {
    /// Sweep `orchestrator` every `interval`.
    pub fn new(orchestrator: Arc<SessionOrchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    /// Run the sweep on a background task until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Sweep until `cancel` fires.
    ///
    /// A slow sweep delays the next tick rather than bunching ticks up.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = self.interval.as_millis(), "expiry scheduler started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let expired = self.orchestrator.expire_overdue();
                    if expired > 0 {
                        debug!(expired, "expiry tick");
                    }
                }
                () = cancel.cancelled() => break,
            }
        }
        info!("expiry scheduler stopped");
    }
}
