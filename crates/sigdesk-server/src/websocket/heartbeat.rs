//! Liveness monitoring for device channels.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};

use super::connection::DeviceChannel;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// No inbound activity within the timeout window.
    TimedOut,
    /// The channel closed for another reason.
    Cancelled,
}

/// Watch `channel` until it goes silent or closes.
///
/// Every `interval` the alive flag is taken. After `timeout / interval`
/// consecutive silent windows (at least one) the loop returns
/// [`HeartbeatResult::TimedOut`]; the caller decides how to close.
pub async fn run_heartbeat(
    channel: Arc<DeviceChannel>,
    interval: Duration,
    timeout: Duration,
) -> HeartbeatResult {
    let interval_ms = interval.as_millis().max(1);
    let max_missed = u32::try_from(timeout.as_millis() / interval_ms)
        .unwrap_or(u32::MAX)
        .max(1);

    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if channel.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut;
                    }
                }
            }
            () = channel.closed() => return HeartbeatResult::Cancelled,
        }
    }
}
