//! Graceful shutdown via a shared `CancellationToken`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::websocket::connection::CloseReason;
use crate::websocket::registry::ConnectionRegistry;

/// Stops the listener, the expiry sweep, and every device channel.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a coordinator that has not fired.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token background tasks watch.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal shutdown without waiting.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been signalled.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal shutdown, close every device channel with `server_shutdown`,
    /// then wait up to `timeout` for `handles`.
    pub async fn graceful_shutdown(
        &self,
        registry: &ConnectionRegistry,
        handles: Vec<JoinHandle<()>>,
        timeout: Duration,
    ) {
        self.shutdown();
        let closed = registry.close_all(CloseReason::ServerShutdown);
        info!(
            channels = closed,
            task_count = handles.len(),
            timeout_ms = timeout.as_millis(),
            "waiting for tasks to complete"
        );

        let drain = futures::future::join_all(handles);
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(?timeout, "shutdown timed out, some tasks may still be running");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use sigdesk_protocol::messages::DeviceRole;
    use tokio::sync::mpsc;

    use crate::websocket::connection::DeviceChannel;

    #[test]
    fn shutdown_cancels_every_token() {
        let coord = ShutdownCoordinator::default();
        let t1 = coord.token();
        let t2 = coord.token();
        assert!(!coord.is_shutting_down());
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(t1.is_cancelled() && t2.is_cancelled());
    }

    #[tokio::test]
    async fn graceful_shutdown_closes_channels_and_awaits_tasks() {
        let coord = ShutdownCoordinator::new();
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(4);
        let channel = Arc::new(DeviceChannel::new(DeviceRole::Tablet, tx));
        let _ = registry.register_tablet("tab-1".into(), "acme".into(), None, Arc::clone(&channel));

        let token = coord.token();
        let task = tokio::spawn(async move { token.cancelled().await });

        coord
            .graceful_shutdown(&registry, vec![task], Duration::from_secs(5))
            .await;
        assert_eq!(channel.close_reason(), Some(CloseReason::ServerShutdown));
        assert!(coord.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_shutdown_gives_up_after_timeout() {
        let coord = ShutdownCoordinator::new();
        let registry = ConnectionRegistry::new();
        let stubborn = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });
        coord
            .graceful_shutdown(&registry, vec![stubborn], Duration::from_millis(100))
            .await;
        assert!(coord.is_shutting_down());
    }
}
