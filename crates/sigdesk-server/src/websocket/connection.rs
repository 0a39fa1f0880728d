//! Handle to one physical device connection.
//!
//! A [`DeviceChannel`] owns the sending half of a bounded queue that exactly
//! one writer task drains, so writes on a connection never interleave. It
//! also carries the close token every task of the connection watches.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sigdesk_core::ConnectionId;
use sigdesk_protocol::ServerMessage;
use sigdesk_protocol::messages::DeviceRole;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::warn;

/// Why a channel was closed. Sent to the device as the WebSocket close code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// A newer connection authenticated with the same device id.
    Superseded,
    /// No inbound activity within the heartbeat timeout.
    HeartbeatTimeout,
    /// The server is stopping.
    ServerShutdown,
    /// The device went away or a write failed.
    Disconnected,
}

impl CloseReason {
    /// WebSocket close code.
    pub fn code(self) -> u16 {
        match self {
            Self::Superseded => 4001,
            Self::HeartbeatTimeout => 4002,
            Self::ServerShutdown => 1001,
            Self::Disconnected => 1000,
        }
    }

    /// Close frame reason text.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Superseded => "superseded",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::ServerShutdown => "server_shutdown",
            Self::Disconnected => "disconnected",
        }
    }
}

/// Why a confirmed write did not reach the socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The channel closed before the frame was written.
    #[error("device channel closed")]
    Closed,
    /// The frame was not written within the bound.
    #[error("write not confirmed within {0:?}")]
    Timeout(Duration),
}

/// One queued text frame. `ack` fires once the writer has flushed it.
pub struct OutboundFrame {
    /// Serialized envelope.
    pub text: String,
    /// Write confirmation, for dispatches that must know the outcome.
    pub ack: Option<oneshot::Sender<()>>,
}

/// A connected tablet or workstation.
pub struct DeviceChannel {
    id: ConnectionId,
    role: DeviceRole,
    tx: mpsc::Sender<OutboundFrame>,
    close: CancellationToken,
    close_reason: Mutex<Option<CloseReason>>,
    connected_at: DateTime<Utc>,
    is_alive: AtomicBool,
    last_activity: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl DeviceChannel {
    /// Create a channel feeding `tx`.
    pub fn new(role: DeviceRole, tx: mpsc::Sender<OutboundFrame>) -> Self {
        Self {
            id: ConnectionId::new(),
            role,
            tx,
            close: CancellationToken::new(),
            close_reason: Mutex::new(None),
            connected_at: Utc::now(),
            is_alive: AtomicBool::new(true),
            last_activity: Mutex::new(Instant::now()),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Server-assigned connection id.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Tablet or workstation.
    pub fn role(&self) -> DeviceRole {
        self.role
    }

    /// When the channel was created.
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Queue a text frame without waiting.
    ///
    /// Returns `false` if the channel is closed or its queue is full; the
    /// dropped-message counter is incremented.
    pub fn send(&self, text: String) -> bool {
        if self.is_closed() {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let frame = OutboundFrame { text, ack: None };
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize `message` and queue it without waiting.
    pub fn send_message(&self, message: &ServerMessage) -> bool {
        match message.to_text() {
            Ok(text) => self.send(text),
            Err(e) => {
                warn!(kind = message.kind(), error = %e, "failed to serialize message");
                false
            }
        }
    }

    /// Queue `message` and wait until the writer has flushed it.
    ///
    /// Bounded by `timeout` end to end, including time spent waiting for room
    /// in the queue.
    pub async fn send_confirmed(
        &self,
        message: &ServerMessage,
        timeout: Duration,
    ) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        let text = message.to_text().map_err(|e| {
            warn!(kind = message.kind(), error = %e, "failed to serialize message");
            DeliveryError::Closed
        })?;
        let (ack_tx, ack_rx) = oneshot::channel();
        let frame = OutboundFrame {
            text,
            ack: Some(ack_tx),
        };

        let delivery = async {
            self.tx
                .send(frame)
                .await
                .map_err(|_| DeliveryError::Closed)?;
            ack_rx.await.map_err(|_| DeliveryError::Closed)
        };

        tokio::select! {
            result = tokio::time::timeout(timeout, delivery) => {
                result.unwrap_or(Err(DeliveryError::Timeout(timeout)))
            }
            () = self.close.cancelled() => Err(DeliveryError::Closed),
        }
    }

    /// Close the channel. The first reason wins; returns `true` for that call.
    pub fn close(&self, reason: CloseReason) -> bool {
        let first = {
            let mut slot = self.close_reason.lock();
            if slot.is_some() {
                false
            } else {
                *slot = Some(reason);
                true
            }
        };
        self.close.cancel();
        first
    }

    /// Reason the channel was closed with, if it was.
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.close.is_cancelled()
    }

    /// Resolves once the channel is closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.close.cancelled()
    }

    /// Record inbound activity (any frame, ping, or pong).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_activity.lock() = Instant::now();
    }

    /// Take the alive flag, resetting it for the next heartbeat window.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last inbound activity.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Frames dropped because the queue was full or closed.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use sigdesk_protocol::codes;

    fn make_channel(capacity: usize) -> (DeviceChannel, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (DeviceChannel::new(DeviceRole::Tablet, tx), rx)
    }

    #[test]
    fn close_codes() {
        assert_eq!(CloseReason::Superseded.code(), 4001);
        assert_eq!(CloseReason::HeartbeatTimeout.code(), 4002);
        assert_eq!(CloseReason::ServerShutdown.code(), 1001);
        assert_eq!(CloseReason::Disconnected.code(), 1000);
    }

    #[tokio::test]
    async fn send_queues_frame_without_ack() {
        let (chan, mut rx) = make_channel(4);
        assert!(chan.send("hello".into()));
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.text, "hello");
        assert!(frame.ack.is_none());
    }

    #[test]
    fn send_to_full_queue_counts_drop() {
        let (chan, _rx) = make_channel(1);
        assert!(chan.send("a".into()));
        assert!(!chan.send("b".into()));
        assert_eq!(chan.drop_count(), 1);
    }

    #[test]
    fn send_after_close_is_dropped() {
        let (chan, _rx) = make_channel(4);
        let _ = chan.close(CloseReason::Disconnected);
        assert!(!chan.send("late".into()));
        assert_eq!(chan.drop_count(), 1);
    }

    #[tokio::test]
    async fn send_message_serializes_envelope() {
        let (chan, mut rx) = make_channel(4);
        assert!(chan.send_message(&ServerMessage::error(codes::INVALID_MESSAGE, "bad")));
        let frame = rx.recv().await.unwrap();
        let v: serde_json::Value = serde_json::from_str(&frame.text).unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["payload"]["code"], "INVALID_MESSAGE");
    }

    #[tokio::test]
    async fn confirmed_send_waits_for_writer_ack() {
        let (chan, mut rx) = make_channel(4);
        let writer = tokio::spawn(async move {
            let frame = rx.recv().await.unwrap();
            frame.ack.unwrap().send(()).unwrap();
            frame.text
        });
        let msg = ServerMessage::heartbeat_ack(Utc::now());
        chan.send_confirmed(&msg, Duration::from_secs(1)).await.unwrap();
        let text = writer.await.unwrap();
        assert!(text.contains("heartbeat_ack"));
    }

    #[tokio::test]
    async fn confirmed_send_fails_when_writer_drops_ack() {
        let (chan, mut rx) = make_channel(4);
        let _writer = tokio::spawn(async move {
            let frame = rx.recv().await.unwrap();
            drop(frame.ack);
        });
        let msg = ServerMessage::heartbeat_ack(Utc::now());
        assert_eq!(
            chan.send_confirmed(&msg, Duration::from_secs(1)).await,
            Err(DeliveryError::Closed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn confirmed_send_times_out_when_never_written() {
        let (chan, _rx) = make_channel(4);
        let msg = ServerMessage::heartbeat_ack(Utc::now());
        let result = chan.send_confirmed(&msg, Duration::from_millis(200)).await;
        assert_matches!(result, Err(DeliveryError::Timeout(_)));
    }

    #[tokio::test]
    async fn confirmed_send_on_closed_channel() {
        let (chan, _rx) = make_channel(4);
        let _ = chan.close(CloseReason::Superseded);
        let msg = ServerMessage::heartbeat_ack(Utc::now());
        assert_eq!(
            chan.send_confirmed(&msg, Duration::from_secs(1)).await,
            Err(DeliveryError::Closed)
        );
    }

    #[tokio::test]
    async fn close_interrupts_pending_confirmation() {
        let (chan, _rx) = make_channel(4);
        let chan = std::sync::Arc::new(chan);
        let closer = chan.clone();
        let _ = tokio::spawn(async move {
            tokio::task::yield_now().await;
            let _ = closer.close(CloseReason::ServerShutdown);
        });
        let msg = ServerMessage::heartbeat_ack(Utc::now());
        assert_eq!(
            chan.send_confirmed(&msg, Duration::from_secs(30)).await,
            Err(DeliveryError::Closed)
        );
    }

    #[test]
    fn first_close_reason_wins() {
        let (chan, _rx) = make_channel(4);
        assert!(chan.close(CloseReason::Superseded));
        assert!(!chan.close(CloseReason::Disconnected));
        assert_eq!(chan.close_reason(), Some(CloseReason::Superseded));
        assert!(chan.is_closed());
    }

    #[test]
    fn alive_flag_resets_on_check() {
        let (chan, _rx) = make_channel(4);
        assert!(chan.check_alive());
        assert!(!chan.check_alive());
        chan.mark_alive();
        assert!(chan.check_alive());
    }

    #[test]
    fn connection_ids_are_unique() {
        let (a, _ra) = make_channel(1);
        let (b, _rb) = make_channel(1);
        assert_ne!(a.id(), b.id());
    }
}
