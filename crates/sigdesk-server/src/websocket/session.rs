//! Connection lifecycle: one device from upgrade through disconnect.
//!
//! Each connection runs three tasks. The reader loop (this task) feeds text
//! frames to the [`MessageRouter`](super::router::MessageRouter); a writer
//! task is the only code that touches the socket sink; a heartbeat task
//! closes the channel once the device goes silent. All three stop when the
//! channel's close token fires.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use chrono::Utc;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use sigdesk_core::{TenantId, WorkstationId};
use sigdesk_protocol::codes;
use sigdesk_protocol::messages::{ConnectedPayload, DeviceRole, TabletStatusPayload};
use sigdesk_protocol::ServerMessage;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, instrument, warn};

use super::connection::{CloseReason, DeviceChannel, OutboundFrame};
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use super::registry::TabletConnection;
use crate::auth::DeviceIdentity;
use crate::config::ServerConfig;
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};
use crate::server::AppState;

/// Serve an authenticated tablet until it disconnects.
#[instrument(skip_all, fields(tablet_id = %identity.tablet_id, tenant_id = %identity.tenant_id))]
pub async fn run_tablet_session(ws: WebSocket, identity: DeviceIdentity, state: AppState) {
    let started = Instant::now();
    let (ws_tx, mut ws_rx) = ws.split();
    let (channel, writer) = open_channel(DeviceRole::Tablet, ws_tx, &state.config);

    let _ = channel.send_message(&connected(
        DeviceRole::Tablet,
        identity.tablet_id.as_str(),
        &identity.tenant_id,
        &channel,
        &state.config,
    ));
    let conn = state.registry.register_tablet(
        identity.tablet_id,
        identity.tenant_id,
        identity.location_id,
        Arc::clone(&channel),
    );
    opened(&channel);
    let _ = state
        .registry
        .broadcast_to_tenant(&conn.tenant_id, &tablet_status(&conn, true));

    let heartbeat = spawn_heartbeat(&channel, &state.config);
    read_frames(&mut ws_rx, &channel, |text| {
        state.router.handle_tablet_text(&conn, text);
    })
    .await;

    let _ = channel.close(CloseReason::Disconnected);
    if state.registry.unregister_tablet(&conn.tablet_id, channel.id()) {
        let _ = state
            .registry
            .broadcast_to_tenant(&conn.tenant_id, &tablet_status(&conn, false));
    }
    finish(&channel, started, heartbeat, writer).await;
}

/// Serve a workstation until it disconnects.
#[instrument(skip_all, fields(workstation_id = %workstation_id, tenant_id = %tenant_id))]
pub async fn run_workstation_session(
    ws: WebSocket,
    workstation_id: WorkstationId,
    tenant_id: TenantId,
    state: AppState,
) {
    let started = Instant::now();
    let (ws_tx, mut ws_rx) = ws.split();
    let (channel, writer) = open_channel(DeviceRole::Workstation, ws_tx, &state.config);

    let _ = channel.send_message(&connected(
        DeviceRole::Workstation,
        workstation_id.as_str(),
        &tenant_id,
        &channel,
        &state.config,
    ));
    let conn = state
        .registry
        .register_workstation(workstation_id, tenant_id, Arc::clone(&channel));
    opened(&channel);
    let _ = state.orchestrator.resync_workstation(&conn);

    let heartbeat = spawn_heartbeat(&channel, &state.config);
    read_frames(&mut ws_rx, &channel, |text| {
        state.router.handle_workstation_text(&conn, text);
    })
    .await;

    let _ = channel.close(CloseReason::Disconnected);
    let _ = state
        .registry
        .unregister_workstation(&conn.workstation_id, channel.id());
    finish(&channel, started, heartbeat, writer).await;
}

fn open_channel(
    role: DeviceRole,
    ws_tx: SplitSink<WebSocket, Message>,
    config: &ServerConfig,
) -> (Arc<DeviceChannel>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(config.send_queue_capacity);
    let channel = Arc::new(DeviceChannel::new(role, tx));
    let writer = tokio::spawn(run_writer(
        ws_tx,
        rx,
        Arc::clone(&channel),
        config.heartbeat_interval,
        config.write_timeout,
    ));
    (channel, writer)
}

fn connected(
    role: DeviceRole,
    device_id: &str,
    tenant_id: &TenantId,
    channel: &DeviceChannel,
    config: &ServerConfig,
) -> ServerMessage {
    ServerMessage::Connected(ConnectedPayload {
        role,
        device_id: device_id.to_owned(),
        tenant_id: tenant_id.clone(),
        connection_id: channel.id().to_string(),
        server_time: Utc::now(),
        heartbeat_interval_secs: config.heartbeat_interval.as_secs(),
    })
}

fn tablet_status(conn: &TabletConnection, online: bool) -> ServerMessage {
    ServerMessage::TabletStatus(TabletStatusPayload {
        tablet_id: conn.tablet_id.clone(),
        location_id: conn.location_id.clone(),
        online,
    })
}

fn spawn_heartbeat(channel: &Arc<DeviceChannel>, config: &ServerConfig) -> JoinHandle<()> {
    let channel = Arc::clone(channel);
    let interval = config.heartbeat_interval;
    let timeout = config.heartbeat_timeout;
    tokio::spawn(async move {
        if run_heartbeat(Arc::clone(&channel), interval, timeout).await == HeartbeatResult::TimedOut
        {
            warn!(
                connection_id = %channel.id(),
                idle_ms = channel.idle_for().as_millis(),
                "device unresponsive, closing"
            );
            let _ = channel.close(CloseReason::HeartbeatTimeout);
        }
    })
}

/// Read until the socket ends or the channel is closed.
async fn read_frames<F>(ws_rx: &mut SplitStream<WebSocket>, channel: &DeviceChannel, handle: F)
where
    F: Fn(&str),
{
    loop {
        let next = tokio::select! {
            () = channel.closed() => break,
            next = ws_rx.next() => next,
        };
        let msg = match next {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(connection_id = %channel.id(), error = %e, "socket read failed");
                break;
            }
            None => break,
        };
        channel.mark_alive();
        match msg {
            Message::Text(text) => handle(text.as_str()),
            Message::Binary(data) => {
                if let Ok(text) = std::str::from_utf8(&data) {
                    handle(text);
                } else {
                    let _ = channel.send_message(&ServerMessage::error(
                        codes::INVALID_MESSAGE,
                        "binary frame is not valid UTF-8",
                    ));
                }
            }
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => {
                debug!(connection_id = %channel.id(), "device sent close frame");
                break;
            }
        }
    }
}

/// Drain the channel queue into the socket, pinging on `ping_interval`.
///
/// Exits when the channel closes or a write fails, then flushes whatever is
/// still queued and sends a close frame carrying the close reason.
async fn run_writer(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<OutboundFrame>,
    channel: Arc<DeviceChannel>,
    ping_interval: Duration,
    write_timeout: Duration,
) {
    let mut ping = time::interval_at(time::Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    let mut healthy = true;

    loop {
        tokio::select! {
            biased;
            () = channel.closed() => break,
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                if !write_frame(&mut ws_tx, frame, write_timeout).await {
                    healthy = false;
                    break;
                }
            }
            _ = ping.tick() => {
                let sent = time::timeout(write_timeout, ws_tx.send(Message::Ping(Vec::new().into()))).await;
                if !matches!(sent, Ok(Ok(()))) {
                    healthy = false;
                    break;
                }
            }
        }
    }

    if !healthy {
        let _ = channel.close(CloseReason::Disconnected);
        debug!(connection_id = %channel.id(), "writer stopped after failed write");
        return;
    }

    while let Ok(frame) = rx.try_recv() {
        if !write_frame(&mut ws_tx, frame, write_timeout).await {
            return;
        }
    }
    let reason = channel.close_reason().unwrap_or(CloseReason::Disconnected);
    let close = Message::Close(Some(CloseFrame {
        code: reason.code(),
        reason: reason.as_str().into(),
    }));
    let _ = time::timeout(write_timeout, ws_tx.send(close)).await;
}

/// Write one frame and fire its ack. Returns `false` if the socket failed.
async fn write_frame(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    frame: OutboundFrame,
    write_timeout: Duration,
) -> bool {
    match time::timeout(write_timeout, ws_tx.send(Message::Text(frame.text.into()))).await {
        Ok(Ok(())) => {
            if let Some(ack) = frame.ack {
                let _ = ack.send(());
            }
            true
        }
        Ok(Err(e)) => {
            debug!(error = %e, "socket write failed");
            false
        }
        Err(_) => {
            warn!(timeout_ms = write_timeout.as_millis(), "socket write timed out");
            false
        }
    }
}

fn opened(channel: &DeviceChannel) {
    let kind = channel.role().as_str();
    counter!(WS_CONNECTIONS_TOTAL, "kind" => kind).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE, "kind" => kind).increment(1.0);
    info!(connection_id = %channel.id(), kind, "device connected");
}

async fn finish(
    channel: &DeviceChannel,
    started: Instant,
    heartbeat: JoinHandle<()>,
    writer: JoinHandle<()>,
) {
    let kind = channel.role().as_str();
    counter!(WS_DISCONNECTIONS_TOTAL, "kind" => kind).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE, "kind" => kind).decrement(1.0);
    let _ = heartbeat.await;
    let _ = writer.await;
    info!(
        connection_id = %channel.id(),
        kind,
        reason = channel.close_reason().map_or("unknown", CloseReason::as_str),
        duration_ms = started.elapsed().as_millis(),
        dropped = channel.drop_count(),
        "device disconnected"
    );
}
