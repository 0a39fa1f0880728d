//! Server configuration.

use std::time::Duration;

use sigdesk_settings::SigdeskSettings;

use crate::signing::TimeoutPolicy;

/// Runtime configuration for [`crate::server::SigdeskServer`].
///
/// Built from [`SigdeskSettings`] by the binary; tests use [`Default`], which
/// binds `127.0.0.1:0` so the OS picks a free port.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Interval between server pings.
    pub heartbeat_interval: Duration,
    /// Silence after which a channel is closed.
    pub heartbeat_timeout: Duration,
    /// Bound on a single frame write (and on confirmed dispatch).
    pub write_timeout: Duration,
    /// Outbound frames buffered per channel.
    pub send_queue_capacity: usize,
    /// Interval of the expiry sweep.
    pub expiry_sweep_interval: Duration,
    /// How long finished sessions stay pollable.
    pub terminal_retention: Duration,
    /// Accepted session timeouts.
    pub timeouts: TimeoutPolicy,
    /// Grace period for background tasks on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_message_size: 4 * 1024 * 1024,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            write_timeout: Duration::from_secs(5),
            send_queue_capacity: 256,
            expiry_sweep_interval: Duration::from_secs(1),
            terminal_retention: Duration::from_secs(15 * 60),
            timeouts: TimeoutPolicy::default(),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&SigdeskSettings> for ServerConfig {
    fn from(settings: &SigdeskSettings) -> Self {
        let conn = &settings.connection;
        let signing = &settings.signing;
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_message_size: settings.server.max_message_size,
            heartbeat_interval: Duration::from_secs(conn.heartbeat_interval_secs),
            heartbeat_timeout: Duration::from_secs(conn.heartbeat_timeout_secs),
            write_timeout: Duration::from_millis(conn.write_timeout_ms),
            send_queue_capacity: conn.send_queue_capacity.max(1),
            expiry_sweep_interval: Duration::from_millis(signing.expiry_sweep_interval_ms),
            terminal_retention: Duration::from_secs(signing.terminal_retention_secs),
            timeouts: TimeoutPolicy {
                default_minutes: signing.default_timeout_minutes,
                min_minutes: signing.min_timeout_minutes,
                max_minutes: signing.max_timeout_minutes,
            },
            shutdown_timeout: Duration::from_secs(settings.server.shutdown_timeout_secs),
        }
    }
}
