//! Listener and connection settings.

use serde::{Deserialize, Serialize};

/// HTTP / WebSocket listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` auto-assigns).
    pub port: u16,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Grace period for in-flight work on shutdown, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8450,
            max_message_size: 4 * 1024 * 1024, // 4 MB
            shutdown_timeout_secs: 10,
        }
    }
}

/// Duplex channel timing and buffering.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Interval between server pings.
    pub heartbeat_interval_secs: u64,
    /// Silence after which a connection is closed.
    pub heartbeat_timeout_secs: u64,
    /// Bound on a single frame write.
    pub write_timeout_ms: u64,
    /// Outbound frames buffered per connection.
    pub send_queue_capacity: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            write_timeout_ms: 5_000,
            send_queue_capacity: 256,
        }
    }
}
