//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a settings file only needs the fields it changes.

mod devices;
mod server;
mod signing;

pub use devices::*;
pub use server::*;
pub use signing::*;

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Accepted `connection.heartbeatIntervalSecs`.
pub const HEARTBEAT_INTERVAL_SECS: RangeInclusive<u64> = 1..=3_600;
/// Accepted `connection.heartbeatTimeoutSecs`.
pub const HEARTBEAT_TIMEOUT_SECS: RangeInclusive<u64> = 1..=7_200;
/// Accepted `connection.writeTimeoutMs`.
pub const WRITE_TIMEOUT_MS: RangeInclusive<u64> = 10..=120_000;
/// Accepted `signing.expirySweepIntervalMs`.
pub const EXPIRY_SWEEP_INTERVAL_MS: RangeInclusive<u64> = 50..=60_000;

/// Root settings type for the gateway.
///
/// ```json
/// {
///   "server": { "port": 8450 },
///   "signing": { "defaultTimeoutMinutes": 15 },
///   "devices": [
///     { "tabletId": "tab-1", "tenantId": "acme", "locationId": "bay-2",
///       "tokenSha256": "9f86d08..." }
///   ]
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SigdeskSettings {
    /// Settings schema version.
    pub version: String,
    /// HTTP listener settings.
    pub server: ServerSettings,
    /// Duplex channel timing and buffering.
    pub connection: ConnectionSettings,
    /// Session timeouts and sweeping.
    pub signing: SigningSettings,
    /// Log output.
    pub logging: LoggingSettings,
    /// Tablet credentials accepted by the static authenticator.
    pub devices: Vec<DeviceCredential>,
}

impl Default for SigdeskSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            server: ServerSettings::default(),
            connection: ConnectionSettings::default(),
            signing: SigningSettings::default(),
            logging: LoggingSettings::default(),
            devices: Vec::new(),
        }
    }
}

impl SigdeskSettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let s = &self.signing;
        if s.min_timeout_minutes == 0 {
            return Err(SettingsError::InvalidValue(
                "signing.minTimeoutMinutes must be at least 1".into(),
            ));
        }
        if s.max_timeout_minutes > MAX_SESSION_TIMEOUT_MINUTES {
            return Err(SettingsError::InvalidValue(format!(
                "signing.maxTimeoutMinutes must not exceed {MAX_SESSION_TIMEOUT_MINUTES}"
            )));
        }
        if !(s.min_timeout_minutes..=s.max_timeout_minutes).contains(&s.default_timeout_minutes) {
            return Err(SettingsError::InvalidValue(format!(
                "signing.defaultTimeoutMinutes {} outside [{}, {}]",
                s.default_timeout_minutes, s.min_timeout_minutes, s.max_timeout_minutes
            )));
        }
        let c = &self.connection;
        check_range(
            "connection.heartbeatIntervalSecs",
            c.heartbeat_interval_secs,
            &HEARTBEAT_INTERVAL_SECS,
        )?;
        check_range(
            "connection.heartbeatTimeoutSecs",
            c.heartbeat_timeout_secs,
            &HEARTBEAT_TIMEOUT_SECS,
        )?;
        check_range("connection.writeTimeoutMs", c.write_timeout_ms, &WRITE_TIMEOUT_MS)?;
        check_range(
            "signing.expirySweepIntervalMs",
            s.expiry_sweep_interval_ms,
            &EXPIRY_SWEEP_INTERVAL_MS,
        )?;
        if c.heartbeat_timeout_secs < c.heartbeat_interval_secs {
            return Err(SettingsError::InvalidValue(
                "connection.heartbeatTimeoutSecs must be >= heartbeatIntervalSecs".into(),
            ));
        }
        for (idx, device) in self.devices.iter().enumerate() {
            if device.tablet_id.is_empty() || device.tenant_id.is_empty() {
                return Err(SettingsError::InvalidValue(format!(
                    "devices[{idx}] needs tabletId and tenantId"
                )));
            }
        }
        Ok(())
    }
}

fn check_range(name: &str, value: u64, range: &RangeInclusive<u64>) -> Result<()> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(SettingsError::InvalidValue(format!(
            "{name} {value} outside [{}, {}]",
            range.start(),
            range.end()
        )))
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (overridden by `RUST_LOG`).
    pub level: String,
    /// Emit JSON lines instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
