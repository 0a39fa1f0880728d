//! Signature session timing.

use serde::{Deserialize, Serialize};

/// Hard ceiling on any session timeout.
pub const MAX_SESSION_TIMEOUT_MINUTES: u32 = 60;

/// Session timeout bounds and sweep cadence.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SigningSettings {
    /// Timeout applied when the request does not name one.
    pub default_timeout_minutes: u32,
    /// Smallest accepted timeout.
    pub min_timeout_minutes: u32,
    /// Largest accepted timeout.
    pub max_timeout_minutes: u32,
    /// Interval of the expiry sweep.
    pub expiry_sweep_interval_ms: u64,
    /// How long finished sessions stay pollable.
    pub terminal_retention_secs: u64,
}

impl Default for SigningSettings {
    fn default() -> Self {
        Self {
            default_timeout_minutes: 10,
            min_timeout_minutes: 1,
            max_timeout_minutes: MAX_SESSION_TIMEOUT_MINUTES,
            expiry_sweep_interval_ms: 1_000,
            terminal_retention_secs: 900,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = SigningSettings::default();
        assert_eq!(s.default_timeout_minutes, 10);
        assert_eq!(s.min_timeout_minutes, 1);
        assert_eq!(s.max_timeout_minutes, 60);
        assert_eq!(s.expiry_sweep_interval_ms, 1_000);
        assert_eq!(s.terminal_retention_secs, 900);
    }
}
