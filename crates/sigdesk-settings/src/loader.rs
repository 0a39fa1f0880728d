//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`SigdeskSettings::default()`]
//! 2. If `~/.sigdesk/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `SIGDESK_*` environment variable overrides
//! 4. Validate cross-field constraints
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{
    EXPIRY_SWEEP_INTERVAL_MS, HEARTBEAT_INTERVAL_SECS, HEARTBEAT_TIMEOUT_SECS,
    MAX_SESSION_TIMEOUT_MINUTES, SigdeskSettings, WRITE_TIMEOUT_MS,
};

/// Resolve the path to the settings file (`~/.sigdesk/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".sigdesk").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<SigdeskSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or values that fail
/// [`SigdeskSettings::validate`] are errors.
pub fn load_settings_from_path(path: &Path) -> Result<SigdeskSettings> {
    let mut settings = read_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_file_layer(path: &Path) -> Result<SigdeskSettings> {
    let defaults = serde_json::to_value(SigdeskSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored (file/default value stays).
pub fn apply_env_overrides(settings: &mut SigdeskSettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("SIGDESK_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("SIGDESK_PORT", 0, 65535) {
        settings.server.port = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("SIGDESK_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("SIGDESK_LOG_JSON") {
        settings.logging.json = v;
    }

    // ── Connection ──────────────────────────────────────────────────
    if let Some(v) = read_env_u64("SIGDESK_HEARTBEAT_INTERVAL_SECS", &HEARTBEAT_INTERVAL_SECS) {
        settings.connection.heartbeat_interval_secs = v;
    }
    if let Some(v) = read_env_u64("SIGDESK_HEARTBEAT_TIMEOUT_SECS", &HEARTBEAT_TIMEOUT_SECS) {
        settings.connection.heartbeat_timeout_secs = v;
    }
    if let Some(v) = read_env_u64("SIGDESK_WRITE_TIMEOUT_MS", &WRITE_TIMEOUT_MS) {
        settings.connection.write_timeout_ms = v;
    }

    // ── Signing ─────────────────────────────────────────────────────
    if let Some(v) = read_env_u64("SIGDESK_SWEEP_INTERVAL_MS", &EXPIRY_SWEEP_INTERVAL_MS) {
        settings.signing.expiry_sweep_interval_ms = v;
    }
    if let Some(v) = read_env_u32("SIGDESK_DEFAULT_TIMEOUT_MINUTES", 1, MAX_SESSION_TIMEOUT_MINUTES)
    {
        settings.signing.default_timeout_minutes = v;
    }
    if let Some(v) = read_env_u32("SIGDESK_MAX_TIMEOUT_MINUTES", 1, MAX_SESSION_TIMEOUT_MINUTES) {
        settings.signing.max_timeout_minutes = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within an inclusive range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `u32` within an inclusive range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u32(name: &str, min: u32, max: u32) -> Option<u32> {
    let val = std::env::var(name).ok()?;
    let result = parse_u32_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u32 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, range: &RangeInclusive<u64>) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, *range.start(), *range.end());
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
