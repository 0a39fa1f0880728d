//! # sigdesk-settings
//!
//! Configuration for the sigdesk gateway, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`SigdeskSettings::default()`]
//! 2. **Settings file**: `~/.sigdesk/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `SIGDESK_*` overrides (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! let settings = sigdesk_settings::load_settings().unwrap_or_default();
//! println!("listening on {}:{}", settings.server.host, settings.server.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
};
pub use types::*;
