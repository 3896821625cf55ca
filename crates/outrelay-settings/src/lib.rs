//! # outrelay-settings
//!
//! Settings are loaded from layered sources (in priority order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: `~/.outrelay/settings.json` or an explicit path,
//!    deep-merged over the defaults
//! 3. **Environment variables**: `OUTRELAY_*` overrides
//!
//! Command-line flags are applied on top by the binary.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{CollectorSettings, KEEPALIVE_SECS_RANGE, RelaySettings, ServerSettings};
