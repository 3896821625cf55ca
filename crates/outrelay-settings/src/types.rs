//! Settings types.
//!
//! Field names are camelCase on disk. Every struct uses `#[serde(default)]`
//! so a partial file only needs the keys it changes.

use std::ops::RangeInclusive;
use std::time::Duration;

use outrelay_core::KEEPALIVE_WINDOW;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Accepted range for `keepaliveSecs`, from any layer.
pub const KEEPALIVE_SECS_RANGE: RangeInclusive<u64> = 1..=3600;

/// Top-level relay settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Inbound listener.
    pub server: ServerSettings,
    /// Outbound collector.
    pub collector: CollectorSettings,
    /// Seconds of inactivity after which a session is closed.
    pub keepalive_secs: u64,
    /// Default log level (`RUST_LOG` still wins).
    pub log_level: String,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            collector: CollectorSettings::default(),
            keepalive_secs: KEEPALIVE_WINDOW.as_secs(),
            log_level: "info".to_string(),
        }
    }
}

impl RelaySettings {
    /// Keepalive window as a [`Duration`].
    pub fn keepalive_window(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    /// Reject settings the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(SettingsError::InvalidValue("server.host is empty".into()));
        }
        if self.collector.base_url.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "collector.baseUrl is empty".into(),
            ));
        }
        if !KEEPALIVE_SECS_RANGE.contains(&self.keepalive_secs) {
            return Err(SettingsError::InvalidValue(format!(
                "keepaliveSecs must be between {} and {}, got {}",
                KEEPALIVE_SECS_RANGE.start(),
                KEEPALIVE_SECS_RANGE.end(),
                self.keepalive_secs
            )));
        }
        Ok(())
    }
}

/// Inbound HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5555,
        }
    }
}

/// Outbound collector settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollectorSettings {
    /// Base URL; each session streams to `<baseUrl>/<session id>`.
    pub base_url: String,
    /// Skip TLS certificate verification (self-signed collectors).
    pub accept_invalid_certs: bool,
    /// TCP/TLS connect timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            base_url: "https://127.0.0.1:4444/o".to_string(),
            accept_invalid_certs: false,
            connect_timeout_secs: 10,
        }
    }
}

impl CollectorSettings {
    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
