//! TOML settings file for the session manager.
//!
//! The file is optional: a missing file yields [`PeerlinkConfig::default`],
//! and every field has a serde default so that partial files load.
//!
//! ```toml
//! [session]
//! reconnect_delay_ms = 4000
//! bus_capacity = 64
//!
//! [transport.local]
//! host = "localhost"
//! port = 3030
//! path = "/ws"
//!
//! [transport.network]
//! host = "0.peerjs.com"
//! port = 443
//! path = "/"
//! secure = true
//!
//! [[transport.network.relays]]
//! urls = ["stun:stun.l.google.com:19302"]
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the field is absent, so upgrading from an older file
//! that lacks newer fields keeps working.
//!
//! Only settings live here.  The remembered host identity is deliberately
//! not written by this module; persisting it is the embedding application's
//! choice (see `SessionManager::with_state`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use peerlink_core::TransportSettings;
use serde::{Deserialize, Serialize};
use tracing::warn;
use thiserror::Error;

use crate::application::message_bus::DEFAULT_BUS_CAPACITY;
use crate::application::session_manager::{SessionManagerConfig, DEFAULT_RECONNECT_DELAY};

/// Error type for settings file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value parsed but is not usable.
    #[error("invalid config value: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level settings file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PeerlinkConfig {
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub transport: TransportSettings,
}

/// `[session]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    /// Delay before a client rebuilds a lost session, in milliseconds.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Events retained per bus stream for slow subscribers.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY.as_millis() as u64
}
fn default_bus_capacity() -> usize {
    DEFAULT_BUS_CAPACITY
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            bus_capacity: default_bus_capacity(),
        }
    }
}

/// Reconnect delays outside this range load, but are logged.
const RECOMMENDED_RECONNECT_DELAY_MS: std::ops::RangeInclusive<u64> = 2_000..=4_000;

impl PeerlinkConfig {
    /// Converts the file contents into runtime settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero `reconnect_delay_ms` or
    /// `bus_capacity`.  A delay outside 2–4 s is accepted with a warning.
    pub fn to_manager_config(&self) -> Result<SessionManagerConfig, ConfigError> {
        let delay_ms = self.session.reconnect_delay_ms;
        if delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "session.reconnect_delay_ms must be at least 1".into(),
            ));
        }
        if !RECOMMENDED_RECONNECT_DELAY_MS.contains(&delay_ms) {
            warn!(
                "session.reconnect_delay_ms = {delay_ms} is outside the recommended {}..={} ms",
                RECOMMENDED_RECONNECT_DELAY_MS.start(),
                RECOMMENDED_RECONNECT_DELAY_MS.end()
            );
        }
        if self.session.bus_capacity == 0 {
            return Err(ConfigError::Invalid("session.bus_capacity must be at least 1".into()));
        }
        Ok(SessionManagerConfig {
            reconnect_delay: Duration::from_millis(self.session.reconnect_delay_ms),
            bus_capacity: self.session.bus_capacity,
            transport: self.transport.clone(),
        })
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Loads settings from `path`, returning defaults if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<PeerlinkConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PeerlinkConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &PeerlinkConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
