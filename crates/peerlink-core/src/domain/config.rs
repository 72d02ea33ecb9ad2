//! Transport endpoint configuration.
//!
//! [`TransportSettings`] holds both endpoint sets a session can register with;
//! [`TransportSettings::for_mode`] resolves the one that a
//! [`NetworkMode`] selects.  The resolved [`TransportConfig`] is the only
//! configuration the transport provider ever sees.
//!
//! # Design rationale
//!
//! Keeping configuration as plain structs (no global state, no environment
//! reads) makes the session manager easy to embed in tests.  The binary is
//! responsible for populating these from a TOML file or CLI flags.

use serde::{Deserialize, Serialize};

use super::status::NetworkMode;

/// A relay-assist endpoint (STUN/TURN style) handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayServer {
    /// One or more URLs, e.g. `stun:stun.l.google.com:19302`.
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl RelayServer {
    /// A relay that needs no credentials.
    pub fn open(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Where a session registers: rendezvous host, port, path, and relays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_network_host")]
    pub host: String,
    #[serde(default = "default_network_port")]
    pub port: u16,
    #[serde(default = "default_network_path")]
    pub path: String,
    /// Use TLS for the signaling channel.
    #[serde(default)]
    pub secure: bool,
    /// Relay-assist endpoints, tried by the transport when a direct path fails.
    #[serde(default)]
    pub relays: Vec<RelayServer>,
}

impl TransportConfig {
    /// The rendezvous server a developer runs locally.
    ///
    /// | Field  | Value       |
    /// |--------|-------------|
    /// | host   | `localhost` |
    /// | port   | `3030`      |
    /// | path   | `/ws`       |
    /// | secure | `false`     |
    pub fn local() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3030,
            path: "/ws".to_string(),
            secure: false,
            relays: Vec::new(),
        }
    }

    /// The public rendezvous service with a single public STUN relay.
    pub fn network() -> Self {
        Self {
            host: default_network_host(),
            port: default_network_port(),
            path: default_network_path(),
            secure: true,
            relays: vec![RelayServer::open("stun:stun.l.google.com:19302")],
        }
    }

    /// Returns the signaling URL, e.g. `wss://0.peerjs.com:443/`.
    pub fn signaling_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}:{}{}", self.host, self.port, self.path)
    }
}

fn default_network_host() -> String {
    "0.peerjs.com".to_string()
}
fn default_network_port() -> u16 {
    443
}
fn default_network_path() -> String {
    "/".to_string()
}

/// Both endpoint sets; the operating mode picks one at session start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportSettings {
    #[serde(default = "TransportConfig::local")]
    pub local: TransportConfig,
    #[serde(default = "TransportConfig::network")]
    pub network: TransportConfig,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            local: TransportConfig::local(),
            network: TransportConfig::network(),
        }
    }
}

impl TransportSettings {
    /// Resolves the endpoint set for `mode`.
    pub fn for_mode(&self, mode: NetworkMode) -> &TransportConfig {
        match mode {
            NetworkMode::Local => &self.local,
            NetworkMode::Network => &self.network,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_config_points_at_localhost_3030() {
        let cfg = TransportConfig::local();
        assert_eq!(cfg.signaling_url(), "ws://localhost:3030/ws");
        assert!(cfg.relays.is_empty());
    }

    #[test]
    fn test_network_config_is_secure_with_one_relay() {
        let cfg = TransportConfig::network();
        assert!(cfg.secure);
        assert_eq!(cfg.signaling_url(), "wss://0.peerjs.com:443/");
        assert_eq!(cfg.relays.len(), 1);
        assert_eq!(cfg.relays[0].urls, vec!["stun:stun.l.google.com:19302"]);
    }

    #[test]
    fn test_for_mode_selects_matching_endpoint_set() {
        // Arrange
        let settings = TransportSettings::default();

        // Act / Assert
        assert_eq!(settings.for_mode(NetworkMode::Local).port, 3030);
        assert_eq!(settings.for_mode(NetworkMode::Network).port, 443);
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        // Arrange: only the local port is overridden
        let text = r#"
            [local]
            host = "127.0.0.1"
            port = 9000
        "#;

        // Act
        let settings: TransportSettings = toml::from_str(text).unwrap();

        // Assert
        assert_eq!(settings.local.host, "127.0.0.1");
        assert_eq!(settings.local.port, 9000);
        assert_eq!(settings.network, TransportConfig::network());
    }
}
