//! Connection status and the session state projection.
//!
//! [`SessionState`] is what the rest of an application reads to display the
//! link: the current [`ConnectionStatus`], which [`NetworkMode`] the next
//! session will use, the remembered host identity, and whether that identity
//! should be reused.  Only the session manager writes it.

use serde::{Deserialize, Serialize};

use super::identity::Identity;

/// Liveness of the local session as seen by a user interface.
///
/// For a client this tracks the single uplink to the host.  For a host it
/// tracks the session itself: it stays `Connected` while the host session is
/// open even when no peer is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ConnectionStatus {
    /// No session, or the last one was lost or stopped.
    #[default]
    Disconnected,
    /// A session has been requested and is not yet usable.
    Connecting,
    /// The session (host) or the uplink (client) is open.
    Connected,
}

/// Which transport endpoint set new sessions register with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// A rendezvous server running on the developer's machine.
    Local,
    /// The public rendezvous service plus relay servers.
    #[default]
    Network,
}

impl NetworkMode {
    /// Maps the `local` flag used by `set_operating_mode` to a mode.
    pub fn from_local_flag(local: bool) -> Self {
        if local {
            Self::Local
        } else {
            Self::Network
        }
    }
}

/// Snapshot of everything the session manager publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SessionState {
    /// Current connection status.
    pub peer_connection_state: ConnectionStatus,
    /// Endpoint set used by the next session.
    pub network_mode: NetworkMode,
    /// Identity of the last host session that opened, if any.
    pub host_id: Option<Identity>,
    /// Reuse `host_id` on the next `start_host` instead of generating one.
    pub save_host: bool,
}

impl SessionState {
    /// Returns a state that starts out remembering `host_id`.
    ///
    /// This is the hook for callers that persist the host identity across
    /// restarts themselves.
    pub fn remembering(host_id: Identity) -> Self {
        Self {
            host_id: Some(host_id),
            save_host: true,
            ..Self::default()
        }
    }

    /// Picks the identity a new host session should register under.
    ///
    /// Reuses the remembered identity only when `save_host` is set and one is
    /// present; otherwise generates a fresh one.
    pub fn next_host_identity(&self) -> Identity {
        match (&self.host_id, self.save_host) {
            (Some(id), true) => id.clone(),
            _ => Identity::random(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
