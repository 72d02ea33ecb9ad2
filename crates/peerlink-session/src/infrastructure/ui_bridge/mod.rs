//! Command bridge between a UI front-end and the session manager.
//!
//! A desktop shell (Tauri, a web view, a TUI) polls session status and
//! triggers host/join/stop actions.  The functions here are the thin
//! command handlers it calls; they translate between the application layer
//! and serializable shapes the front-end understands.
//!
//! ```text
//! UI (TypeScript)             IPC              Rust backend
//! ───────────────────────────────────────────────────────────
//! invoke("get_session_status") ──────────>  get_session_status()
//!                              <──────────  SessionStatusDto
//! ```
//!
//! # DTOs (for beginners)
//!
//! [`SessionState`](peerlink_core::SessionState) lives inside a `watch`
//! channel and carries a typed `Identity`.  The DTO here is a plain snapshot
//! with string fields, safe to send across the IPC boundary as JSON.
//!
//! # `CommandResult<T>`
//!
//! Every command returns the same envelope:
//! ```json
//! { "success": true,  "data": {...}, "error": null  }
//! { "success": false, "data": null,  "error": "..." }
//! ```
//! so the front-end has one error-handling path for all commands.

use serde::{Deserialize, Serialize};

use crate::application::SessionManager;

// ── DTOs ──────────────────────────────────────────────────────────────────────

/// Session status snapshot returned to the UI.
///
/// `connection_status` and `network_mode` are the `Debug` names of the enum
/// variants (e.g. `"Connected"`, `"Local"`), which the front-end treats as
/// string literal unions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatusDto {
    pub connection_status: String,
    pub network_mode: String,
    /// Last host identity registered by this manager, if any.
    pub host_id: Option<String>,
    pub save_host: bool,
    /// Identity of the open session; `None` while disconnected or opening.
    pub local_identity: Option<String>,
}

/// Unified response wrapper for bridge commands.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandResult<T: Serialize> {
    /// `true` if the command completed successfully; `false` on error.
    pub success: bool,
    /// The command's return value, present only when `success` is `true`.
    pub data: Option<T>,
    /// A human-readable error message, present only when `success` is `false`.
    pub error: Option<String>,
}

impl<T: Serialize> CommandResult<T> {
    /// Constructs a successful result containing `data`.
    pub fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    /// Constructs an error result containing the given message.
    pub fn err(msg: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(msg.into()) }
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// Returns the current session status snapshot.
pub async fn get_session_status(manager: &SessionManager) -> CommandResult<SessionStatusDto> {
    let state = manager.state().snapshot();
    let local_identity = manager.local_identity().await;

    CommandResult::ok(SessionStatusDto {
        connection_status: format!("{:?}", state.peer_connection_state),
        network_mode: format!("{:?}", state.network_mode),
        host_id: state.host_id.map(|id| id.to_string()),
        save_host: state.save_host,
        local_identity: local_identity.map(|id| id.to_string()),
    })
}

/// Selects the local or public endpoint set for the next session.
pub fn set_network_mode(manager: &SessionManager, local: bool) -> CommandResult<()> {
    manager.set_operating_mode(local);
    CommandResult::ok(())
}

/// Opens a host session and returns the identity peers should join.
pub async fn start_host(manager: &SessionManager) -> CommandResult<String> {
    match manager.start_host().await {
        Ok(identity) => CommandResult::ok(identity.to_string()),
        Err(e) => CommandResult::err(e.to_string()),
    }
}

/// Starts a client session for the host identity the user typed in.
///
/// Surrounding whitespace from copy/paste is trimmed first.
pub fn join_host(manager: &SessionManager, host_id: &str) -> CommandResult<()> {
    match manager.init_client(host_id.trim()) {
        Ok(()) => CommandResult::ok(()),
        Err(e) => CommandResult::err(e.to_string()),
    }
}

/// Ends the current session, whatever its role.
pub fn stop_session(manager: &SessionManager) -> CommandResult<()> {
    manager.stop();
    CommandResult::ok(())
}

/// Flips "remember host" and returns the new value.
pub async fn toggle_remember_host(manager: &SessionManager) -> CommandResult<bool> {
    let mut state = manager.state();
    let before = state.save_host();
    manager.switch_remember_host();
    loop {
        match state.changed().await {
            Ok(snapshot) if snapshot.save_host != before => {
                return CommandResult::ok(snapshot.save_host)
            }
            Ok(_) => continue,
            Err(e) => return CommandResult::err(e.to_string()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
