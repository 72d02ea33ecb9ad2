//! Read-only projection of the session manager's published state.
//!
//! The session actor is the only writer: every status transition, mode
//! change, and remembered-identity update is sent as a whole
//! [`SessionState`] snapshot over a `tokio::sync::watch` channel.  Everything
//! else (UI bridge, demo binary, tests) holds a [`SessionStateStore`] and
//! reads.  There is no lock to take and no way to mutate the state from the
//! outside.

use peerlink_core::{ConnectionStatus, Identity, NetworkMode, SessionState};
use tokio::sync::watch;

use super::session_manager::SessionError;

/// Subscriber handle for the session state projection.
#[derive(Debug, Clone)]
pub struct SessionStateStore {
    rx: watch::Receiver<SessionState>,
}

impl SessionStateStore {
    pub(crate) fn new(rx: watch::Receiver<SessionState>) -> Self {
        Self { rx }
    }

    /// Returns a copy of the latest state.
    pub fn snapshot(&self) -> SessionState {
        self.rx.borrow().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.rx.borrow().peer_connection_state
    }

    pub fn network_mode(&self) -> NetworkMode {
        self.rx.borrow().network_mode
    }

    /// The last host identity that opened, remembered for reuse.
    pub fn host_id(&self) -> Option<Identity> {
        self.rx.borrow().host_id.clone()
    }

    pub fn save_host(&self) -> bool {
        self.rx.borrow().save_host
    }

    /// Waits until the state changes after the last observed snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ManagerClosed`] once the session actor exits.
    pub async fn changed(&mut self) -> Result<SessionState, SessionError> {
        self.rx
            .changed()
            .await
            .map_err(|_| SessionError::ManagerClosed)?;
        Ok(self.rx.borrow_and_update().clone())
    }

    /// Waits until the status equals `status` (returns at once if it already does).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ManagerClosed`] if the actor exits first.
    pub async fn wait_for_status(&mut self, status: ConnectionStatus) -> Result<(), SessionError> {
        self.rx
            .wait_for(|state| state.peer_connection_state == status)
            .await
            .map(|_| ())
            .map_err(|_| SessionError::ManagerClosed)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_reads_latest_snapshot() {
        // Arrange
        let (tx, rx) = watch::channel(SessionState::default());
        let store = SessionStateStore::new(rx);

        // Act
        tx.send_modify(|s| {
            s.peer_connection_state = ConnectionStatus::Connecting;
            s.network_mode = NetworkMode::Local;
        });

        // Assert
        assert_eq!(store.status(), ConnectionStatus::Connecting);
        assert_eq!(store.network_mode(), NetworkMode::Local);
        assert!(store.host_id().is_none());
        assert!(!store.save_host());
    }

    #[tokio::test]
    async fn test_wait_for_status_returns_once_reached() {
        let (tx, rx) = watch::channel(SessionState::default());
        let mut store = SessionStateStore::new(rx);

        let waiter = tokio::spawn(async move {
            store.wait_for_status(ConnectionStatus::Connected).await
        });
        tx.send_modify(|s| s.peer_connection_state = ConnectionStatus::Connected);

        assert_eq!(waiter.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_changed_reports_closed_when_writer_dropped() {
        let (tx, rx) = watch::channel(SessionState::default());
        let mut store = SessionStateStore::new(rx);
        drop(tx);

        assert_eq!(store.changed().await, Err(SessionError::ManagerClosed));
    }
}
