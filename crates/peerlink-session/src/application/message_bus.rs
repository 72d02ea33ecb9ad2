//! In-process publish surface for inbound traffic.
//!
//! The session manager republishes two kinds of events here:
//!
//! - every [`Message`] received on a live, open connection, and
//! - a [`PeerJoined`] notification each time an inbound connection opens on
//!   a host session.
//!
//! Both streams are `tokio::sync::broadcast` channels: any number of
//! independent subscribers, each sees every event once and in the order the
//! connection delivered it, and nothing is buffered for late subscribers.
//! Subscribing after an event was published misses that event.
//!
//! # Lagging subscribers
//!
//! A subscriber that falls more than `capacity` events behind receives
//! `RecvError::Lagged(n)` on its next `recv()` and resumes from the oldest
//! retained event.  The bus never blocks the session actor to wait for a
//! slow reader.

use peerlink_core::{Identity, Message};
use tokio::sync::broadcast;
use tracing::trace;

/// Default number of events retained per stream for slow subscribers.
pub const DEFAULT_BUS_CAPACITY: usize = 64;

/// Host-side notification that a remote peer's connection opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerJoined {
    pub peer: Identity,
}

/// Fan-out hub for inbound messages and peer-joined notifications.
///
/// Cloning is cheap; every clone publishes to and subscribes from the same
/// streams.
#[derive(Debug, Clone)]
pub struct MessageBus {
    messages: broadcast::Sender<Message>,
    peers: broadcast::Sender<PeerJoined>,
}

impl MessageBus {
    /// Creates a bus that retains up to `capacity` events per stream.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero (a `tokio::sync::broadcast` requirement).
    pub fn new(capacity: usize) -> Self {
        let (messages, _) = broadcast::channel(capacity);
        let (peers, _) = broadcast::channel(capacity);
        Self { messages, peers }
    }

    /// Subscribes to the typed-message stream.
    pub fn subscribe_messages(&self) -> broadcast::Receiver<Message> {
        self.messages.subscribe()
    }

    /// Subscribes to the peer-joined stream.
    pub fn subscribe_peer_joined(&self) -> broadcast::Receiver<PeerJoined> {
        self.peers.subscribe()
    }

    /// Publishes an inbound message.  Returns how many subscribers got it.
    pub(crate) fn publish_message(&self, message: Message) -> usize {
        // `send` only fails when nobody is subscribed, which is not an error.
        let delivered = self.messages.send(message).unwrap_or(0);
        trace!("message published to {delivered} subscriber(s)");
        delivered
    }

    /// Publishes a peer-joined notification.  Returns how many subscribers got it.
    pub(crate) fn publish_peer_joined(&self, peer: Identity) -> usize {
        self.peers.send(PeerJoined { peer }).unwrap_or(0)
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
