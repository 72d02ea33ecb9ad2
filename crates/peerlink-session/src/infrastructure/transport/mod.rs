//! Transport provider contract.
//!
//! The session manager never talks to sockets itself.  It drives an external
//! **transport provider** (a signaling + data-channel stack) through the two
//! traits in this module and consumes everything the provider reports as a
//! finite [`TransportEvent`] enum.
//!
//! # How events reach the session manager (for beginners)
//!
//! A callback-style transport fires named callbacks ("open", "close",
//! "data", ...) at arbitrary times, including after the object that fired
//! them has been torn down.  Here the provider is instead handed an
//! [`EventSink`] when a session is opened.  The sink:
//!
//! - stamps every event with the [`Generation`] of the session it belongs to,
//! - pushes it onto an unbounded channel that the session actor drains, and
//! - never blocks the provider.
//!
//! ```text
//! provider thread/task            session actor
//! ────────────────────────────────────────────────────────
//! sink.connection_open(id) ──>  (gen 7, Connection{id, Open})
//!                                 gen 7 == live session?  apply : discard
//! ```
//!
//! Because the actor compares the stamped generation with the live session,
//! a late "close" from a session that was destroyed during a reconnect can
//! never touch the state of its replacement.

pub mod memory;

use std::fmt;

use peerlink_core::{Identity, Message, TransportConfig};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors a transport provider can report synchronously.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The rendezvous service could not be reached.
    #[error("rendezvous service unreachable: {0}")]
    Unreachable(String),
    /// Another session already holds the requested identity.
    #[error("identity {0} is already taken")]
    IdentityTaken(Identity),
    /// The connection id does not belong to this session.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
    /// The session or connection has already been closed.
    #[error("transport closed")]
    Closed,
    /// Any other provider-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Provider-allocated handle for one connection inside a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Monotonic tag identifying one session lifetime within a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Generation(pub u64);

impl Generation {
    /// Returns the generation that follows this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen{}", self.0)
    }
}

/// Options for an outbound connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Ask for an ordered, retransmitting data channel.
    pub reliable: bool,
}

impl ConnectOptions {
    /// Ordered, reliable delivery.  The only mode the session manager uses.
    pub fn reliable() -> Self {
        Self { reliable: true }
    }
}

/// Lifecycle events of the local session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Registered with the rendezvous service; the identity is now reachable.
    Open,
    /// Session-level failure (signaling unreachable, identity collision,
    /// remote peer unavailable, ...).
    Error(String),
    /// The signaling channel dropped; existing connections may survive.
    Disconnected,
    /// A remote peer dialed this session.
    IncomingConnection {
        connection: ConnectionId,
        remote: Identity,
    },
}

/// Lifecycle events of one connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Open,
    Close,
    Error(String),
    Data(Message),
}

/// Everything a provider can report.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Session(SessionEvent),
    Connection {
        id: ConnectionId,
        event: ConnectionEvent,
    },
}

/// A [`TransportEvent`] stamped with the generation of the session that
/// produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedEvent {
    pub generation: Generation,
    pub event: TransportEvent,
}

/// Non-blocking event callback handed to a provider for one session.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: Generation,
    tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl EventSink {
    /// Creates a sink that stamps `generation` on everything sent to `tx`.
    pub fn new(generation: Generation, tx: mpsc::UnboundedSender<TaggedEvent>) -> Self {
        Self { generation, tx }
    }

    /// Creates a sink together with the receiver that observes it.
    pub fn channel(generation: Generation) -> (Self, mpsc::UnboundedReceiver<TaggedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(generation, tx), rx)
    }

    /// The generation stamped on every event from this sink.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Delivers `event`.  Returns `false` if the receiving side is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(TaggedEvent {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    pub fn session_open(&self) -> bool {
        self.emit(TransportEvent::Session(SessionEvent::Open))
    }

    pub fn session_error(&self, detail: impl Into<String>) -> bool {
        self.emit(TransportEvent::Session(SessionEvent::Error(detail.into())))
    }

    pub fn session_disconnected(&self) -> bool {
        self.emit(TransportEvent::Session(SessionEvent::Disconnected))
    }

    pub fn incoming_connection(&self, connection: ConnectionId, remote: Identity) -> bool {
        self.emit(TransportEvent::Session(SessionEvent::IncomingConnection {
            connection,
            remote,
        }))
    }

    pub fn connection_open(&self, id: ConnectionId) -> bool {
        self.connection(id, ConnectionEvent::Open)
    }

    pub fn connection_close(&self, id: ConnectionId) -> bool {
        self.connection(id, ConnectionEvent::Close)
    }

    pub fn connection_error(&self, id: ConnectionId, detail: impl Into<String>) -> bool {
        self.connection(id, ConnectionEvent::Error(detail.into()))
    }

    pub fn data(&self, id: ConnectionId, message: Message) -> bool {
        self.connection(id, ConnectionEvent::Data(message))
    }

    fn connection(&self, id: ConnectionId, event: ConnectionEvent) -> bool {
        self.emit(TransportEvent::Connection { id, event })
    }
}

/// Opens sessions with a rendezvous service.
pub trait TransportProvider: Send + Sync {
    /// Starts registering `identity` with the endpoint described by `config`.
    ///
    /// Registration completes asynchronously: the provider later reports
    /// exactly one of [`SessionEvent::Open`] or [`SessionEvent::Error`]
    /// through `sink`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the session object cannot even be
    /// created (e.g. malformed configuration).
    fn open(
        &self,
        identity: &Identity,
        config: &TransportConfig,
        sink: EventSink,
    ) -> Result<Box<dyn TransportSession>, TransportError>;
}

/// One registered session and the connections nested inside it.
pub trait TransportSession: Send {
    /// Dials `remote`.  The returned connection reports `Open` once usable.
    fn connect(
        &mut self,
        remote: &Identity,
        options: ConnectOptions,
    ) -> Result<ConnectionId, TransportError>;

    /// Sends `message` on an open connection.
    fn send(&self, connection: ConnectionId, message: &Message) -> Result<(), TransportError>;

    /// Closes one connection.  Unknown ids are ignored.
    fn close(&mut self, connection: ConnectionId);

    /// Destroys the session and every connection inside it.
    fn destroy(&mut self);

    /// `true` once the signaling channel is gone or the session is destroyed.
    fn is_disconnected(&self) -> bool;
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_next_increments() {
        assert_eq!(Generation(3).next(), Generation(4));
    }

    #[test]
    fn test_sink_stamps_its_generation() {
        // Arrange
        let (sink, mut rx) = EventSink::channel(Generation(7));

        // Act
        assert!(sink.connection_open(ConnectionId(1)));

        // Assert
        let tagged = rx.try_recv().unwrap();
        assert_eq!(tagged.generation, Generation(7));
        assert_eq!(
            tagged.event,
            TransportEvent::Connection {
                id: ConnectionId(1),
                event: ConnectionEvent::Open
            }
        );
    }

    #[test]
    fn test_sink_reports_false_when_receiver_dropped() {
        let (sink, rx) = EventSink::channel(Generation(1));
        drop(rx);
        assert!(!sink.session_open());
    }

    #[test]
    fn test_connect_options_reliable_sets_flag() {
        assert!(ConnectOptions::reliable().reliable);
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId(42).to_string(), "conn#42");
    }
}
