//! peerlink-session library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does peerlink-session do? (for beginners)
//!
//! Several copies of an application (say, an overlay editor and the overlay
//! windows it controls) want to exchange small JSON messages directly, peer
//! to peer.  One copy acts as the **host**: it registers under an identity
//! and accepts connections.  The others are **clients**: each dials the host
//! by identity and keeps redialing if the link drops.
//!
//! The crate:
//!
//! 1. Opens a session with a transport provider (a rendezvous service plus
//!    direct peer links) in host or client role.
//! 2. Publishes connection status through a `watch` channel so a UI can show
//!    it.
//! 3. Fans outbound messages out to every open connection and broadcasts
//!    inbound messages to local subscribers.
//! 4. Rebuilds a lost client session after a fixed delay, forever, until
//!    told to stop.

/// Application layer: the session manager, message bus, and state store.
pub mod application;

/// Infrastructure layer: transport providers, settings file, and UI bridge.
pub mod infrastructure;
