//! Domain entities for peerlink.
//!
//! This module contains plain data types with no infrastructure dependencies.
//!
//! # What is "domain" in Clean Architecture? (for beginners)
//!
//! The **domain** layer is the innermost ring of the design.  It holds the
//! nouns of the system (identities, messages, statuses) and nothing that
//! touches the network, a clock, or a UI.  The session manager in
//! `peerlink-session` depends on these types; they never depend on it.

/// Transport endpoint selection (local development vs public rendezvous).
pub mod config;

/// Opaque session addresses.
pub mod identity;

/// The typed message envelope exchanged between peers.
pub mod message;

/// Connection status, operating mode, and the session state projection.
pub mod status;
