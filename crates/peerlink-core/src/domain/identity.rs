//! Session identity.
//!
//! An [`Identity`] is the opaque string a session registers under at the
//! rendezvous service.  Remote peers dial it to open a connection.  Client
//! sessions use a fresh random identity every time they start; host sessions
//! may reuse a remembered one so that clients can keep dialing the same
//! address across host restarts.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Error returned when a string cannot be used as an identity.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// The identity string was empty or whitespace only.
    #[error("identity must not be empty")]
    Empty,
}

/// Opaque, globally unique address of a session.
///
/// Immutable once constructed.  Serialized as a bare string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Generates a fresh random identity (UUID v4, hyphenated).
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps an existing identity string.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Empty`] if `value` is empty after trimming.
    pub fn parse(value: impl Into<String>) -> Result<Self, IdentityError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(IdentityError::Empty);
        }
        Ok(Self(value))
    }

    /// Returns the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Identity {
    type Error = IdentityError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
