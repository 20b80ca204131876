// Identifier types for the relay protocol.
//
// `SessionHandle` names one transport connection for as long as it lives. The
// server mints one per accepted socket and keys its session registry by it;
// the client mints one per successful connect and sends it in the Connection
// announcement so the server can address a ChangeID reply before the client
// knows its final Unique ID. Handles are random (UUID v4) because every
// client sees every ChangeID broadcast and must only act on its own.
//
// Unique IDs themselves are plain `String`s chosen by the application.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque per-connection handle, unique for the connection's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionHandle(Uuid);

impl SessionHandle {
    /// Mint a fresh handle for a newly established connection.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for SessionHandle {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}
