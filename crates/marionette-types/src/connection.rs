//! Connection payload handed to the avatar dispatcher.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Everything an avatar worker needs to join the agent's room.
///
/// Serialized verbatim as the handshake body. The field names are a wire
/// contract with the dispatcher: `{"room_name", "url", "token"}`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub room_name: String,
    /// Room server URL.
    #[serde(rename = "url")]
    pub server_url: String,
    /// Join token for the avatar worker.
    pub token: String,
}

impl ConnectionInfo {
    pub fn new(
        room_name: impl Into<String>,
        server_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            room_name: room_name.into(),
            server_url: server_url.into(),
            token: token.into(),
        }
    }
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("room_name", &self.room_name)
            .field("server_url", &self.server_url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}
