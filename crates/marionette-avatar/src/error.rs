use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HandoffError {
    /// Signing material or required configuration is missing or invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The dispatcher was unreachable or rejected the connection info.
    #[error("Avatar handshake failed: {0}")]
    Handshake(String),

    #[error("Avatar '{identity}' did not join within {timeout:?}")]
    RendezvousTimeout { identity: String, timeout: Duration },

    #[error("Audio router error: {0}")]
    Router(#[from] RouterError),

    /// The enclosing job was torn down before the step completed.
    #[error("Hand-off cancelled")]
    Cancelled,

    #[error("Room '{0}' closed")]
    RoomClosed(String),
}

impl HandoffError {
    /// Short machine-readable label, used in observe events and API errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Handshake(_) => "handshake",
            Self::RendezvousTimeout { .. } => "rendezvous_timeout",
            Self::Router(_) => "router",
            Self::Cancelled => "cancelled",
            Self::RoomClosed(_) => "room_closed",
        }
    }
}

/// Errors from the session's audio output.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("routed destination '{0}' is unavailable")]
    DestinationUnavailable(String),

    #[error("room is closed")]
    RoomClosed,
}
