//! Event domain, payload, and record types for the hand-off event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Observability event domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventDomain {
    /// Hand-off lifecycle: token, handshake, rendezvous, termination.
    #[serde(rename = "HANDOFF")]
    Handoff,
    /// Audio routing: routed sink attached, destination faults.
    #[serde(rename = "ROUTING")]
    Routing,
    /// Playback completion reported by the avatar worker.
    #[serde(rename = "PLAYBACK")]
    Playback,
}

impl EventDomain {
    /// Returns the canonical string label for this domain.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Handoff => "HANDOFF",
            Self::Routing => "ROUTING",
            Self::Playback => "PLAYBACK",
        }
    }
}

impl std::fmt::Display for EventDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventDomain {
    type Err = ParseEventDomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HANDOFF" => Ok(Self::Handoff),
            "ROUTING" => Ok(Self::Routing),
            "PLAYBACK" => Ok(Self::Playback),
            _ => Err(ParseEventDomainError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown event domain string.
#[derive(Debug, Clone)]
pub struct ParseEventDomainError(pub String);

impl std::fmt::Display for ParseEventDomainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown event domain: {}", self.0)
    }
}

impl std::error::Error for ParseEventDomainError {}

/// Structured event payloads for each event type.
///
/// Credentials never appear in a payload; only identities, room names and
/// URLs do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    // ── Handoff domain ───────────────────────────────────────────────
    /// A join credential was issued for the avatar worker.
    TokenIssued {
        /// Identity the credential was issued to.
        avatar_identity: String,
        /// The single room the credential grants.
        room_name: String,
        /// Expiry as a unix timestamp (seconds).
        expires_at: i64,
    },

    /// The dispatcher accepted the connection info.
    HandshakeSent {
        dispatcher_url: String,
    },

    /// The avatar worker appeared in the room.
    AvatarJoined {
        avatar_identity: String,
    },

    /// The job ended, normally or through a fatal error.
    JobTerminated {
        /// `session_ended` on a normal end, otherwise the error message.
        reason: String,
    },

    // ── Routing domain ───────────────────────────────────────────────
    /// Session audio now flows to the avatar's private channel.
    AudioRouted {
        destination_identity: String,
    },

    /// The routed destination became unavailable.
    RouterFault {
        destination_identity: String,
        /// The configured policy that was applied (`end_session` or `degrade`).
        policy: String,
        reason: String,
    },

    // ── Playback domain ──────────────────────────────────────────────
    /// The avatar finished (or abandoned) playing one audio segment.
    PlaybackFinished {
        /// Position reached within the segment, in seconds.
        playback_position: f64,
        interrupted: bool,
    },
}

impl EventPayload {
    /// Returns the canonical event type string for this payload.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TokenIssued { .. } => "TOKEN_ISSUED",
            Self::HandshakeSent { .. } => "HANDSHAKE_SENT",
            Self::AvatarJoined { .. } => "AVATAR_JOINED",
            Self::JobTerminated { .. } => "JOB_TERMINATED",
            Self::AudioRouted { .. } => "AUDIO_ROUTED",
            Self::RouterFault { .. } => "ROUTER_FAULT",
            Self::PlaybackFinished { .. } => "PLAYBACK_FINISHED",
        }
    }

    /// Returns the domain for this payload.
    pub fn domain(&self) -> EventDomain {
        match self {
            Self::TokenIssued { .. }
            | Self::HandshakeSent { .. }
            | Self::AvatarJoined { .. }
            | Self::JobTerminated { .. } => EventDomain::Handoff,
            Self::AudioRouted { .. } | Self::RouterFault { .. } => EventDomain::Routing,
            Self::PlaybackFinished { .. } => EventDomain::Playback,
        }
    }
}

/// A single recorded event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedEvent {
    /// Monotonically increasing sequence number within the log.
    pub seq: u64,
    /// The event domain (e.g., `HANDOFF`).
    pub domain: EventDomain,
    /// The specific event type (e.g., `AVATAR_JOINED`).
    pub event_type: String,
    /// The room the event belongs to.
    pub entity_id: String,
    /// The structured event payload.
    pub payload: EventPayload,
    /// When the event was recorded.
    pub occurred_at: DateTime<Utc>,
}
