//! Shared types for the Marionette avatar hand-off.
//!
//! This crate provides the value types exchanged between the hand-off
//! core, the room transport and the worker host: participant references
//! and membership notifications, the dispatcher connection payload, audio
//! frames and the routed stream protocol, playback notifications, and the
//! hand-off state machine.
//!
//! Nothing here performs I/O. Every value is created once per job, owned by
//! the routine that created it, and never mutated after construction.

pub mod connection;
pub mod media;

pub use connection::ConnectionInfo;
pub use media::{AudioFrame, AvatarStreamMessage, PlaybackFinishedEvent, PlaybackNotice};

use serde::{Deserialize, Serialize};

/// Participant attribute naming the agent an avatar publishes on behalf of.
///
/// Downstream consumers use it to attribute the avatar's speech to the
/// correct agent.
pub const ATTRIBUTE_PUBLISH_ON_BEHALF: &str = "lk.publish_on_behalf";

/// Kind (role) of a room participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantKind {
    /// A regular end-user participant.
    Human,
    /// An automated agent (voice agents, avatar workers).
    Agent,
    /// Media ingested from an external source.
    Ingress,
    /// A recorder or other egress participant.
    Egress,
    /// A telephony participant.
    Sip,
}

impl ParticipantKind {
    /// Returns the string label for this kind.
    pub fn label(self) -> &'static str {
        match self {
            Self::Human => "HUMAN",
            Self::Agent => "AGENT",
            Self::Ingress => "INGRESS",
            Self::Egress => "EGRESS",
            Self::Sip => "SIP",
        }
    }
}

impl std::fmt::Display for ParticipantKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for ParticipantKind {
    type Err = ParseParticipantKindError;

    /// Accepts both our labels and the LiveKit protocol names
    /// (`STANDARD` is a human participant).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HUMAN" | "STANDARD" => Ok(Self::Human),
            "AGENT" => Ok(Self::Agent),
            "INGRESS" => Ok(Self::Ingress),
            "EGRESS" => Ok(Self::Egress),
            "SIP" => Ok(Self::Sip),
            _ => Err(ParseParticipantKindError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown participant kind string.
#[derive(Debug, Clone)]
pub struct ParseParticipantKindError(pub String);

impl std::fmt::Display for ParseParticipantKindError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown participant kind: {}", self.0)
    }
}

impl std::error::Error for ParseParticipantKindError {}

/// A participant as seen by the room: who we wait for, and who joined.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantRef {
    pub identity: String,
    pub kind: ParticipantKind,
}

impl ParticipantRef {
    pub fn new(identity: impl Into<String>, kind: ParticipantKind) -> Self {
        Self {
            identity: identity.into(),
            kind,
        }
    }

    /// Returns `true` if this participant has the given identity and kind.
    pub fn matches(&self, identity: &str, kind: ParticipantKind) -> bool {
        self.identity == identity && self.kind == kind
    }
}

/// Room membership notification produced by the room transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MembershipEvent {
    Joined(ParticipantRef),
    Left(ParticipantRef),
}

/// States of the avatar hand-off.
///
/// The hand-off only moves forward through
/// `Init → TokenIssued → HandshakeSent → AvatarJoined → AudioRouted → Running`,
/// and may jump to `Terminated` from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HandoffState {
    Init,
    TokenIssued,
    HandshakeSent,
    AvatarJoined,
    AudioRouted,
    Running,
    Terminated,
}

impl HandoffState {
    /// Returns the canonical label for this state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::TokenIssued => "TOKEN_ISSUED",
            Self::HandshakeSent => "HANDSHAKE_SENT",
            Self::AvatarJoined => "AVATAR_JOINED",
            Self::AudioRouted => "AUDIO_ROUTED",
            Self::Running => "RUNNING",
            Self::Terminated => "TERMINATED",
        }
    }

    /// The state that follows this one on the success path.
    pub fn successor(self) -> Option<Self> {
        match self {
            Self::Init => Some(Self::TokenIssued),
            Self::TokenIssued => Some(Self::HandshakeSent),
            Self::HandshakeSent => Some(Self::AvatarJoined),
            Self::AvatarJoined => Some(Self::AudioRouted),
            Self::AudioRouted => Some(Self::Running),
            Self::Running => Some(Self::Terminated),
            Self::Terminated => None,
        }
    }

    /// Returns `true` if moving from `self` to `next` is a legal transition.
    pub fn can_advance_to(self, next: Self) -> bool {
        if self == Self::Terminated {
            return false;
        }
        next == Self::Terminated || self.successor() == Some(next)
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Terminated
    }
}

impl std::fmt::Display for HandoffState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_kind_parses_livekit_names() {
        assert_eq!("STANDARD".parse::<ParticipantKind>().unwrap(), ParticipantKind::Human);
        assert_eq!("agent".parse::<ParticipantKind>().unwrap(), ParticipantKind::Agent);
        assert!("ROBOT".parse::<ParticipantKind>().is_err());
    }

    #[test]
    fn participant_ref_matches_identity_and_kind() {
        let p = ParticipantRef::new("avatar_worker", ParticipantKind::Agent);
        assert!(p.matches("avatar_worker", ParticipantKind::Agent));
        assert!(!p.matches("avatar_worker", ParticipantKind::Human));
        assert!(!p.matches("someone-else", ParticipantKind::Agent));
    }

    #[test]
    fn membership_event_serializes_with_tag() {
        let ev = MembershipEvent::Joined(ParticipantRef::new("a", ParticipantKind::Agent));
        let value = serde_json::to_value(&ev).unwrap();
        assert_eq!(value["event"], "joined");
        assert_eq!(value["identity"], "a");
        assert_eq!(value["kind"], "AGENT");
    }

    #[test]
    fn handoff_state_advances_only_forward() {
        use HandoffState::*;
        assert!(Init.can_advance_to(TokenIssued));
        assert!(!Init.can_advance_to(HandshakeSent));
        assert!(!AvatarJoined.can_advance_to(HandshakeSent));
        assert!(AudioRouted.can_advance_to(Running));
        assert!(HandshakeSent.can_advance_to(Terminated));
        assert!(!Terminated.can_advance_to(Terminated));
        assert!(!Terminated.can_advance_to(Init));
    }
}
