//! Avatar hand-off for the Marionette voice agent.
//!
//! The agent does not render video itself. For each session it issues a
//! join credential for an avatar worker, hands the credential to an external
//! dispatcher, waits for the worker to appear in the room, and then sends
//! all synthesized audio to that worker over a private channel instead of
//! publishing it to the room. Playback-finished notifications from the
//! worker are correlated back to the session.
//!
//! The hand-off is linear:
//!
//! `INIT → TOKEN_ISSUED → HANDSHAKE_SENT → AVATAR_JOINED → AUDIO_ROUTED → RUNNING → TERMINATED`
//!
//! Any failure before `AVATAR_JOINED` aborts the job with no audio reaching
//! the room. After routing, losing the avatar is handled according to the
//! configured [`RouterFailurePolicy`].

pub mod config;
pub mod error;
pub mod handoff;
pub mod handshake;
pub mod playback;
pub mod rendezvous;
pub mod room;
pub mod router;
pub mod session;
pub mod token;

pub use config::{
    AvatarSettings, HandoffConfig, LiveKitConfig, RouterFailurePolicy, DEFAULT_AVATAR_IDENTITY,
    DEFAULT_DISPATCHER_URL,
};
pub use error::{HandoffError, RouterError};
pub use handoff::{AvatarLink, HandoffCoordinator, HandoffTracker, REASON_SESSION_ENDED};
pub use handshake::HandshakeClient;
pub use playback::PlaybackCorrelator;
pub use rendezvous::wait_for_participant;
pub use room::{LocalRoom, RoomTransport, TransportError, PRIVATE_INBOX_CAPACITY};
pub use router::{AttachedRoute, AudioOutputRouter, DataStreamAudioSink, RouteMonitor};
pub use session::{AgentSession, AudioDestination, AudioSink, RoomAudioSink};
pub use token::{
    verify_avatar_token, AvatarClaims, Clock, Credential, CredentialError, FixedClock,
    SystemClock, TokenIssuer, AVATAR_PARTICIPANT_KIND,
};
