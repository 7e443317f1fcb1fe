//! Observability layer for the avatar hand-off.
//!
//! Every step of a hand-off job, every routing fault, and every playback
//! completion reported by the avatar is recorded as a typed event. Sinks are
//! handed to components explicitly; there is no process-wide logger state
//! in this crate beyond `tracing` itself.
//!
//! # Event domains
//!
//! | Domain | Example events |
//! |--------|---------------|
//! | `HANDOFF` | `TOKEN_ISSUED`, `HANDSHAKE_SENT`, `AVATAR_JOINED`, `JOB_TERMINATED` |
//! | `ROUTING` | `AUDIO_ROUTED`, `ROUTER_FAULT` |
//! | `PLAYBACK` | `PLAYBACK_FINISHED` |
//!
//! # Usage
//!
//! ```rust
//! use marionette_observe::{EventLog, EventPayload, EventSink};
//!
//! let log = EventLog::new();
//! log.emit_event(
//!     "demo",
//!     &EventPayload::AvatarJoined {
//!         avatar_identity: "avatar_worker".to_string(),
//!     },
//! )
//! .unwrap();
//! assert_eq!(log.len(), 1);
//! ```

mod error;
mod event;
mod store;

pub use error::ObserveError;
pub use event::{EventDomain, EventPayload, ObservedEvent, ParseEventDomainError};
pub use store::{
    emit_or_warn, EventFilter, EventLog, EventSink, DEFAULT_EVENT_LOG_CAPACITY,
};

#[cfg(test)]
mod tests;
