//! The hand-off state machine and its coordinator.

use crate::config::HandoffConfig;
use crate::error::HandoffError;
use crate::handshake::HandshakeClient;
use crate::playback::PlaybackCorrelator;
use crate::rendezvous::wait_for_participant;
use crate::room::RoomTransport;
use crate::router::{AttachedRoute, AudioOutputRouter, RouteMonitor};
use crate::session::AgentSession;
use crate::token::TokenIssuer;
use marionette_observe::{emit_or_warn, EventPayload, EventSink};
use marionette_types::{ConnectionInfo, HandoffState, MembershipEvent, ParticipantKind};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Reason recorded in `JOB_TERMINATED` when a session ends normally.
pub const REASON_SESSION_ENDED: &str = "session_ended";

/// Observable progress of one hand-off job.
#[derive(Debug, Clone)]
pub struct HandoffTracker {
    tx: Arc<watch::Sender<HandoffState>>,
}

impl Default for HandoffTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HandoffTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(HandoffState::Init);
        Self { tx: Arc::new(tx) }
    }

    pub fn state(&self) -> HandoffState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<HandoffState> {
        self.tx.subscribe()
    }

    /// Moves to `next` if that is a legal transition. Returns whether the
    /// state changed.
    pub fn advance(&self, next: HandoffState) -> bool {
        self.tx.send_if_modified(|state| {
            if state.can_advance_to(next) {
                *state = next;
                true
            } else {
                false
            }
        })
    }
}

/// Runs the hand-off for one session.
pub struct HandoffCoordinator {
    config: HandoffConfig,
    issuer: TokenIssuer,
    handshake: HandshakeClient,
    events: Arc<dyn EventSink>,
}

impl HandoffCoordinator {
    pub fn new(
        config: HandoffConfig,
        issuer: TokenIssuer,
        handshake: HandshakeClient,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            issuer,
            handshake,
            events,
        }
    }

    /// Hands the session's audio over to an avatar worker.
    ///
    /// On success the tracker is `RUNNING` and the session's audio goes to
    /// the avatar. On failure the tracker is `TERMINATED`, `JOB_TERMINATED`
    /// has been emitted, and a setup-phase failure leaves the session on its
    /// room sink with nothing published.
    ///
    /// # Errors
    ///
    /// Any `HandoffError` from the individual steps, or `Cancelled` if
    /// `cancel` fires first.
    pub async fn establish(
        &self,
        session: &mut AgentSession,
        tracker: &HandoffTracker,
        cancel: &CancellationToken,
    ) -> Result<AvatarLink, HandoffError> {
        let room = session.room().clone();
        match self.run(session, &room, tracker, cancel).await {
            Ok(link) => Ok(link),
            Err(e) => {
                let failed_in = tracker.state();
                tracker.advance(HandoffState::Terminated);
                error!(
                    room = %room.room_name(),
                    state = %failed_in,
                    kind = e.kind(),
                    "avatar hand-off failed: {}",
                    e
                );
                emit_or_warn(
                    self.events.as_ref(),
                    room.room_name(),
                    &EventPayload::JobTerminated {
                        reason: e.to_string(),
                    },
                );
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        session: &mut AgentSession,
        room: &Arc<dyn RoomTransport>,
        tracker: &HandoffTracker,
        cancel: &CancellationToken,
    ) -> Result<AvatarLink, HandoffError> {
        if cancel.is_cancelled() {
            return Err(HandoffError::Cancelled);
        }
        let room_name = room.room_name().to_string();
        let avatar_identity = self.config.avatar_identity.as_str();

        let credential = self.issuer.issue_avatar_token(
            &room_name,
            room.local_identity(),
            avatar_identity,
            self.config.token_ttl,
        )?;
        let expires_at = credential.expires_at();
        self.step(
            tracker,
            &room_name,
            HandoffState::TokenIssued,
            EventPayload::TokenIssued {
                avatar_identity: avatar_identity.to_string(),
                room_name: room_name.clone(),
                expires_at,
            },
        );

        let info = ConnectionInfo::new(&room_name, room.server_url(), credential.into_token());
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(HandoffError::Cancelled),
            result = self.handshake.announce(
                &self.config.dispatcher_url,
                &info,
                self.config.handshake_timeout,
            ) => result?,
        }
        drop(info);
        self.step(
            tracker,
            &room_name,
            HandoffState::HandshakeSent,
            EventPayload::HandshakeSent {
                dispatcher_url: self.config.dispatcher_url.clone(),
            },
        );

        let avatar = wait_for_participant(
            room.as_ref(),
            avatar_identity,
            ParticipantKind::Agent,
            self.config.rendezvous_timeout,
            cancel,
        )
        .await?;
        self.step(
            tracker,
            &room_name,
            HandoffState::AvatarJoined,
            EventPayload::AvatarJoined {
                avatar_identity: avatar.identity.clone(),
            },
        );

        // Subscribed before routing so a departure right after attach is seen.
        let membership = room.subscribe_membership();
        let router = AudioOutputRouter::new(self.config.on_disconnect, self.events.clone());
        let AttachedRoute { monitor, playback } = router.attach(session, &avatar.identity)?;
        self.step(
            tracker,
            &room_name,
            HandoffState::AudioRouted,
            EventPayload::AudioRouted {
                destination_identity: avatar.identity.clone(),
            },
        );

        let correlator = PlaybackCorrelator::spawn(
            playback,
            avatar.identity.clone(),
            room_name.clone(),
            self.events.clone(),
        );
        tracker.advance(HandoffState::Running);
        info!(room = %room_name, avatar = %avatar.identity, "avatar hand-off complete");

        Ok(AvatarLink {
            room: room.clone(),
            room_name,
            tracker: tracker.clone(),
            monitor,
            membership,
            correlator,
            events: self.events.clone(),
        })
    }

    fn step(
        &self,
        tracker: &HandoffTracker,
        room_name: &str,
        next: HandoffState,
        payload: EventPayload,
    ) {
        tracker.advance(next);
        info!(room = room_name, state = %next, "hand-off advanced");
        emit_or_warn(self.events.as_ref(), room_name, &payload);
    }
}

/// A running hand-off: the routed destination, its playback correlator, and
/// the membership subscription used to notice the avatar leaving.
pub struct AvatarLink {
    room: Arc<dyn RoomTransport>,
    room_name: String,
    tracker: HandoffTracker,
    monitor: RouteMonitor,
    membership: broadcast::Receiver<MembershipEvent>,
    correlator: PlaybackCorrelator,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for AvatarLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvatarLink")
            .field("room_name", &self.room_name)
            .field("state", &self.tracker.state())
            .field("monitor", &self.monitor)
            .finish()
    }
}

impl AvatarLink {
    pub fn avatar_identity(&self) -> &str {
        self.monitor.destination()
    }

    pub fn correlator(&self) -> &PlaybackCorrelator {
        &self.correlator
    }

    /// Keeps the session running until `session_end` fires or the avatar is
    /// lost under the end-session policy.
    ///
    /// Always leaves the tracker `TERMINATED` and the correlator stopped.
    ///
    /// # Errors
    ///
    /// Returns `HandoffError::Router` if the avatar left and the policy is
    /// [`RouterFailurePolicy::EndSession`](crate::RouterFailurePolicy::EndSession).
    pub async fn supervise(mut self, session_end: &CancellationToken) -> Result<(), HandoffError> {
        let result = self.watch_membership(session_end).await;

        self.correlator.stop();
        self.tracker.advance(HandoffState::Terminated);
        let reason = match &result {
            Ok(()) => REASON_SESSION_ENDED.to_string(),
            Err(e) => e.to_string(),
        };
        info!(room = %self.room_name, reason = %reason, "hand-off session terminated");
        emit_or_warn(
            self.events.as_ref(),
            &self.room_name,
            &EventPayload::JobTerminated { reason },
        );
        result
    }

    async fn watch_membership(&mut self, session_end: &CancellationToken) -> Result<(), HandoffError> {
        loop {
            let received = tokio::select! {
                biased;
                () = session_end.cancelled() => return Ok(()),
                received = self.membership.recv() => received,
            };

            match received {
                Ok(MembershipEvent::Left(p)) if p.identity == self.monitor.destination() => {
                    self.monitor.report_unavailable("avatar left the room")?;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(room = %self.room_name, skipped, "membership stream lagged");
                    let present = self
                        .room
                        .participants()
                        .iter()
                        .any(|p| p.identity == self.monitor.destination());
                    if !present {
                        self.monitor.report_unavailable("avatar left the room")?;
                    }
                }
                Err(RecvError::Closed) => return Ok(()),
            }
        }
    }
}
