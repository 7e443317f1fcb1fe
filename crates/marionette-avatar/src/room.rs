//! The seam between the hand-off and the room transport.
//!
//! Track publishing, signaling and RPC belong to the transport. The
//! hand-off only needs membership, the two audio paths, and playback
//! notifications, which is what [`RoomTransport`] exposes.
//!
//! [`LocalRoom`] is an in-process implementation. The worker feeds its
//! membership from LiveKit webhooks; tests drive it directly.

use marionette_types::{
    AudioFrame, AvatarStreamMessage, MembershipEvent, ParticipantKind, ParticipantRef,
    PlaybackFinishedEvent, PlaybackNotice,
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

/// Capacity of the membership broadcast channel.
const MEMBERSHIP_BROADCAST_CAPACITY: usize = 64;

/// Capacity of the room-wide audio broadcast channel.
const ROOM_AUDIO_BROADCAST_CAPACITY: usize = 1024;

/// Messages buffered on one participant's private channel before sends are
/// refused with [`TransportError::Backpressure`].
pub const PRIVATE_INBOX_CAPACITY: usize = 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("participant '{0}' is not in the room")]
    ParticipantUnavailable(String),

    #[error("private channel to '{0}' is full")]
    Backpressure(String),

    #[error("room is closed")]
    Closed,
}

/// Room operations the hand-off depends on.
pub trait RoomTransport: Send + Sync {
    fn room_name(&self) -> &str;

    /// URL of the room server this agent is connected to.
    fn server_url(&self) -> &str;

    /// Identity of the local (agent) participant.
    fn local_identity(&self) -> &str;

    /// Snapshot of the remote participants currently in the room.
    fn participants(&self) -> Vec<ParticipantRef>;

    /// Membership notifications from this point on.
    fn subscribe_membership(&self) -> broadcast::Receiver<MembershipEvent>;

    /// Publishes a frame on the room-wide audio track.
    fn publish_audio(&self, frame: &AudioFrame) -> Result<(), TransportError>;

    /// Sends a message over the private channel to `destination`.
    fn send_to(&self, destination: &str, message: AvatarStreamMessage)
        -> Result<(), TransportError>;

    /// Playback notifications sent by remote participants from this point on.
    fn subscribe_playback(&self) -> mpsc::UnboundedReceiver<PlaybackNotice>;
}

#[derive(Debug)]
struct Member {
    kind: ParticipantKind,
    inbox_tx: mpsc::Sender<AvatarStreamMessage>,
    inbox_rx: Option<mpsc::Receiver<AvatarStreamMessage>>,
}

#[derive(Debug, Default)]
struct RoomState {
    members: HashMap<String, Member>,
    playback_subscribers: Vec<mpsc::UnboundedSender<PlaybackNotice>>,
    membership_tx: Option<broadcast::Sender<MembershipEvent>>,
}

/// In-process room.
#[derive(Debug)]
pub struct LocalRoom {
    name: String,
    server_url: String,
    local_identity: String,
    state: Mutex<RoomState>,
    room_audio_tx: broadcast::Sender<AudioFrame>,
}

impl LocalRoom {
    pub fn new(
        name: impl Into<String>,
        server_url: impl Into<String>,
        local_identity: impl Into<String>,
    ) -> Self {
        let (membership_tx, _) = broadcast::channel(MEMBERSHIP_BROADCAST_CAPACITY);
        let (room_audio_tx, _) = broadcast::channel(ROOM_AUDIO_BROADCAST_CAPACITY);
        Self {
            name: name.into(),
            server_url: server_url.into(),
            local_identity: local_identity.into(),
            state: Mutex::new(RoomState {
                membership_tx: Some(membership_tx),
                ..Default::default()
            }),
            room_audio_tx,
        }
    }

    // A panic while holding the lock leaves the maps consistent, so a
    // poisoned lock is still usable.
    fn state(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds (or replaces) a participant and notifies subscribers.
    ///
    /// Returns `false` if the room is closed.
    pub fn join(&self, participant: ParticipantRef) -> bool {
        let mut state = self.state();
        let Some(tx) = state.membership_tx.clone() else {
            return false;
        };

        let (inbox_tx, inbox_rx) = mpsc::channel(PRIVATE_INBOX_CAPACITY);
        state.members.insert(
            participant.identity.clone(),
            Member {
                kind: participant.kind,
                inbox_tx,
                inbox_rx: Some(inbox_rx),
            },
        );
        info!(
            room = %self.name,
            identity = %participant.identity,
            kind = %participant.kind,
            "participant joined"
        );
        // Sent under the lock so a subscriber never sees a join that is
        // missing from a later snapshot.
        let _ = tx.send(MembershipEvent::Joined(participant));
        true
    }

    /// Removes a participant. Returns `false` if it was not present.
    pub fn leave(&self, identity: &str) -> bool {
        let mut state = self.state();
        let Some(member) = state.members.remove(identity) else {
            return false;
        };
        info!(room = %self.name, identity, "participant left");
        if let Some(tx) = &state.membership_tx {
            let _ = tx.send(MembershipEvent::Left(ParticipantRef::new(
                identity,
                member.kind,
            )));
        }
        true
    }

    /// Closes the room: all participants leave and membership streams end.
    pub fn close(&self) {
        let mut state = self.state();
        let members: Vec<(String, ParticipantKind)> = state
            .members
            .drain()
            .map(|(identity, member)| (identity, member.kind))
            .collect();
        if let Some(tx) = state.membership_tx.take() {
            for (identity, kind) in members {
                let _ = tx.send(MembershipEvent::Left(ParticipantRef::new(identity, kind)));
            }
        }
        state.playback_subscribers.clear();
        info!(room = %self.name, "room closed");
    }

    pub fn is_closed(&self) -> bool {
        self.state().membership_tx.is_none()
    }

    /// Takes the receiving end of a participant's private channel.
    ///
    /// This is the remote participant's view; it can be taken once per join.
    /// Until it is taken and drained, at most [`PRIVATE_INBOX_CAPACITY`]
    /// messages are held for the participant.
    pub fn take_inbox(&self, identity: &str) -> Option<mpsc::Receiver<AvatarStreamMessage>> {
        self.state()
            .members
            .get_mut(identity)
            .and_then(|member| member.inbox_rx.take())
    }

    /// Observes frames published on the room-wide audio path.
    pub fn subscribe_room_audio(&self) -> broadcast::Receiver<AudioFrame> {
        self.room_audio_tx.subscribe()
    }

    /// Delivers a playback notification from a remote participant.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ParticipantUnavailable` if `sender` is not in
    /// the room.
    pub fn notify_playback_finished(
        &self,
        sender: &str,
        event: PlaybackFinishedEvent,
    ) -> Result<(), TransportError> {
        let mut state = self.state();
        if !state.members.contains_key(sender) {
            return Err(TransportError::ParticipantUnavailable(sender.to_string()));
        }
        let notice = PlaybackNotice {
            sender_identity: sender.to_string(),
            event,
        };
        state
            .playback_subscribers
            .retain(|tx| tx.send(notice.clone()).is_ok());
        Ok(())
    }
}

impl RoomTransport for LocalRoom {
    fn room_name(&self) -> &str {
        &self.name
    }

    fn server_url(&self) -> &str {
        &self.server_url
    }

    fn local_identity(&self) -> &str {
        &self.local_identity
    }

    fn participants(&self) -> Vec<ParticipantRef> {
        self.state()
            .members
            .iter()
            .map(|(identity, member)| ParticipantRef::new(identity.clone(), member.kind))
            .collect()
    }

    fn subscribe_membership(&self) -> broadcast::Receiver<MembershipEvent> {
        match &self.state().membership_tx {
            Some(tx) => tx.subscribe(),
            None => {
                // Closed room: hand back a stream that is already finished.
                let (tx, rx) = broadcast::channel(1);
                drop(tx);
                rx
            }
        }
    }

    fn publish_audio(&self, frame: &AudioFrame) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        // No listeners is fine; the room path is fire-and-forget.
        let _ = self.room_audio_tx.send(frame.clone());
        Ok(())
    }

    fn send_to(
        &self,
        destination: &str,
        message: AvatarStreamMessage,
    ) -> Result<(), TransportError> {
        let state = self.state();
        if state.membership_tx.is_none() {
            return Err(TransportError::Closed);
        }
        let member = state
            .members
            .get(destination)
            .ok_or_else(|| TransportError::ParticipantUnavailable(destination.to_string()))?;
        member.inbox_tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                TransportError::Backpressure(destination.to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                TransportError::ParticipantUnavailable(destination.to_string())
            }
        })?;
        debug!(room = %self.name, destination, "sent private stream message");
        Ok(())
    }

    fn subscribe_playback(&self) -> mpsc::UnboundedReceiver<PlaybackNotice> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().playback_subscribers.push(tx);
        rx
    }
}
