//! Waiting for a specific participant to join the room.

use crate::error::HandoffError;
use crate::room::RoomTransport;
use marionette_types::{MembershipEvent, ParticipantKind, ParticipantRef};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

fn find_present(
    room: &dyn RoomTransport,
    identity: &str,
    kind: ParticipantKind,
) -> Option<ParticipantRef> {
    room.participants()
        .into_iter()
        .find(|p| p.matches(identity, kind))
}

/// Resolves once a participant with `identity` and `kind` is in the room.
///
/// The membership subscription is taken before the presence snapshot, so a
/// participant joining concurrently is seen by one or the other. The
/// subscription is released when this future completes or is dropped.
///
/// # Errors
///
/// - `HandoffError::RendezvousTimeout` if no match appears within `timeout`
/// - `HandoffError::Cancelled` if `cancel` fires first
/// - `HandoffError::RoomClosed` if the membership stream ends
pub async fn wait_for_participant(
    room: &dyn RoomTransport,
    identity: &str,
    kind: ParticipantKind,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ParticipantRef, HandoffError> {
    let mut membership = room.subscribe_membership();

    if let Some(participant) = find_present(room, identity, kind) {
        debug!(identity, "participant already present");
        return Ok(participant);
    }

    let wait = async {
        loop {
            match membership.recv().await {
                Ok(MembershipEvent::Joined(p)) if p.matches(identity, kind) => return Ok(p),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    // Missed notifications; fall back to a fresh snapshot.
                    warn!(skipped, identity, "membership stream lagged during rendezvous");
                    if let Some(participant) = find_present(room, identity, kind) {
                        return Ok(participant);
                    }
                }
                Err(RecvError::Closed) => {
                    return Err(HandoffError::RoomClosed(room.room_name().to_string()));
                }
            }
        }
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(HandoffError::Cancelled),
        result = tokio::time::timeout(timeout, wait) => result.unwrap_or_else(|_| {
            Err(HandoffError::RendezvousTimeout {
                identity: identity.to_string(),
                timeout,
            })
        }),
    }
}
