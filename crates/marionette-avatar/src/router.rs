//! Redirects session audio to a private channel addressed to one participant.
//!
//! After [`AudioOutputRouter::attach`] the session's sink is a
//! [`DataStreamAudioSink`]: every frame, segment end and interruption is sent
//! to the destination as an [`AvatarStreamMessage`] carrying a sequence
//! number from one shared counter. The room-wide path receives nothing.
//!
//! When the destination becomes unavailable the configured
//! [`RouterFailurePolicy`] decides the outcome. Both the sink and the
//! membership supervisor report through the same [`RouteMonitor`], so the
//! fault is recorded once no matter who sees it first.

use crate::config::RouterFailurePolicy;
use crate::error::RouterError;
use crate::room::{RoomTransport, TransportError};
use crate::session::{AgentSession, AudioDestination, AudioSink};
use marionette_observe::{emit_or_warn, EventPayload, EventSink};
use marionette_types::{AudioFrame, AvatarStreamMessage, PlaybackNotice};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Shared fault state of one routed destination.
#[derive(Clone)]
pub struct RouteMonitor {
    destination: String,
    room_name: String,
    policy: RouterFailurePolicy,
    faulted: Arc<AtomicBool>,
    events: Arc<dyn EventSink>,
}

impl fmt::Debug for RouteMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteMonitor")
            .field("destination", &self.destination)
            .field("room_name", &self.room_name)
            .field("policy", &self.policy)
            .field("faulted", &self.is_faulted())
            .finish()
    }
}

impl RouteMonitor {
    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::SeqCst)
    }

    /// Records that the destination is gone and applies the policy.
    ///
    /// The first report emits `ROUTER_FAULT`; later reports only re-apply
    /// the policy.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::DestinationUnavailable` under
    /// [`RouterFailurePolicy::EndSession`].
    pub fn report_unavailable(&self, reason: &str) -> Result<(), RouterError> {
        if !self.faulted.swap(true, Ordering::SeqCst) {
            match self.policy {
                RouterFailurePolicy::EndSession => error!(
                    room = %self.room_name,
                    destination = %self.destination,
                    reason,
                    "routed audio destination lost, ending session"
                ),
                RouterFailurePolicy::Degrade => warn!(
                    room = %self.room_name,
                    destination = %self.destination,
                    reason,
                    "routed audio destination lost, continuing without avatar audio"
                ),
            }
            emit_or_warn(
                self.events.as_ref(),
                &self.room_name,
                &EventPayload::RouterFault {
                    destination_identity: self.destination.clone(),
                    policy: self.policy.as_str().to_string(),
                    reason: reason.to_string(),
                },
            );
        }

        match self.policy {
            RouterFailurePolicy::EndSession => Err(RouterError::DestinationUnavailable(
                self.destination.clone(),
            )),
            RouterFailurePolicy::Degrade => Ok(()),
        }
    }
}

/// Sink that streams audio to one participant over the private channel.
pub struct DataStreamAudioSink {
    room: Arc<dyn RoomTransport>,
    monitor: RouteMonitor,
    next_seq: u64,
    dropped: u64,
}

impl DataStreamAudioSink {
    fn send(
        &mut self,
        message: impl FnOnce(u64) -> AvatarStreamMessage,
    ) -> Result<(), RouterError> {
        if self.monitor.is_faulted() {
            self.monitor.report_unavailable("destination already lost")?;
            self.dropped += 1;
            if self.dropped % 100 == 1 {
                debug!(
                    destination = %self.monitor.destination,
                    dropped = self.dropped,
                    "dropping audio for lost destination"
                );
            }
            return Ok(());
        }

        match self
            .room
            .send_to(&self.monitor.destination, message(self.next_seq))
        {
            Ok(()) => {
                self.next_seq += 1;
                Ok(())
            }
            Err(TransportError::ParticipantUnavailable(_)) => {
                self.monitor.report_unavailable("participant left the room")
            }
            // The avatar is present but not keeping up: shed this message.
            Err(TransportError::Backpressure(_)) => {
                self.dropped += 1;
                if self.dropped % 100 == 1 {
                    warn!(
                        destination = %self.monitor.destination,
                        dropped = self.dropped,
                        "private channel full, dropping audio"
                    );
                }
                Ok(())
            }
            Err(TransportError::Closed) => Err(RouterError::RoomClosed),
        }
    }

    /// Sequence number the next message will carry.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }
}

impl AudioSink for DataStreamAudioSink {
    fn capture_frame(&mut self, frame: AudioFrame) -> Result<(), RouterError> {
        self.send(|seq| AvatarStreamMessage::Frame { seq, frame })
    }

    fn flush(&mut self) -> Result<(), RouterError> {
        self.send(|seq| AvatarStreamMessage::EndOfSegment { seq })
    }

    fn clear_buffer(&mut self) -> Result<(), RouterError> {
        self.send(|seq| AvatarStreamMessage::ClearBuffer { seq })
    }

    fn destination(&self) -> AudioDestination {
        AudioDestination::Participant(self.monitor.destination.clone())
    }

    fn is_degraded(&self) -> bool {
        self.monitor.policy == RouterFailurePolicy::Degrade && self.monitor.is_faulted()
    }
}

/// The result of a successful [`AudioOutputRouter::attach`].
#[derive(Debug)]
pub struct AttachedRoute {
    pub monitor: RouteMonitor,
    /// Playback notifications from this point on, for the correlator.
    pub playback: mpsc::UnboundedReceiver<PlaybackNotice>,
}

pub struct AudioOutputRouter {
    policy: RouterFailurePolicy,
    events: Arc<dyn EventSink>,
}

impl AudioOutputRouter {
    pub fn new(policy: RouterFailurePolicy, events: Arc<dyn EventSink>) -> Self {
        Self { policy, events }
    }

    /// Points the session's audio at `destination`.
    ///
    /// The playback subscription is taken before the sink is swapped, so no
    /// notification for routed audio can be missed.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::DestinationUnavailable` if `destination` is not
    /// in the room; the session keeps its previous sink.
    pub fn attach(
        &self,
        session: &mut AgentSession,
        destination: &str,
    ) -> Result<AttachedRoute, RouterError> {
        let room = session.room().clone();
        if !room.participants().iter().any(|p| p.identity == destination) {
            return Err(RouterError::DestinationUnavailable(destination.to_string()));
        }

        let playback = room.subscribe_playback();
        let monitor = RouteMonitor {
            destination: destination.to_string(),
            room_name: room.room_name().to_string(),
            policy: self.policy,
            faulted: Arc::new(AtomicBool::new(false)),
            events: self.events.clone(),
        };

        session.replace_sink(Box::new(DataStreamAudioSink {
            room,
            monitor: monitor.clone(),
            next_seq: 0,
            dropped: 0,
        }));
        info!(
            room = %monitor.room_name,
            destination,
            policy = %self.policy,
            "session audio routed to participant"
        );

        Ok(AttachedRoute { monitor, playback })
    }
}
