//! The agent session's audio output.

use crate::error::RouterError;
use crate::room::{RoomTransport, TransportError};
use marionette_types::AudioFrame;
use std::sync::Arc;

/// Where session audio currently goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioDestination {
    /// The room-wide publish path.
    Room,
    /// A private channel to one participant.
    Participant(String),
}

/// A destination for synthesized audio.
pub trait AudioSink: Send {
    fn capture_frame(&mut self, frame: AudioFrame) -> Result<(), RouterError>;

    /// Marks the end of the current segment.
    fn flush(&mut self) -> Result<(), RouterError>;

    /// Discards the current segment after an interruption.
    fn clear_buffer(&mut self) -> Result<(), RouterError>;

    fn destination(&self) -> AudioDestination;

    fn is_degraded(&self) -> bool {
        false
    }
}

/// Default sink: publishes on the room-wide audio track.
pub struct RoomAudioSink {
    room: Arc<dyn RoomTransport>,
}

impl RoomAudioSink {
    pub fn new(room: Arc<dyn RoomTransport>) -> Self {
        Self { room }
    }
}

impl AudioSink for RoomAudioSink {
    fn capture_frame(&mut self, frame: AudioFrame) -> Result<(), RouterError> {
        self.room.publish_audio(&frame).map_err(|e| match e {
            TransportError::Closed => RouterError::RoomClosed,
            TransportError::ParticipantUnavailable(identity)
            | TransportError::Backpressure(identity) => {
                RouterError::DestinationUnavailable(identity)
            }
        })
    }

    fn flush(&mut self) -> Result<(), RouterError> {
        Ok(())
    }

    fn clear_buffer(&mut self) -> Result<(), RouterError> {
        Ok(())
    }

    fn destination(&self) -> AudioDestination {
        AudioDestination::Room
    }
}

/// A conversational session as seen by the hand-off.
///
/// The speech pipeline pushes synthesized audio through the session; the
/// session owns exactly one sink at a time, so swapping it requires
/// exclusive access and no frame can reach two paths.
pub struct AgentSession {
    room: Arc<dyn RoomTransport>,
    sink: Box<dyn AudioSink>,
}

impl AgentSession {
    /// Creates a session publishing audio on the room-wide path.
    pub fn new(room: Arc<dyn RoomTransport>) -> Self {
        let sink = Box::new(RoomAudioSink::new(room.clone()));
        Self { room, sink }
    }

    pub fn room(&self) -> &Arc<dyn RoomTransport> {
        &self.room
    }

    pub fn capture_frame(&mut self, frame: AudioFrame) -> Result<(), RouterError> {
        self.sink.capture_frame(frame)
    }

    pub fn flush(&mut self) -> Result<(), RouterError> {
        self.sink.flush()
    }

    pub fn clear_buffer(&mut self) -> Result<(), RouterError> {
        self.sink.clear_buffer()
    }

    pub fn audio_destination(&self) -> AudioDestination {
        self.sink.destination()
    }

    /// `true` once a routed destination failed under the degrade policy.
    pub fn is_degraded(&self) -> bool {
        self.sink.is_degraded()
    }

    /// Replaces the audio sink, returning the previous one.
    pub fn replace_sink(&mut self, sink: Box<dyn AudioSink>) -> Box<dyn AudioSink> {
        std::mem::replace(&mut self.sink, sink)
    }
}

impl std::fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSession")
            .field("room", &self.room.room_name())
            .field("destination", &self.sink.destination())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::LocalRoom;

    #[tokio::test]
    async fn default_sink_publishes_to_room() {
        let room = Arc::new(LocalRoom::new("demo", "ws://localhost:7880", "agent-1"));
        let mut room_audio = room.subscribe_room_audio();
        let mut session = AgentSession::new(room.clone());

        assert_eq!(session.audio_destination(), AudioDestination::Room);
        let frame = AudioFrame::new(24_000, 1, vec![1, 2, 3]);
        session.capture_frame(frame.clone()).unwrap();
        session.flush().unwrap();

        assert_eq!(room_audio.recv().await.unwrap(), frame);
        assert!(!session.is_degraded());
    }

    #[test]
    fn closed_room_surfaces_router_error() {
        let room = Arc::new(LocalRoom::new("demo", "ws://localhost:7880", "agent-1"));
        let mut session = AgentSession::new(room.clone());
        room.close();

        let err = session
            .capture_frame(AudioFrame::new(24_000, 1, vec![0]))
            .unwrap_err();
        assert_eq!(err, RouterError::RoomClosed);
    }
}
