//! Audio frames, the routed stream protocol, and playback notifications.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

/// One chunk of synthesized PCM audio (s16le, interleaved).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFrame {
    pub sample_rate: u32,
    pub num_channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFrame {
    pub fn new(sample_rate: u32, num_channels: u16, samples: Vec<i16>) -> Self {
        Self {
            sample_rate,
            num_channels,
            samples,
        }
    }
}

/// A message on the private channel from the agent to its avatar worker.
///
/// Frames, segment ends and interruptions share one sequence counter so the
/// avatar observes a single ordered stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AvatarStreamMessage {
    /// One audio frame.
    Frame { seq: u64, frame: AudioFrame },
    /// The current segment is complete; the avatar reports playback when done.
    EndOfSegment { seq: u64 },
    /// The agent was interrupted; buffered audio should be dropped.
    ClearBuffer { seq: u64 },
}

impl AvatarStreamMessage {
    pub fn seq(&self) -> u64 {
        match self {
            Self::Frame { seq, .. } | Self::EndOfSegment { seq } | Self::ClearBuffer { seq } => {
                *seq
            }
        }
    }
}

/// Emitted once per audio segment when the avatar finishes playing it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackFinishedEvent {
    /// How far into the segment playback got.
    #[serde(
        rename = "playback_position",
        serialize_with = "serialize_secs",
        deserialize_with = "deserialize_secs"
    )]
    pub position: Duration,
    /// Whether playback stopped early because of an interruption.
    pub interrupted: bool,
}

impl PlaybackFinishedEvent {
    pub fn new(position: Duration, interrupted: bool) -> Self {
        Self {
            position,
            interrupted,
        }
    }
}

/// A playback notification as received from the room, tagged with its sender.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackNotice {
    pub sender_identity: String,
    pub event: PlaybackFinishedEvent,
}

fn serialize_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

fn deserialize_secs<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(d)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}
