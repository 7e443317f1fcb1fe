//! Correlates playback-finished notifications from the avatar worker.

use marionette_observe::{emit_or_warn, EventPayload, EventSink};
use marionette_types::{PlaybackFinishedEvent, PlaybackNotice};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Capacity of the in-process playback broadcast.
const PLAYBACK_BROADCAST_CAPACITY: usize = 64;

/// Drains playback notifications in a background task.
///
/// Notifications are handled in arrival order, which is the order the avatar
/// finished the segments. The sender side is unbounded, so the audio path
/// never waits on this task.
#[derive(Debug)]
pub struct PlaybackCorrelator {
    history: Arc<Mutex<Vec<PlaybackFinishedEvent>>>,
    tx: broadcast::Sender<PlaybackFinishedEvent>,
    task: JoinHandle<()>,
}

impl PlaybackCorrelator {
    /// Starts correlating notices sent by `avatar_identity`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        mut notices: mpsc::UnboundedReceiver<PlaybackNotice>,
        avatar_identity: String,
        room_name: String,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let history = Arc::new(Mutex::new(Vec::new()));
        let (tx, _) = broadcast::channel(PLAYBACK_BROADCAST_CAPACITY);

        let task_history = history.clone();
        let task_tx = tx.clone();
        let task = tokio::spawn(async move {
            while let Some(notice) = notices.recv().await {
                if notice.sender_identity != avatar_identity {
                    debug!(
                        room = %room_name,
                        sender = %notice.sender_identity,
                        "ignoring playback notice from unrelated participant"
                    );
                    continue;
                }

                let event = notice.event;
                task_history
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(event);

                emit_or_warn(
                    events.as_ref(),
                    &room_name,
                    &EventPayload::PlaybackFinished {
                        playback_position: event.position.as_secs_f64(),
                        interrupted: event.interrupted,
                    },
                );
                info!(
                    room = %room_name,
                    playback_position = event.position.as_secs_f64(),
                    interrupted = event.interrupted,
                    "playback_finished"
                );

                let _ = task_tx.send(event);
            }
            debug!(room = %room_name, "playback notification stream ended");
        });

        Self { history, tx, task }
    }

    /// Events correlated after this call, in completion order.
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackFinishedEvent> {
        self.tx.subscribe()
    }

    /// Every event correlated so far.
    pub fn history(&self) -> Vec<PlaybackFinishedEvent> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_stopped(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PlaybackCorrelator {
    fn drop(&mut self) {
        self.task.abort();
    }
}
