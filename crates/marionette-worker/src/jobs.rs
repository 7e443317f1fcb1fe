//! Hand-off jobs and the rooms they run in.
//!
//! One job runs per room. A job owns its agent session, runs the hand-off,
//! then supervises the avatar until the job is cancelled or the avatar is
//! lost under the end-session policy. Room membership is fed from LiveKit
//! webhooks into a [`LocalRoom`] per room name.

use chrono::{DateTime, Utc};
use marionette_avatar::{
    AgentSession, HandoffCoordinator, HandoffTracker, LocalRoom, RoomTransport, TransportError,
};
use marionette_types::{
    AudioFrame, AvatarStreamMessage, HandoffState, MembershipEvent, ParticipantRef,
    PlaybackFinishedEvent, PlaybackNotice,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Identity the worker uses for rooms it only observes.
pub const WORKER_IDENTITY: &str = "marionette-worker";

#[derive(Debug, Error)]
pub enum JobError {
    #[error("a hand-off job is already active in room '{0}'")]
    AlreadyActive(String),

    #[error("room name and agent identity must not be empty")]
    InvalidRequest,

    #[error("unknown room '{0}'")]
    UnknownRoom(String),

    #[error("participant '{0}' is not in the room")]
    NotInRoom(String),
}

/// A room as seen by one agent: shared membership, the agent's own identity.
struct AgentRoom {
    room: Arc<LocalRoom>,
    agent_identity: String,
}

impl RoomTransport for AgentRoom {
    fn room_name(&self) -> &str {
        self.room.room_name()
    }

    fn server_url(&self) -> &str {
        self.room.server_url()
    }

    fn local_identity(&self) -> &str {
        &self.agent_identity
    }

    fn participants(&self) -> Vec<ParticipantRef> {
        self.room.participants()
    }

    fn subscribe_membership(&self) -> broadcast::Receiver<MembershipEvent> {
        self.room.subscribe_membership()
    }

    fn publish_audio(&self, frame: &AudioFrame) -> Result<(), TransportError> {
        self.room.publish_audio(frame)
    }

    fn send_to(
        &self,
        destination: &str,
        message: AvatarStreamMessage,
    ) -> Result<(), TransportError> {
        self.room.send_to(destination, message)
    }

    fn subscribe_playback(&self) -> mpsc::UnboundedReceiver<PlaybackNotice> {
        self.room.subscribe_playback()
    }
}

struct Job {
    job_id: String,
    agent_identity: String,
    started_at: DateTime<Utc>,
    tracker: HandoffTracker,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Public view of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub room_name: String,
    pub agent_identity: String,
    pub state: HandoffState,
    pub started_at: DateTime<Utc>,
}

/// Rooms and hand-off jobs, keyed by room name.
///
/// Uses `std::sync::Mutex`: every acquisition is a short map operation that
/// never spans an `.await`. When both are held, `jobs` is locked first.
///
/// A room with no participants and no live job is dropped when its last
/// participant leaves. A terminated job stays visible until the next job
/// starts, unless its room is still known.
pub struct JobRegistry {
    coordinator: Arc<HandoffCoordinator>,
    server_url: String,
    rooms: Mutex<HashMap<String, Arc<LocalRoom>>>,
    jobs: Mutex<HashMap<String, Job>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl JobRegistry {
    pub fn new(coordinator: Arc<HandoffCoordinator>, server_url: impl Into<String>) -> Self {
        Self {
            coordinator,
            server_url: server_url.into(),
            rooms: Mutex::new(HashMap::new()),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the room with `name`, creating it if needed.
    pub fn room(&self, name: &str) -> Arc<LocalRoom> {
        lock(&self.rooms)
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(LocalRoom::new(name, self.server_url.as_str(), WORKER_IDENTITY))
            })
            .clone()
    }

    /// Starts a hand-off job for `agent_identity` in `room_name`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `JobError::AlreadyActive` if a job in that room has not yet
    /// terminated.
    pub fn start(&self, room_name: &str, agent_identity: &str) -> Result<JobSnapshot, JobError> {
        if room_name.trim().is_empty() || agent_identity.trim().is_empty() {
            return Err(JobError::InvalidRequest);
        }

        let mut jobs = lock(&self.jobs);
        if let Some(existing) = jobs.get(room_name) {
            if !existing.tracker.state().is_terminal() {
                return Err(JobError::AlreadyActive(room_name.to_string()));
            }
        }
        {
            let rooms = lock(&self.rooms);
            jobs.retain(|name, job| {
                !job.tracker.state().is_terminal() || rooms.contains_key(name)
            });
        }

        let transport: Arc<dyn RoomTransport> = Arc::new(AgentRoom {
            room: self.room(room_name),
            agent_identity: agent_identity.to_string(),
        });
        let tracker = HandoffTracker::new();
        let cancel = CancellationToken::new();
        let job_id = uuid::Uuid::new_v4().to_string();

        let task = tokio::spawn(run_job(
            self.coordinator.clone(),
            transport,
            tracker.clone(),
            cancel.clone(),
            job_id.clone(),
        ));

        let job = Job {
            job_id,
            agent_identity: agent_identity.to_string(),
            started_at: Utc::now(),
            tracker,
            cancel,
            task,
        };
        let snapshot = snapshot(room_name, &job);
        jobs.insert(room_name.to_string(), job);
        info!(room = room_name, agent = agent_identity, job_id = %snapshot.job_id, "hand-off job started");
        Ok(snapshot)
    }

    pub fn get(&self, room_name: &str) -> Option<JobSnapshot> {
        lock(&self.jobs)
            .get(room_name)
            .map(|job| snapshot(room_name, job))
    }

    pub fn list(&self) -> Vec<JobSnapshot> {
        let mut all: Vec<JobSnapshot> = lock(&self.jobs)
            .iter()
            .map(|(room, job)| snapshot(room, job))
            .collect();
        all.sort_by(|a, b| a.room_name.cmp(&b.room_name));
        all
    }

    /// Ends the job in `room_name`. Returns `false` if there is none.
    pub fn cancel(&self, room_name: &str) -> bool {
        match lock(&self.jobs).get(room_name) {
            Some(job) => {
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn participant_joined(&self, room_name: &str, participant: ParticipantRef) {
        self.room(room_name).join(participant);
    }

    pub fn participant_left(&self, room_name: &str, identity: &str) {
        let jobs = lock(&self.jobs);
        let mut rooms = lock(&self.rooms);
        let Some(room) = rooms.get(room_name).cloned() else {
            return;
        };
        room.leave(identity);

        let idle = jobs
            .get(room_name)
            .map_or(true, |job| job.tracker.state().is_terminal());
        if idle && room.participants().is_empty() {
            rooms.remove(room_name);
            debug!(room = room_name, "dropped idle room");
        }
    }

    /// Delivers a playback report from `sender` to the job running in
    /// `room_name`.
    ///
    /// # Errors
    ///
    /// Returns `JobError::UnknownRoom` if no such room is known, or
    /// `JobError::NotInRoom` if `sender` has not joined it.
    pub fn playback_finished(
        &self,
        room_name: &str,
        sender: &str,
        event: PlaybackFinishedEvent,
    ) -> Result<(), JobError> {
        let room = lock(&self.rooms)
            .get(room_name)
            .cloned()
            .ok_or_else(|| JobError::UnknownRoom(room_name.to_string()))?;
        room.notify_playback_finished(sender, event)
            .map_err(|_| JobError::NotInRoom(sender.to_string()))
    }

    /// The room ended: the job ends normally, then the room is closed.
    pub fn room_finished(&self, room_name: &str) {
        self.cancel(room_name);
        if let Some(room) = lock(&self.rooms).remove(room_name) {
            room.close();
        }
    }

    /// Cancels every job and waits up to `grace` for each to wind down.
    pub async fn shutdown(&self, grace: Duration) {
        let jobs: Vec<(String, Job)> = lock(&self.jobs).drain().collect();
        for (_, job) in &jobs {
            job.cancel.cancel();
        }
        for (room, job) in jobs {
            if tokio::time::timeout(grace, job.task).await.is_err() {
                warn!(room = %room, "hand-off job did not stop within the grace period");
            }
        }
    }
}

fn snapshot(room_name: &str, job: &Job) -> JobSnapshot {
    JobSnapshot {
        job_id: job.job_id.clone(),
        room_name: room_name.to_string(),
        agent_identity: job.agent_identity.clone(),
        state: job.tracker.state(),
        started_at: job.started_at,
    }
}

async fn run_job(
    coordinator: Arc<HandoffCoordinator>,
    room: Arc<dyn RoomTransport>,
    tracker: HandoffTracker,
    cancel: CancellationToken,
    job_id: String,
) {
    // Audio production is driven by the speech pipeline through this session.
    let mut session = AgentSession::new(room);

    let link = match coordinator.establish(&mut session, &tracker, &cancel).await {
        Ok(link) => link,
        Err(_) => return,
    };

    if let Err(e) = link.supervise(&cancel).await {
        warn!(job_id = %job_id, "hand-off job ended with error: {}", e);
    }
    info!(job_id = %job_id, state = %tracker.state(), "hand-off job finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use marionette_types::ParticipantKind;

    fn registry() -> Arc<JobRegistry> {
        let config: Config = toml::from_str(
            r#"
[livekit]
url = "ws://localhost:7880"
api_key = "devkey"
api_secret = "secret"

[avatar]
dispatcher_url = "http://127.0.0.1:9/launch"
on_disconnect = "end_session"
"#,
        )
        .unwrap();
        crate::AppState::from_config(&config).unwrap().jobs
    }

    async fn wait_until_terminated(jobs: &JobRegistry, room: &str) {
        for _ in 0..250 {
            if jobs.get(room).is_some_and(|job| job.state.is_terminal()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job in '{}' never terminated", room);
    }

    #[test]
    fn idle_room_is_dropped_when_last_participant_leaves() {
        let jobs = registry();
        jobs.participant_joined("lobby", ParticipantRef::new("alice", ParticipantKind::Human));
        jobs.participant_joined("lobby", ParticipantRef::new("bob", ParticipantKind::Human));

        jobs.participant_left("lobby", "alice");
        assert!(lock(&jobs.rooms).contains_key("lobby"));

        jobs.participant_left("lobby", "bob");
        assert!(!lock(&jobs.rooms).contains_key("lobby"));
    }

    #[tokio::test]
    async fn finished_room_job_is_pruned_by_the_next_start() {
        let jobs = registry();
        jobs.start("demo", "agent-1").unwrap();
        wait_until_terminated(&jobs, "demo").await;

        jobs.room_finished("demo");
        assert!(jobs.get("demo").is_some());

        jobs.start("other", "agent-1").unwrap();
        assert!(jobs.get("demo").is_none());
        assert!(jobs.get("other").is_some());
    }

    #[tokio::test]
    async fn playback_for_unknown_room_or_sender_is_refused() {
        let jobs = registry();
        let event = PlaybackFinishedEvent::new(Duration::from_millis(500), false);

        assert!(matches!(
            jobs.playback_finished("nowhere", "avatar_worker", event),
            Err(JobError::UnknownRoom(_))
        ));

        jobs.participant_joined("demo", ParticipantRef::new("alice", ParticipantKind::Human));
        assert!(matches!(
            jobs.playback_finished("demo", "avatar_worker", event),
            Err(JobError::NotInRoom(_))
        ));
    }
}
