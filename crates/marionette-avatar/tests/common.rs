#![allow(dead_code)]

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use marionette_avatar::{
    HandoffConfig, HandoffCoordinator, HandshakeClient, LiveKitConfig, LocalRoom,
    RouterFailurePolicy, TokenIssuer,
};
use marionette_observe::EventSink;
use marionette_types::{ParticipantKind, ParticipantRef};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

pub const AGENT_IDENTITY: &str = "agent-1";
pub const AVATAR_IDENTITY: &str = "avatar_worker";

pub fn livekit() -> LiveKitConfig {
    LiveKitConfig::new("ws://localhost:7880", "devkey", "secret")
}

pub fn room(name: &str) -> Arc<LocalRoom> {
    Arc::new(LocalRoom::new(name, "ws://localhost:7880", AGENT_IDENTITY))
}

#[derive(Clone)]
struct DispatcherState {
    status: StatusCode,
    delay: Duration,
    received: Arc<Mutex<Vec<Value>>>,
    launch_into: Option<Arc<LocalRoom>>,
}

/// A dispatcher stub bound on an ephemeral port.
pub struct MockDispatcher {
    pub url: String,
    pub received: Arc<Mutex<Vec<Value>>>,
}

impl MockDispatcher {
    pub fn requests(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }
}

async fn launch(State(state): State<DispatcherState>, Json(body): Json<Value>) -> StatusCode {
    state.received.lock().unwrap().push(body);
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    if state.status.is_success() {
        if let Some(room) = state.launch_into.clone() {
            // The avatar worker shows up a little after the dispatcher answers.
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                room.join(ParticipantRef::new(AVATAR_IDENTITY, ParticipantKind::Agent));
            });
        }
    }
    state.status
}

/// Starts a dispatcher that answers `status` after `delay`. When
/// `launch_into` is set, a successful launch joins the avatar to that room.
pub async fn spawn_dispatcher(
    status: StatusCode,
    delay: Duration,
    launch_into: Option<Arc<LocalRoom>>,
) -> MockDispatcher {
    let received = Arc::new(Mutex::new(Vec::new()));
    let state = DispatcherState {
        status,
        delay,
        received: received.clone(),
        launch_into,
    };
    let app = Router::new().route("/launch", post(launch)).with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockDispatcher {
        url: format!("http://{}/launch", addr),
        received,
    }
}

/// A URL nothing is listening on.
pub fn refused_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/launch", addr)
}

pub fn handoff_config(dispatcher_url: &str, policy: RouterFailurePolicy) -> HandoffConfig {
    HandoffConfig {
        dispatcher_url: dispatcher_url.to_string(),
        avatar_identity: AVATAR_IDENTITY.to_string(),
        avatar_display_name: "Avatar Runner".to_string(),
        token_ttl: Duration::from_secs(60),
        handshake_timeout: Duration::from_secs(2),
        rendezvous_timeout: Duration::from_secs(2),
        on_disconnect: policy,
    }
}

pub fn coordinator(config: HandoffConfig, events: Arc<dyn EventSink>) -> HandoffCoordinator {
    let issuer = TokenIssuer::new(&livekit(), Arc::new(marionette_avatar::SystemClock))
        .unwrap()
        .with_display_name(config.avatar_display_name.clone());
    HandoffCoordinator::new(config, issuer, HandshakeClient::new().unwrap(), events)
}
