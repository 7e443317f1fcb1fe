//! Marionette worker library logic.

pub mod api;
pub mod cli;
pub mod config;
pub mod jobs;
pub mod webhook;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use config::{Config, ConfigError};
use jobs::JobRegistry;
use marionette_avatar::{HandoffCoordinator, HandshakeClient, LiveKitConfig, SystemClock, TokenIssuer};
use marionette_observe::EventLog;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Maximum request body size (256 KiB). Webhooks and job requests are small.
const MAX_REQUEST_BODY_BYTES: usize = 256 * 1024;

/// Application state shared across all request handlers.
pub struct AppState {
    /// Active hand-off jobs and their rooms.
    pub jobs: Arc<JobRegistry>,
    /// Observe event log shared with every hand-off component.
    pub events: Arc<EventLog>,
    /// Used to verify webhook signatures.
    pub livekit: LiveKitConfig,
}

impl AppState {
    /// Builds the worker state from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the hand-off settings or signing
    /// material are unusable.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let handoff = config.handoff_config()?;
        let events = Arc::new(EventLog::new());

        let issuer = TokenIssuer::new(&config.livekit, Arc::new(SystemClock))
            .map_err(|e| ConfigError::Invalid(e.to_string()))?
            .with_display_name(handoff.avatar_display_name.clone());
        let handshake = HandshakeClient::new().map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let coordinator = Arc::new(HandoffCoordinator::new(
            handoff,
            issuer,
            handshake,
            events.clone(),
        ));

        Ok(Self {
            jobs: Arc::new(JobRegistry::new(coordinator, config.livekit.url.clone())),
            events,
            livekit: config.livekit.clone(),
        })
    }
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/jobs",
            post(api::start_job_handler).get(api::list_jobs_handler),
        )
        .route(
            "/api/jobs/{room}",
            get(api::get_job_handler).delete(api::cancel_job_handler),
        )
        .route(
            "/api/rooms/{room}/playback",
            post(api::playback_finished_handler),
        )
        .route("/webhook/livekit", post(api::livekit_webhook_handler))
        .route("/api/events", get(api::get_events_handler))
        .route("/events/stream", get(api::event_stream_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(state))
}
