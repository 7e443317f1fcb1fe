//! HTTP handlers for the worker control surface.

use crate::jobs::{JobError, JobSnapshot};
use crate::webhook::{self, WebhookEvent};
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Extension, Path, Query},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    Json,
};
use chrono::{DateTime, Utc};
use futures_util::Stream;
use marionette_avatar::{verify_avatar_token, SystemClock};
use marionette_observe::{EventDomain, EventFilter, ObservedEvent};
use marionette_types::{ParticipantRef, PlaybackFinishedEvent};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use thiserror::Error;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<JobError> for ApiError {
    fn from(e: JobError) -> Self {
        match e {
            JobError::AlreadyActive(_) => ApiError::Conflict(e.to_string()),
            JobError::InvalidRequest => ApiError::BadRequest(e.to_string()),
            JobError::UnknownRoom(_) => ApiError::NotFound(e.to_string()),
            JobError::NotInRoom(_) => ApiError::Conflict(e.to_string()),
        }
    }
}

/// Request body for `POST /api/jobs`.
#[derive(Debug, Deserialize)]
pub struct StartJobRequest {
    pub room_name: String,
    pub agent_identity: String,
}

/// Handler for `POST /api/jobs`.
pub async fn start_job_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<StartJobRequest>,
) -> Result<(StatusCode, Json<JobSnapshot>), ApiError> {
    let snapshot = state
        .jobs
        .start(&payload.room_name, &payload.agent_identity)?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

/// Handler for `GET /api/jobs`.
pub async fn list_jobs_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<Vec<JobSnapshot>> {
    Json(state.jobs.list())
}

/// Handler for `GET /api/jobs/{room}`.
pub async fn get_job_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(room): Path<String>,
) -> Result<Json<JobSnapshot>, ApiError> {
    state
        .jobs
        .get(&room)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no hand-off job for room '{}'", room)))
}

/// Handler for `DELETE /api/jobs/{room}`.
pub async fn cancel_job_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(room): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.jobs.cancel(&room) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!(
            "no hand-off job for room '{}'",
            room
        )))
    }
}

/// Handler for `POST /webhook/livekit`.
///
/// Applies participant and room lifecycle events to the matching room.
/// Other event types are acknowledged and ignored.
pub async fn livekit_webhook_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    webhook::verify(authorization, &body, &state.livekit).map_err(|e| {
        tracing::warn!("rejected LiveKit webhook: {}", e);
        ApiError::Unauthorized(e.to_string())
    })?;

    let event = WebhookEvent::parse(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let Some(room) = event.room else {
        tracing::debug!(event = %event.event, "webhook without room, ignoring");
        return Ok(StatusCode::OK);
    };

    match (event.event.as_str(), event.participant) {
        ("participant_joined", Some(participant)) => {
            let kind = participant.participant_kind();
            state.jobs.participant_joined(
                &room.name,
                ParticipantRef::new(participant.identity, kind),
            );
        }
        ("participant_left", Some(participant)) => {
            state.jobs.participant_left(&room.name, &participant.identity);
        }
        ("room_finished", _) => state.jobs.room_finished(&room.name),
        (other, _) => {
            tracing::debug!(event = other, room = %room.name, "unhandled webhook event");
        }
    }

    Ok(StatusCode::OK)
}

/// Handler for `POST /api/rooms/{room}/playback`.
///
/// The avatar worker reports a finished segment, authenticating with the
/// credential it was issued for this room. The sender is the credential's
/// identity.
pub async fn playback_finished_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(room): Path<String>,
    headers: HeaderMap,
    Json(event): Json<PlaybackFinishedEvent>,
) -> Result<StatusCode, ApiError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("missing bearer credential".to_string()))?;
    let claims = verify_avatar_token(token, &state.livekit, &SystemClock).map_err(|e| {
        tracing::warn!(room = %room, "rejected playback report: {}", e);
        ApiError::Unauthorized(e.to_string())
    })?;
    if !claims.video.room_join || claims.video.room != room {
        return Err(ApiError::Unauthorized(format!(
            "credential does not grant room '{}'",
            room
        )));
    }

    state.jobs.playback_finished(&room, &claims.sub, event)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Query parameters for `GET /api/events`.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Filter by event domain (`HANDOFF`, `ROUTING`, `PLAYBACK`).
    pub domain: Option<String>,
    pub event_type: Option<String>,
    /// Filter by room name.
    pub entity_id: Option<String>,
    /// Return events that occurred at or after this RFC 3339 timestamp.
    pub since: Option<String>,
    /// Maximum number of events to return (default: 100, max: 1000).
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub events: Vec<ObservedEvent>,
    pub count: usize,
}

/// Handler for `GET /api/events`.
pub async fn get_events_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, ApiError> {
    let domain = params
        .domain
        .as_deref()
        .map(str::parse::<EventDomain>)
        .transpose()
        .map_err(|e| {
            ApiError::BadRequest(format!(
                "{}. Expected one of: HANDOFF, ROUTING, PLAYBACK",
                e
            ))
        })?;
    let since = params
        .since
        .as_deref()
        .map(DateTime::parse_from_rfc3339)
        .transpose()
        .map_err(|e| ApiError::BadRequest(format!("invalid since timestamp: {}", e)))?
        .map(|t| t.with_timezone(&Utc));

    let filter = EventFilter {
        domain,
        event_type: params.event_type,
        entity_id: params.entity_id,
        since,
        limit: Some(params.limit.unwrap_or(100).clamp(1, 1000)),
    };

    let events = state
        .events
        .query_events(&filter)
        .map_err(|e| ApiError::InternalServerError(e.to_string()))?;
    let count = events.len();
    Ok(Json(EventsResponse { events, count }))
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub domain: Option<String>,
}

/// Handler for `GET /events/stream`.
///
/// Streams observe events as they are recorded, optionally filtered by domain.
pub async fn event_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let domain_filter: Option<EventDomain> = params.domain.as_deref().and_then(|d| d.parse().ok());
    let stream = BroadcastStream::new(state.events.subscribe());

    let mapped = stream.filter_map(move |result| match result {
        Ok(event) => {
            if domain_filter.is_some_and(|d| d != event.domain) {
                return None;
            }
            match serde_json::to_string(&event) {
                Ok(data) => Some(Ok(Event::default().event(event.event_type).data(data))),
                Err(e) => {
                    tracing::error!("failed to serialize observe event: {}", e);
                    None
                }
            }
        }
        Err(lagged) => {
            tracing::warn!(error = %lagged, "event stream subscriber lagged; events dropped");
            None
        }
    });

    Sse::new(mapped).keep_alive(KeepAlive::default())
}
