mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use marionette_avatar::RoomTransport;
use common::{
    delete, get, participant_event, playback_report, post_json, send, spawn_dispatcher,
    spawn_recording_dispatcher, state, wait_for_state, webhook,
};
use serde_json::json;

#[tokio::test]
async fn health_check_returns_ok() {
    let state = state("http://127.0.0.1:9/launch");
    let (status, body) = send(&state, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn job_runs_until_cancelled() {
    let dispatcher = spawn_dispatcher(StatusCode::OK).await;
    let state = state(&dispatcher);

    let (status, job) = send(
        &state,
        post_json(
            "/api/jobs",
            json!({ "room_name": "demo", "agent_identity": "agent-1" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(job["room_name"], "demo");
    assert_eq!(job["agent_identity"], "agent-1");

    // A second job for the same room is refused while the first is live.
    let (status, _) = send(
        &state,
        post_json(
            "/api/jobs",
            json!({ "room_name": "demo", "agent_identity": "agent-2" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // The avatar worker joins, as reported by LiveKit.
    let (status, _) = send(
        &state,
        webhook(participant_event(
            "participant_joined",
            "demo",
            "avatar_worker",
            "AGENT",
        )),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    wait_for_state(&state, "demo", "RUNNING").await;

    let (status, _) = send(&state, delete("/api/jobs/demo")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    wait_for_state(&state, "demo", "TERMINATED").await;

    let (status, body) = send(&state, get("/api/events?entity_id=demo&limit=50")).await;
    assert_eq!(status, StatusCode::OK);
    let types: Vec<&str> = body["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["event_type"].as_str().unwrap())
        .collect();
    assert_eq!(
        types,
        vec![
            "TOKEN_ISSUED",
            "HANDSHAKE_SENT",
            "AVATAR_JOINED",
            "AUDIO_ROUTED",
            "JOB_TERMINATED"
        ]
    );
}

#[tokio::test]
async fn failed_handshake_terminates_job() {
    let dispatcher = spawn_dispatcher(StatusCode::INTERNAL_SERVER_ERROR).await;
    let state = state(&dispatcher);

    let (status, _) = send(
        &state,
        post_json(
            "/api/jobs",
            json!({ "room_name": "lobby", "agent_identity": "agent-1" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    wait_for_state(&state, "lobby", "TERMINATED").await;

    let (_, body) = send(&state, get("/api/events?domain=HANDOFF&event_type=AVATAR_JOINED")).await;
    assert_eq!(body["count"], 0);

    // A terminated job no longer blocks the room.
    let (status, _) = send(
        &state,
        post_json(
            "/api/jobs",
            json!({ "room_name": "lobby", "agent_identity": "agent-1" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn room_finished_ends_the_job() {
    let dispatcher = spawn_dispatcher(StatusCode::OK).await;
    let state = state(&dispatcher);

    send(
        &state,
        webhook(participant_event(
            "participant_joined",
            "demo",
            "avatar_worker",
            "AGENT",
        )),
    )
    .await;
    send(
        &state,
        post_json(
            "/api/jobs",
            json!({ "room_name": "demo", "agent_identity": "agent-1" }),
        ),
    )
    .await;
    wait_for_state(&state, "demo", "RUNNING").await;

    let body = json!({ "event": "room_finished", "room": { "name": "demo" } }).to_string();
    let (status, _) = send(&state, webhook(body)).await;
    assert_eq!(status, StatusCode::OK);
    wait_for_state(&state, "demo", "TERMINATED").await;

    let (_, events) = send(&state, get("/api/events?event_type=JOB_TERMINATED")).await;
    assert_eq!(events["events"][0]["payload"]["reason"], "session_ended");
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let state = state("http://127.0.0.1:9/launch");

    let (status, body) = send(&state, get("/api/jobs/nowhere")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("nowhere"));

    let (status, _) = send(&state, delete("/api/jobs/nowhere")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn empty_agent_identity_is_rejected() {
    let state = state("http://127.0.0.1:9/launch");
    let (status, _) = send(
        &state,
        post_json(
            "/api/jobs",
            json!({ "room_name": "demo", "agent_identity": "" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unsigned_webhook_is_rejected() {
    let state = state("http://127.0.0.1:9/launch");
    let body = participant_event("participant_joined", "demo", "avatar_worker", "AGENT");
    let request = Request::builder()
        .method("POST")
        .uri("/webhook/livekit")
        .body(Body::from(body))
        .unwrap();

    let (status, _) = send(&state, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(state.jobs.room("demo").participants().is_empty());
}

#[tokio::test]
async fn invalid_event_domain_is_a_bad_request() {
    let state = state("http://127.0.0.1:9/launch");
    let (status, body) = send(&state, get("/api/events?domain=BOGUS")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("HANDOFF"));
}

#[tokio::test]
async fn avatar_playback_report_is_recorded() {
    let (dispatcher, launches) = spawn_recording_dispatcher().await;
    let state = state(&dispatcher);

    send(
        &state,
        post_json(
            "/api/jobs",
            json!({ "room_name": "demo", "agent_identity": "agent-1" }),
        ),
    )
    .await;
    send(
        &state,
        webhook(participant_event(
            "participant_joined",
            "demo",
            "avatar_worker",
            "AGENT",
        )),
    )
    .await;
    wait_for_state(&state, "demo", "RUNNING").await;

    let token = launches.lock().unwrap()[0]["token"]
        .as_str()
        .unwrap()
        .to_string();
    let report = json!({ "playback_position": 3.2, "interrupted": true });

    let (status, _) = send(&state, playback_report("demo", &token, report.clone())).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // The credential only grants the room it was issued for.
    let (status, _) = send(&state, playback_report("lobby", &token, report.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&state, playback_report("demo", "not-a-token", report)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    let events = loop {
        let (_, body) = send(&state, get("/api/events?event_type=PLAYBACK_FINISHED")).await;
        if body["count"] == 1 {
            break body;
        }
        assert!(tokio::time::Instant::now() < deadline, "no playback event recorded");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    };
    let payload = &events["events"][0]["payload"];
    assert_eq!(payload["playback_position"], 3.2);
    assert_eq!(payload["interrupted"], true);
    assert_eq!(events["events"][0]["entity_id"], "demo");
}
