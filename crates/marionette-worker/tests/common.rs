#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use marionette_worker::config::Config;
use marionette_worker::{app, AppState};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tower::ServiceExt;

pub const API_KEY: &str = "devkey";
pub const API_SECRET: &str = "secret";

pub fn config(dispatcher_url: &str, on_disconnect: &str) -> Config {
    toml::from_str(&format!(
        r#"
[livekit]
url = "ws://localhost:7880"
api_key = "{API_KEY}"
api_secret = "{API_SECRET}"

[avatar]
dispatcher_url = "{dispatcher_url}"
rendezvous_timeout_ms = 3000
on_disconnect = "{on_disconnect}"
"#
    ))
    .unwrap()
}

pub fn state(dispatcher_url: &str) -> Arc<AppState> {
    Arc::new(AppState::from_config(&config(dispatcher_url, "end_session")).unwrap())
}

/// A dispatcher that accepts every launch and records nothing.
pub async fn spawn_dispatcher(status: StatusCode) -> String {
    let app = Router::new().route("/launch", post(move || async move { status }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/launch", addr)
}

/// A dispatcher that accepts every launch and keeps each request body.
pub async fn spawn_recording_dispatcher() -> (String, Arc<Mutex<Vec<Value>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let app = Router::new().route(
        "/launch",
        post(move |Json(body): Json<Value>| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(body);
                StatusCode::OK
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/launch", addr), received)
}

pub fn sign_webhook(body: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = json!({
        "iss": API_KEY,
        "nbf": now,
        "exp": now + 300,
        "sha256": STANDARD.encode(Sha256::digest(body.as_bytes())),
    });
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(API_SECRET.as_bytes()),
    )
    .unwrap()
}

pub fn participant_event(event: &str, room: &str, identity: &str, kind: &str) -> String {
    json!({
        "event": event,
        "room": { "name": room },
        "participant": { "identity": identity, "kind": kind },
    })
    .to_string()
}

pub async fn send(state: &Arc<AppState>, request: Request<Body>) -> (StatusCode, Value) {
    let response = app(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn webhook(body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhook/livekit")
        .header("content-type", "application/webhook+json")
        .header("authorization", sign_webhook(&body))
        .body(Body::from(body))
        .unwrap()
}

pub fn playback_report(room: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/api/rooms/{}/playback", room))
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", token))
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Polls the job in `room` until it reports `state`.
pub async fn wait_for_state(state: &Arc<AppState>, room: &str, expected: &str) -> Value {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        let (status, job) = send(state, get(&format!("/api/jobs/{}", room))).await;
        if status == StatusCode::OK && job["state"] == expected {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job in '{}' never reached {} (last: {})",
            room,
            expected,
            job
        );
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}
