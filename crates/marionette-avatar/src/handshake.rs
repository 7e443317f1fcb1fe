//! Delivers connection info to the avatar dispatcher.

use crate::error::HandoffError;
use marionette_types::ConnectionInfo;
use std::time::Duration;
use tracing::info;

/// Longest dispatcher error body quoted in an error message.
const MAX_ERROR_BODY_CHARS: usize = 256;

/// HTTP client for the one-shot dispatcher handshake.
#[derive(Debug, Clone)]
pub struct HandshakeClient {
    http: reqwest::Client,
}

impl HandshakeClient {
    /// Builds a client that never follows redirects, so each announcement
    /// is exactly one request.
    ///
    /// # Errors
    ///
    /// Returns `HandoffError::Config` if the TLS backend cannot be initialised.
    pub fn new() -> Result<Self, HandoffError> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("marionette/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HandoffError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    /// POSTs `info` as JSON to `dispatcher_url`, bounded by `timeout`.
    ///
    /// No retry is attempted. Dropping the returned future aborts the
    /// request.
    ///
    /// # Errors
    ///
    /// Returns `HandoffError::Handshake` on any transport failure, timeout,
    /// or non-2xx response.
    pub async fn announce(
        &self,
        dispatcher_url: &str,
        info: &ConnectionInfo,
        timeout: Duration,
    ) -> Result<(), HandoffError> {
        info!(
            dispatcher_url,
            room = %info.room_name,
            "sending connection info to avatar dispatcher"
        );

        let response = self
            .http
            .post(dispatcher_url)
            .timeout(timeout)
            .json(info)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HandoffError::Handshake(format!(
                        "dispatcher did not respond within {:?}",
                        timeout
                    ))
                } else {
                    HandoffError::Handshake(format!("dispatcher request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            return Err(HandoffError::Handshake(format!(
                "dispatcher returned {}: {}",
                status,
                body.trim()
            )));
        }

        info!("avatar handshake completed");
        Ok(())
    }
}
