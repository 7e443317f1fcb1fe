//! LiveKit webhook intake.
//!
//! LiveKit signs each webhook with the API secret. The `Authorization`
//! header carries a JWT whose `sha256` claim is the base64 SHA-256 digest of
//! the raw request body; both the signature and the digest must match.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use marionette_avatar::LiveKitConfig;
use marionette_types::ParticipantKind;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing authorization header")]
    MissingAuthorization,

    #[error("invalid webhook token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("body digest does not match the signed digest")]
    DigestMismatch,

    #[error("malformed webhook body: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct WebhookClaims {
    sha256: String,
}

/// Checks the webhook signature and body digest.
///
/// # Errors
///
/// Returns `WebhookError` if the header is absent, the token was not signed
/// by the configured key, or the digest does not match `body`.
pub fn verify(
    authorization: Option<&str>,
    body: &[u8],
    livekit: &LiveKitConfig,
) -> Result<(), WebhookError> {
    let header = authorization
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or(WebhookError::MissingAuthorization)?;
    let token = header.strip_prefix("Bearer ").unwrap_or(header);

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[livekit.api_key.as_str()]);
    let claims = jsonwebtoken::decode::<WebhookClaims>(
        token,
        &DecodingKey::from_secret(livekit.api_secret.as_bytes()),
        &validation,
    )?
    .claims;

    let digest = STANDARD.encode(Sha256::digest(body));
    if digest != claims.sha256 {
        return Err(WebhookError::DigestMismatch);
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct WebhookRoom {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct WebhookParticipant {
    pub identity: String,
    /// `"AGENT"`, `"STANDARD"`, ... or the numeric enum value.
    #[serde(default)]
    pub kind: Option<Value>,
}

impl WebhookParticipant {
    /// Participant kind, defaulting to human when absent or unknown.
    pub fn participant_kind(&self) -> ParticipantKind {
        match &self.kind {
            Some(Value::String(s)) => s.parse().unwrap_or(ParticipantKind::Human),
            Some(Value::Number(n)) => match n.as_u64() {
                Some(1) => ParticipantKind::Ingress,
                Some(2) => ParticipantKind::Egress,
                Some(3) => ParticipantKind::Sip,
                Some(4) => ParticipantKind::Agent,
                _ => ParticipantKind::Human,
            },
            _ => ParticipantKind::Human,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    pub room: Option<WebhookRoom>,
    #[serde(default)]
    pub participant: Option<WebhookParticipant>,
}

impl WebhookEvent {
    /// # Errors
    ///
    /// Returns `WebhookError::Malformed` if `body` is not a webhook event.
    pub fn parse(body: &[u8]) -> Result<Self, WebhookError> {
        Ok(serde_json::from_slice(body)?)
    }
}
