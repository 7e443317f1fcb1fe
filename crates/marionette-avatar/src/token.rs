//! Scoped join credentials for the avatar worker.
//!
//! A credential is an HS256 JWT in the LiveKit access-token format. It
//! grants exactly one room, marks the holder as an agent, and names the
//! issuing agent in the `lk.publish_on_behalf` attribute so consumers can
//! attribute the avatar's speech to it.

use crate::config::LiveKitConfig;
use crate::error::HandoffError;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use livekit_api::access_token::VideoGrants;
use marionette_types::ATTRIBUTE_PUBLISH_ON_BEHALF;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Participant kind claim for avatar workers.
pub const AVATAR_PARTICIPANT_KIND: &str = "agent";

/// Source of the current time, in unix seconds.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_unix(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_unix(&self) -> i64 {
        self.0
    }
}

/// Claims carried by an avatar credential.
///
/// Field names mirror `livekit_api::access_token::Claims` so the token is
/// accepted by a LiveKit server. Signing goes through `jsonwebtoken` so the
/// issue time comes from the injected [`Clock`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvatarClaims {
    /// API key that signed the token.
    pub iss: String,
    /// Avatar identity.
    pub sub: String,
    pub nbf: i64,
    pub exp: i64,
    /// Display name.
    pub name: String,
    pub video: VideoGrants,
    pub kind: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl AvatarClaims {
    /// The agent this avatar publishes on behalf of.
    pub fn publish_on_behalf(&self) -> Option<&str> {
        self.attributes
            .get(ATTRIBUTE_PUBLISH_ON_BEHALF)
            .map(String::as_str)
    }
}

/// An issued, signed credential. Single use; never logged.
#[derive(Clone)]
pub struct Credential {
    token: String,
    expires_at: i64,
}

impl Credential {
    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    pub fn as_str(&self) -> &str {
        &self.token
    }

    pub fn into_token(self) -> String {
        self.token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Errors from verifying a credential.
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("invalid credential: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),

    #[error("credential expired at {0}")]
    Expired(i64),

    #[error("credential not valid before {0}")]
    NotYetValid(i64),
}

/// Builds signed avatar credentials from an injected key and clock.
#[derive(Clone)]
pub struct TokenIssuer {
    api_key: String,
    api_secret: String,
    display_name: String,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .field("display_name", &self.display_name)
            .field("clock", &self.clock)
            .finish()
    }
}

impl TokenIssuer {
    /// # Errors
    ///
    /// Returns `HandoffError::Config` if the API key or secret is missing.
    pub fn new(config: &LiveKitConfig, clock: Arc<dyn Clock>) -> Result<Self, HandoffError> {
        if !config.has_signing_material() {
            return Err(HandoffError::Config(
                "LiveKit API key and secret are required to sign avatar tokens".to_string(),
            ));
        }

        Ok(Self {
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            display_name: "Avatar Runner".to_string(),
            clock,
        })
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Issues a credential that lets `avatar_identity` join `room_name` on
    /// behalf of `agent_identity` for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns `HandoffError::Config` for empty identities or room name, a
    /// zero TTL, or a signing failure.
    pub fn issue_avatar_token(
        &self,
        room_name: &str,
        agent_identity: &str,
        avatar_identity: &str,
        ttl: Duration,
    ) -> Result<Credential, HandoffError> {
        if room_name.is_empty() || agent_identity.is_empty() || avatar_identity.is_empty() {
            return Err(HandoffError::Config(
                "room name, agent identity and avatar identity must not be empty".to_string(),
            ));
        }
        if ttl.is_zero() {
            return Err(HandoffError::Config(
                "avatar token TTL must be greater than zero".to_string(),
            ));
        }

        let now = self.clock.now_unix();
        let ttl_secs = i64::try_from(ttl.as_secs())
            .map_err(|_| HandoffError::Config("avatar token TTL is too large".to_string()))?;
        let expires_at = now.saturating_add(ttl_secs);

        let mut attributes = BTreeMap::new();
        attributes.insert(
            ATTRIBUTE_PUBLISH_ON_BEHALF.to_string(),
            agent_identity.to_string(),
        );

        let claims = AvatarClaims {
            iss: self.api_key.clone(),
            sub: avatar_identity.to_string(),
            nbf: now,
            exp: expires_at,
            name: self.display_name.clone(),
            video: VideoGrants {
                room_join: true,
                room: room_name.to_string(),
                can_publish: true,
                can_subscribe: true,
                can_publish_data: true,
                ..Default::default()
            },
            kind: AVATAR_PARTICIPANT_KIND.to_string(),
            attributes,
        };

        let key = EncodingKey::from_secret(self.api_secret.as_bytes());
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &key)
            .map_err(|e| HandoffError::Config(format!("failed to sign avatar token: {}", e)))?;

        Ok(Credential { token, expires_at })
    }
}

/// Verifies a credential's signature and issuer, and checks its validity
/// window against `clock` rather than the wall clock.
///
/// # Errors
///
/// Returns `CredentialError` if the token is malformed, signed with another
/// key, or outside its validity window.
pub fn verify_avatar_token(
    token: &str,
    config: &LiveKitConfig,
    clock: &dyn Clock,
) -> Result<AvatarClaims, CredentialError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.required_spec_claims = HashSet::new();
    validation.set_issuer(&[config.api_key.as_str()]);

    let data = jsonwebtoken::decode::<AvatarClaims>(
        token,
        &DecodingKey::from_secret(config.api_secret.as_bytes()),
        &validation,
    )?;
    let claims = data.claims;

    let now = clock.now_unix();
    if now < claims.nbf {
        return Err(CredentialError::NotYetValid(claims.nbf));
    }
    if now >= claims.exp {
        return Err(CredentialError::Expired(claims.exp));
    }
    Ok(claims)
}
