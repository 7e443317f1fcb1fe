use crate::error::HandoffError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default dispatcher endpoint for local development.
pub const DEFAULT_DISPATCHER_URL: &str = "http://localhost:8089/launch";

/// Identity the avatar worker joins the room under.
pub const DEFAULT_AVATAR_IDENTITY: &str = "avatar_worker";

fn default_token_ttl_seconds() -> u64 {
    3600
}

fn default_dispatcher_url() -> String {
    DEFAULT_DISPATCHER_URL.to_string()
}

fn default_avatar_identity() -> String {
    DEFAULT_AVATAR_IDENTITY.to_string()
}

fn default_display_name() -> String {
    "Avatar Runner".to_string()
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_rendezvous_timeout_ms() -> u64 {
    30_000
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LiveKitConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default, skip_serializing)]
    pub api_secret: String,
    /// JWT TTL in seconds for avatar join tokens. Default: 3600 (1 hour).
    #[serde(default = "default_token_ttl_seconds")]
    pub token_ttl_seconds: u64,
}

impl Default for LiveKitConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            token_ttl_seconds: default_token_ttl_seconds(),
        }
    }
}

impl fmt::Debug for LiveKitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveKitConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .field("token_ttl_seconds", &self.token_ttl_seconds)
            .finish()
    }
}

impl LiveKitConfig {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            token_ttl_seconds: default_token_ttl_seconds(),
        }
    }

    /// Returns `true` when both halves of the signing key are present.
    pub fn has_signing_material(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }
}

/// What to do when the routed avatar becomes unavailable mid-session.
///
/// Has no default; `avatar.on_disconnect` must be set explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterFailurePolicy {
    /// Surface the error and end the session.
    EndSession,
    /// Record the fault, drop avatar audio, and keep the session running.
    Degrade,
}

impl RouterFailurePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EndSession => "end_session",
            Self::Degrade => "degrade",
        }
    }
}

impl fmt::Display for RouterFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RouterFailurePolicy {
    type Err = HandoffError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "end_session" => Ok(Self::EndSession),
            "degrade" => Ok(Self::Degrade),
            other => Err(HandoffError::Config(format!(
                "unknown router failure policy '{}', expected 'end_session' or 'degrade'",
                other
            ))),
        }
    }
}

/// The `[avatar]` configuration section as read from file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvatarSettings {
    #[serde(default = "default_dispatcher_url")]
    pub dispatcher_url: String,
    #[serde(default = "default_avatar_identity")]
    pub identity: String,
    #[serde(default = "default_display_name")]
    pub display_name: String,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_rendezvous_timeout_ms")]
    pub rendezvous_timeout_ms: u64,
    /// Required; validation fails when unset.
    #[serde(default)]
    pub on_disconnect: Option<RouterFailurePolicy>,
}

impl Default for AvatarSettings {
    fn default() -> Self {
        Self {
            dispatcher_url: default_dispatcher_url(),
            identity: default_avatar_identity(),
            display_name: default_display_name(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            rendezvous_timeout_ms: default_rendezvous_timeout_ms(),
            on_disconnect: None,
        }
    }
}

/// Validated hand-off parameters passed to the coordinator.
#[derive(Debug, Clone)]
pub struct HandoffConfig {
    pub dispatcher_url: String,
    pub avatar_identity: String,
    pub avatar_display_name: String,
    pub token_ttl: Duration,
    pub handshake_timeout: Duration,
    pub rendezvous_timeout: Duration,
    pub on_disconnect: RouterFailurePolicy,
}

impl HandoffConfig {
    /// Validates the file-level settings.
    ///
    /// # Errors
    ///
    /// Returns `HandoffError::Config` for a malformed dispatcher URL, an empty
    /// avatar identity, a zero timeout or TTL, or a missing disconnect policy.
    pub fn from_settings(
        livekit: &LiveKitConfig,
        avatar: &AvatarSettings,
    ) -> Result<Self, HandoffError> {
        let url = reqwest::Url::parse(&avatar.dispatcher_url).map_err(|e| {
            HandoffError::Config(format!(
                "invalid avatar dispatcher URL '{}': {}",
                avatar.dispatcher_url, e
            ))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(HandoffError::Config(format!(
                "avatar dispatcher URL must be http or https, got '{}'",
                url.scheme()
            )));
        }

        if avatar.identity.trim().is_empty() {
            return Err(HandoffError::Config(
                "avatar identity must not be empty".to_string(),
            ));
        }
        if livekit.token_ttl_seconds == 0 {
            return Err(HandoffError::Config(
                "livekit.token_ttl_seconds must be greater than zero".to_string(),
            ));
        }
        if avatar.handshake_timeout_ms == 0 || avatar.rendezvous_timeout_ms == 0 {
            return Err(HandoffError::Config(
                "avatar handshake and rendezvous timeouts must be greater than zero".to_string(),
            ));
        }

        let on_disconnect = avatar.on_disconnect.ok_or_else(|| {
            HandoffError::Config(
                "avatar.on_disconnect must be set to 'end_session' or 'degrade'".to_string(),
            )
        })?;

        Ok(Self {
            dispatcher_url: avatar.dispatcher_url.clone(),
            avatar_identity: avatar.identity.clone(),
            avatar_display_name: avatar.display_name.clone(),
            token_ttl: Duration::from_secs(livekit.token_ttl_seconds),
            handshake_timeout: Duration::from_millis(avatar.handshake_timeout_ms),
            rendezvous_timeout: Duration::from_millis(avatar.rendezvous_timeout_ms),
            on_disconnect,
        })
    }
}
