//! Worker configuration loading from file and environment variables.

use marionette_avatar::{AvatarSettings, HandoffConfig, LiveKitConfig, RouterFailurePolicy};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level worker configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// LiveKit server and signing key.
    #[serde(default)]
    pub livekit: LiveKitConfig,

    /// Avatar hand-off settings.
    #[serde(default)]
    pub avatar: AvatarSettings,
}

/// Network configuration for the control surface.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "marionette_avatar=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8081
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Validates the hand-off settings for the coordinator.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the avatar section is incomplete,
    /// including a missing `avatar.on_disconnect`.
    pub fn handoff_config(&self) -> Result<HandoffConfig, ConfigError> {
        HandoffConfig::from_settings(&self.livekit, &self.avatar)
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `MARIONETTE_HOST` overrides `server.host`
/// - `MARIONETTE_PORT` overrides `server.port`
/// - `MARIONETTE_LOG_LEVEL` overrides `logging.level`
/// - `MARIONETTE_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `LIVEKIT_URL`, `LIVEKIT_API_KEY`, `LIVEKIT_API_SECRET` override `livekit.*`
/// - `MARIONETTE_AVATAR_URL` overrides `avatar.dispatcher_url`
/// - `MARIONETTE_AVATAR_ON_DISCONNECT` overrides `avatar.on_disconnect`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if an override has an unusable value.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(config, |key| std::env::var(key).ok())
}

/// Applies overrides from `lookup`, which maps variable names to values.
///
/// # Errors
///
/// Returns `ConfigError::Invalid` for an unknown disconnect policy.
pub fn apply_env_overrides(
    mut config: Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Config, ConfigError> {
    if let Some(host) = lookup("MARIONETTE_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = lookup("MARIONETTE_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(level) = lookup("MARIONETTE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("MARIONETTE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(url) = lookup("LIVEKIT_URL") {
        config.livekit.url = url;
    }
    if let Some(key) = lookup("LIVEKIT_API_KEY") {
        config.livekit.api_key = key;
    }
    if let Some(secret) = lookup("LIVEKIT_API_SECRET") {
        config.livekit.api_secret = secret;
    }
    if let Some(url) = lookup("MARIONETTE_AVATAR_URL") {
        config.avatar.dispatcher_url = url;
    }
    if let Some(policy) = lookup("MARIONETTE_AVATAR_ON_DISCONNECT") {
        let parsed: RouterFailurePolicy = policy
            .parse()
            .map_err(|e: marionette_avatar::HandoffError| ConfigError::Invalid(e.to_string()))?;
        config.avatar.on_disconnect = Some(parsed);
    }

    Ok(config)
}
