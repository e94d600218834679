//! Client configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Only the access token is required.

use std::time::Duration;

use crate::channel::{ChannelOptions, DEFAULT_ENDPOINT};
use crate::error::SupervisorError;

/// Top-level client configuration.
///
/// Loaded once at startup via [`SupervisorConfig::from_env`].
#[derive(Clone)]
pub struct SupervisorConfig {
    /// Long-lived access token sent in the `auth` message.
    pub access_token: String,

    /// WebSocket endpoint of the supervisor API.
    pub endpoint: String,

    /// Seconds to wait before reconnecting after a failure.
    pub reconnect_delay_secs: u64,

    /// Seconds between keep-alive pings.
    pub keep_alive_interval_secs: u64,

    /// Seconds of silence tolerated after a ping.
    pub keep_alive_timeout_secs: u64,

    /// Seconds to wait for the result of a generic request.
    pub request_timeout_secs: u64,

    /// Entities observed by the built-in state logger.
    pub tracked_entities: Vec<String>,
}

impl SupervisorConfig {
    /// Creates a configuration with default settings for `access_token`.
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            reconnect_delay_secs: 10,
            keep_alive_interval_secs: 30,
            keep_alive_timeout_secs: 20,
            request_timeout_secs: 30,
            tracked_entities: Vec::new(),
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// Falls back to defaults when an optional variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::MissingAccessToken`] if
    /// `SUPERVISOR_TOKEN` is unset or empty, or
    /// [`SupervisorError::InvalidConfig`] for unusable values.
    pub fn from_env() -> Result<Self, SupervisorError> {
        dotenvy::dotenv().ok();

        let access_token = std::env::var("SUPERVISOR_TOKEN").unwrap_or_default();
        let mut config = Self::new(access_token);

        config.endpoint =
            std::env::var("SUPERVISOR_WS_URL").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        config.reconnect_delay_secs = parse_env("SUPERVISOR_RECONNECT_DELAY_SECS", 10);
        config.keep_alive_interval_secs = parse_env("SUPERVISOR_KEEPALIVE_INTERVAL_SECS", 30);
        config.keep_alive_timeout_secs = parse_env("SUPERVISOR_KEEPALIVE_TIMEOUT_SECS", 20);
        config.request_timeout_secs = parse_env("SUPERVISOR_REQUEST_TIMEOUT_SECS", 30);
        config.tracked_entities = parse_list(
            &std::env::var("SUPERVISOR_ENTITIES").unwrap_or_default(),
        );

        config.validate()?;
        Ok(config)
    }

    /// Checks the settings that cannot be defaulted.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::MissingAccessToken`] for a blank token and
    /// [`SupervisorError::InvalidConfig`] for an empty endpoint or a zero
    /// keep-alive interval.
    pub fn validate(&self) -> Result<(), SupervisorError> {
        if self.access_token.trim().is_empty() {
            return Err(SupervisorError::MissingAccessToken);
        }
        if self.endpoint.trim().is_empty() {
            return Err(SupervisorError::InvalidConfig(
                "endpoint must not be empty".to_string(),
            ));
        }
        if self.keep_alive_interval_secs == 0 {
            return Err(SupervisorError::InvalidConfig(
                "keep-alive interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Connection settings derived from this configuration.
    #[must_use]
    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            uri: self.endpoint.clone(),
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            keep_alive_interval: Duration::from_secs(self.keep_alive_interval_secs),
            keep_alive_timeout: Duration::from_secs(self.keep_alive_timeout_secs),
        }
    }

    /// Timeout applied to generic requests.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl std::fmt::Debug for SupervisorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorConfig")
            .field("access_token", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("reconnect_delay_secs", &self.reconnect_delay_secs)
            .field("keep_alive_interval_secs", &self.keep_alive_interval_secs)
            .field("keep_alive_timeout_secs", &self.keep_alive_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("tracked_entities", &self.tracked_entities)
            .finish()
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Splits a comma-separated list, dropping blanks.
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
