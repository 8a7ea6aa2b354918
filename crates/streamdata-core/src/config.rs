//! ============================================================================
//! Configuration - environment-driven settings
//! ============================================================================
//! Read once at startup (after `dotenvy::dotenv()` in the binary). Only the
//! OAuth client id is mandatory; every other value has a working default.
//! ============================================================================

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Helix data API base URL
pub const DEFAULT_API_URL: &str = "https://api.twitch.tv/helix";
/// id.twitch.tv OAuth base URL (authorize + revoke live under it)
pub const DEFAULT_AUTH_URL: &str = "https://id.twitch.tv/oauth2";
/// Loopback port the redirect listener binds to
pub const DEFAULT_REDIRECT_PORT: u16 = 9876;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("TWITCH_CLIENT_ID not set. Configure it in .env or the Twitch developer console")]
    MissingClientId,

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// What the home feed does when the followed-streams request itself fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamFailurePolicy {
    /// Raise the alert and keep the signed-in session
    #[default]
    KeepSession,
    /// Also wipe every persisted key, signing the user out
    WipeLocalData,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub client_id: String,
    pub api_url: String,
    pub auth_url: String,
    pub redirect_port: u16,
    /// From STREAMDATA_DB_PATH; None falls back to `SessionDb::default_path()`
    pub db_path: Option<PathBuf>,
    pub http_timeout_secs: u64,
    pub stream_failure_policy: StreamFailurePolicy,
}

impl AppConfig {
    /// Config with defaults for everything except the client id
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            api_url: DEFAULT_API_URL.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            redirect_port: DEFAULT_REDIRECT_PORT,
            db_path: None,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            stream_failure_policy: StreamFailurePolicy::default(),
        }
    }

    /// Build the config from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the config from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let client_id = get("TWITCH_CLIENT_ID")
            .or_else(|| get("CLIENT_ID"))
            .ok_or(ConfigError::MissingClientId)?;

        let mut config = Self::new(client_id.trim());

        if let Some(url) = get("TWITCH_API_URL") {
            config.api_url = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = get("TWITCH_AUTH_URL") {
            config.auth_url = url.trim_end_matches('/').to_string();
        }
        if let Some(port) = get("TWITCH_REDIRECT_PORT") {
            config.redirect_port = port.trim().parse().map_err(|_| ConfigError::InvalidValue {
                name: "TWITCH_REDIRECT_PORT",
                value: port.clone(),
            })?;
        }
        if let Some(path) = get("STREAMDATA_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }
        if let Some(secs) = get("STREAMDATA_HTTP_TIMEOUT_SECS") {
            config.http_timeout_secs =
                secs.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    name: "STREAMDATA_HTTP_TIMEOUT_SECS",
                    value: secs.clone(),
                })?;
        }
        if let Some(flag) = get("STREAMDATA_WIPE_ON_STREAM_FAILURE") {
            config.stream_failure_policy = match parse_bool(&flag) {
                Some(true) => StreamFailurePolicy::WipeLocalData,
                Some(false) => StreamFailurePolicy::KeepSession,
                None => {
                    return Err(ConfigError::InvalidValue {
                        name: "STREAMDATA_WIPE_ON_STREAM_FAILURE",
                        value: flag,
                    })
                }
            };
        }

        Ok(config)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
