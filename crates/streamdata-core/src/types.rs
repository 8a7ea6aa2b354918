//! ============================================================================
//! Core Types for StreamData
//! ============================================================================
//! Session records, request credentials, and the read-only Helix DTOs shown
//! on the home feed. Everything here round-trips through serde_json, either
//! from Helix responses or from the local session store.
//! ============================================================================

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder avatar used when a streamer's profile lookup fails
pub const DEFAULT_AVATAR_URL: &str = "https://static-cdn.jtvnw.net/user-default-pictures-uv/cdd517fe-def4-11e9-948e-784f43822e80-profile_image-300x300.png";

// ============================================================================
// Session
// ============================================================================

/// Signed-in Twitch user, persisted as JSON between launches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub display_name: String,
    /// Only returned when the token carries `user:read:email`
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub profile_image_url: String,
}

/// Headers every Helix request is sent with.
///
/// Built from the session on each call, so the bearer value can never drift
/// from the token the session holds.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    client_id: String,
    access_token: Option<String>,
}

impl Credentials {
    /// Client-Id only (top games and other app-level reads)
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            access_token: None,
        }
    }

    pub fn with_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = Some(access_token.into());
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Value of the `Authorization` header, if a token is present
    pub fn authorization(&self) -> Option<String> {
        self.access_token
            .as_ref()
            .map(|token| format!("Bearer {}", token))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field(
                "access_token",
                &self.access_token.as_deref().map(redact_token),
            )
            .finish()
    }
}

/// Shorten a token for logs: first four characters plus its length
pub fn redact_token(token: &str) -> String {
    let prefix: String = token.chars().take(4).collect();
    format!("{}…({} chars)", prefix, token.chars().count())
}

// ============================================================================
// Helix DTOs
// ============================================================================

/// Standard Helix response wrapper: `{ "data": [...] }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelixEnvelope<T> {
    pub data: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Entry of `GET /games/top`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub id: String,
    pub name: String,
    /// Template URL containing `{width}` and `{height}` placeholders
    #[serde(default)]
    pub box_art_url: String,
}

impl Game {
    pub fn box_art(&self, width: u32, height: u32) -> String {
        fill_size_template(&self.box_art_url, width, height)
    }
}

/// Entry of `GET /streams/followed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_login: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub game_id: String,
    #[serde(default)]
    pub game_name: String,
    #[serde(rename = "type", default)]
    pub stream_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub viewer_count: u64,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub language: String,
    /// Template URL containing `{width}` and `{height}` placeholders
    #[serde(default)]
    pub thumbnail_url: String,
    #[serde(default)]
    pub is_mature: bool,
}

impl Stream {
    pub fn thumbnail(&self, width: u32, height: u32) -> String {
        fill_size_template(&self.thumbnail_url, width, height)
    }
}

/// A followed live stream plus the streamer's avatar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowedStream {
    #[serde(flatten)]
    pub stream: Stream,
    pub user_avatar_url: String,
}

impl FollowedStream {
    pub fn has_default_avatar(&self) -> bool {
        self.user_avatar_url == DEFAULT_AVATAR_URL
    }
}

/// Entry of `GET /users/follows`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowRelation {
    pub from_id: String,
    #[serde(default)]
    pub from_login: String,
    #[serde(default)]
    pub from_name: String,
    pub to_id: String,
    #[serde(default)]
    pub to_login: String,
    #[serde(default)]
    pub to_name: String,
    #[serde(default)]
    pub followed_at: Option<DateTime<Utc>>,
}

fn fill_size_template(template: &str, width: u32, height: u32) -> String {
    template
        .replace("{width}", &width.to_string())
        .replace("{height}", &height.to_string())
}
