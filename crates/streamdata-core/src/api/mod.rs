//! ============================================================================
//! API Module - Twitch REST endpoints
//! ============================================================================
//! - TwitchApi: the seam the session and the home feed talk to
//! - HelixClient: reqwest implementation against api.twitch.tv / id.twitch.tv
//!
//! Every call takes explicit `Credentials`; there is no shared header state.
//! ============================================================================

mod helix;

pub use helix::HelixClient;

use async_trait::async_trait;

use crate::types::{Credentials, FollowRelation, Game, Stream, User};

/// Failure of a single Twitch request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Transport(String),

    /// 401 from Twitch: token missing, expired or revoked provider-side
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Twitch API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse Twitch response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }
}

/// Operations the app performs against Twitch
#[async_trait]
pub trait TwitchApi: Send + Sync {
    /// `GET /users`: the user owning the bearer token
    async fn get_current_user(&self, creds: &Credentials) -> Result<Vec<User>, ApiError>;

    /// `GET /users?id=`: profile lookup by id
    async fn get_users_by_id(&self, creds: &Credentials, id: &str) -> Result<Vec<User>, ApiError>;

    /// `GET /users/follows?to_id=`: who follows `to_id`
    async fn get_follows_to(
        &self,
        creds: &Credentials,
        to_id: &str,
    ) -> Result<Vec<FollowRelation>, ApiError>;

    /// `GET /streams/followed?user_id=`: live channels `user_id` follows
    async fn get_followed_streams(
        &self,
        creds: &Credentials,
        user_id: &str,
    ) -> Result<Vec<Stream>, ApiError>;

    /// `GET /games/top`
    async fn get_top_games(&self, creds: &Credentials) -> Result<Vec<Game>, ApiError>;

    /// `POST id.twitch.tv/oauth2/revoke`
    async fn revoke_token(&self, client_id: &str, token: &str) -> Result<(), ApiError>;
}
