//! ============================================================================
//! STREAMDATA-CORE: Twitch session and home feed
//! ============================================================================
//! Backend logic for the StreamData client:
//! - Twitch OAuth implicit sign-in with state nonce verification
//! - Session persistence in an embedded redb store
//! - Helix REST calls with explicit per-request credentials
//! - Home feed loading (top games, followers, followed live streams)
//! ============================================================================

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod home;
pub mod types;

// Re-export main types for convenience
pub use api::{ApiError, HelixClient, TwitchApi};
pub use auth::{
    AuthSession, LoopbackRedirect, RedirectFlow, SessionSnapshot, SignInError, TwitchOAuth,
};
pub use config::{AppConfig, ConfigError, StreamFailurePolicy};
pub use db::SessionDb;
pub use home::{Alert, HomeError, HomeScreen, HomeState, LoadStatus};
pub use types::*;
