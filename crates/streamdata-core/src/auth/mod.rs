//! ============================================================================
//! Auth Module - Twitch sign-in and session lifecycle
//! ============================================================================
//! - TwitchOAuth: implicit-flow URL building + redirect validation
//! - RedirectFlow / LoopbackRedirect: the browser round trip
//! - AuthSession: in-memory session kept in step with the session store
//! ============================================================================

mod redirect;
mod session;
mod twitch_oauth;

pub use redirect::{BrowserOpener, LoopbackRedirect, RedirectFlow, DEFAULT_REDIRECT_TIMEOUT};
pub use session::{AuthSession, SessionSnapshot};
pub use twitch_oauth::{
    AuthorizationRequest, CallbackParams, RedirectOutcome, SignInError, TwitchOAuth, SCOPES,
    STATE_LENGTH,
};
