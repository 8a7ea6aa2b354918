//! ============================================================================
//! Twitch OAuth 2.0 Implicit Flow
//! ============================================================================
//! Builds the id.twitch.tv authorization URL and validates what comes back
//! through the redirect. The implicit flow returns the access token directly,
//! so there is no code exchange step and no client secret.
//! ============================================================================

use std::collections::HashMap;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, error, warn};

use crate::api::ApiError;
use crate::config::DEFAULT_AUTH_URL;

/// Scopes requested on every sign-in
pub const SCOPES: &str = "openid user:read:email user:read:follows channel:edit:commercial";

/// Length of the anti-CSRF state nonce
pub const STATE_LENGTH: usize = 30;

/// Why a sign-in attempt did not produce a session
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignInError {
    #[error("Sign-in already in progress")]
    InProgress,

    #[error("Sign-in was cancelled before Twitch redirected back")]
    Cancelled,

    #[error("Access denied by the user")]
    AccessDenied,

    #[error("Twitch OAuth error: {error} - {description}")]
    Provider { error: String, description: String },

    #[error("State mismatch - possible CSRF attack")]
    StateMismatch,

    #[error("No access token in redirect")]
    MissingToken,

    #[error("Twitch returned no profile for the new token")]
    MissingProfile,

    #[error("Network error: {0}")]
    Network(#[from] ApiError),

    #[error("Failed to store session: {0}")]
    Storage(String),

    #[error("Redirect flow failed: {0}")]
    Flow(String),
}

impl SignInError {
    /// True when the redirect could have been forged
    pub fn is_security(&self) -> bool {
        matches!(self, SignInError::StateMismatch)
    }
}

/// Parameters Twitch put on the redirect (query or fragment)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub access_token: Option<String>,
    pub state: Option<String>,
    pub scope: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut map: HashMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_string(), v.into()))
            .collect();

        Self {
            access_token: map.remove("access_token"),
            state: map.remove("state"),
            scope: map.remove("scope"),
            error: map.remove("error"),
            error_description: map.remove("error_description"),
        }
    }

    /// Whether these params end the flow (token or error present)
    pub fn is_terminal(&self) -> bool {
        self.access_token.is_some() || self.error.is_some()
    }
}

/// Terminal result of a redirect flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectOutcome {
    Success(CallbackParams),
    /// The browser was closed or the wait timed out
    Dismissed,
}

/// A prepared authorization request
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub redirect_uri: String,
}

/// Twitch OAuth implicit-flow helper
#[derive(Debug, Clone)]
pub struct TwitchOAuth {
    client_id: String,
    auth_url: String,
}

impl TwitchOAuth {
    /// Create a helper against the default id.twitch.tv endpoint
    pub fn new(client_id: String) -> Self {
        Self::with_auth_url(client_id, DEFAULT_AUTH_URL)
    }

    pub fn with_auth_url(client_id: String, auth_url: &str) -> Self {
        Self {
            client_id,
            auth_url: auth_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Generate a random alphanumeric state parameter for CSRF protection
    pub fn generate_state() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(STATE_LENGTH)
            .map(char::from)
            .collect()
    }

    /// Build the authorization URL with a fresh state nonce
    pub fn authorization_request(&self, redirect_uri: &str) -> AuthorizationRequest {
        self.authorization_request_with_state(redirect_uri, Self::generate_state())
    }

    pub fn authorization_request_with_state(
        &self,
        redirect_uri: &str,
        state: String,
    ) -> AuthorizationRequest {
        let url = format!(
            "{}/authorize?client_id={}&redirect_uri={}&response_type=token&scope={}&force_verify=true&state={}",
            self.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(SCOPES),
            &state
        );

        debug!("Generated auth URL for redirect {}", redirect_uri);
        AuthorizationRequest {
            url,
            state,
            redirect_uri: redirect_uri.to_string(),
        }
    }

    /// Check a redirect outcome against the expected state.
    /// Returns the access token on success.
    pub fn validate(outcome: RedirectOutcome, expected_state: &str) -> Result<String, SignInError> {
        let params = match outcome {
            RedirectOutcome::Success(params) => params,
            RedirectOutcome::Dismissed => return Err(SignInError::Cancelled),
        };

        if let Some(error) = params.error {
            if error == "access_denied" {
                warn!("User denied access on Twitch");
                return Err(SignInError::AccessDenied);
            }
            let description = params
                .error_description
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(SignInError::Provider { error, description });
        }

        if params.state.as_deref() != Some(expected_state) {
            error!("State mismatch on OAuth redirect");
            return Err(SignInError::StateMismatch);
        }

        params
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or(SignInError::MissingToken)
    }
}
