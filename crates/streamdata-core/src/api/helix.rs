//! ============================================================================
//! Helix Client - Twitch REST API over reqwest
//! ============================================================================
//! Data calls go to the Helix base URL with `Client-Id` and, when the
//! credentials carry one, `Authorization: Bearer <token>`. Token revocation
//! goes to the id.twitch.tv OAuth base.
//! ============================================================================

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::{ApiError, TwitchApi};
use crate::config::{AppConfig, DEFAULT_API_URL, DEFAULT_AUTH_URL, DEFAULT_HTTP_TIMEOUT_SECS};
use crate::types::{Credentials, FollowRelation, Game, HelixEnvelope, Stream, User};

const USER_AGENT: &str = "streamdata/1.0";

/// reqwest-backed Twitch client
pub struct HelixClient {
    client: reqwest::Client,
    api_url: String,
    auth_url: String,
}

impl HelixClient {
    /// Create a client using the endpoints and timeout from the config
    pub fn new(config: &AppConfig) -> Self {
        Self::with_base_urls(&config.api_url, &config.auth_url, config.http_timeout())
    }

    /// Create a client against explicit base URLs
    pub fn with_base_urls(api_url: &str, auth_url: &str, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            auth_url: auth_url.trim_end_matches('/').to_string(),
        }
    }

    /// Build a Helix GET with the credential headers applied
    pub(crate) fn build_get(
        &self,
        creds: &Credentials,
        path: &str,
        query: &[(&str, &str)],
    ) -> RequestBuilder {
        let url = format!("{}{}", self.api_url, path);
        let mut request = self
            .client
            .get(&url)
            .header("Client-Id", creds.client_id());

        if let Some(authorization) = creds.authorization() {
            request = request.header("Authorization", authorization);
        }
        if !query.is_empty() {
            request = request.query(query);
        }
        request
    }

    async fn get_data<T: DeserializeOwned>(
        &self,
        creds: &Credentials,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, ApiError> {
        debug!("GET {} {:?}", path, query);

        let response = self
            .build_get(creds, path, query)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Helix {} failed with {}", path, status);
            return Err(status_error(status, body));
        }

        let envelope: HelixEnvelope<T> = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;

        debug!("GET {} returned {} item(s)", path, envelope.data.len());
        Ok(envelope.data)
    }
}

impl Default for HelixClient {
    fn default() -> Self {
        Self::with_base_urls(
            DEFAULT_API_URL,
            DEFAULT_AUTH_URL,
            std::time::Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        )
    }
}

fn status_error(status: StatusCode, body: String) -> ApiError {
    if status == StatusCode::UNAUTHORIZED {
        ApiError::Unauthorized(body)
    } else {
        ApiError::Status {
            status: status.as_u16(),
            body,
        }
    }
}

#[async_trait]
impl TwitchApi for HelixClient {
    async fn get_current_user(&self, creds: &Credentials) -> Result<Vec<User>, ApiError> {
        self.get_data(creds, "/users", &[]).await
    }

    async fn get_users_by_id(&self, creds: &Credentials, id: &str) -> Result<Vec<User>, ApiError> {
        self.get_data(creds, "/users", &[("id", id)]).await
    }

    async fn get_follows_to(
        &self,
        creds: &Credentials,
        to_id: &str,
    ) -> Result<Vec<FollowRelation>, ApiError> {
        self.get_data(creds, "/users/follows", &[("to_id", to_id)]).await
    }

    async fn get_followed_streams(
        &self,
        creds: &Credentials,
        user_id: &str,
    ) -> Result<Vec<Stream>, ApiError> {
        self.get_data(creds, "/streams/followed", &[("user_id", user_id)])
            .await
    }

    async fn get_top_games(&self, creds: &Credentials) -> Result<Vec<Game>, ApiError> {
        self.get_data(creds, "/games/top", &[]).await
    }

    async fn revoke_token(&self, client_id: &str, token: &str) -> Result<(), ApiError> {
        let url = format!("{}/revoke", self.auth_url);
        let params = [("client_id", client_id), ("token", token)];

        let response = self
            .client
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        info!("Access token revoked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn creds() -> Credentials {
        Credentials::new("my-client").with_token("tok123")
    }

    #[test]
    fn test_get_request_carries_credentials() {
        let client = HelixClient::default();
        let request = client
            .build_get(&creds(), "/users", &[("id", "42")])
            .build()
            .unwrap();

        assert_eq!(request.url().as_str(), "https://api.twitch.tv/helix/users?id=42");
        assert_eq!(request.headers()["Client-Id"], "my-client");
        assert_eq!(request.headers()["Authorization"], "Bearer tok123");
    }

    #[test]
    fn test_anonymous_request_has_no_authorization() {
        let client = HelixClient::default();
        let request = client
            .build_get(&Credentials::new("my-client"), "/games/top", &[])
            .build()
            .unwrap();

        assert_eq!(request.url().path(), "/helix/games/top");
        assert!(request.headers().get("Authorization").is_none());
        assert_eq!(request.headers()["Client-Id"], "my-client");
    }

    #[test]
    fn test_status_classification() {
        assert!(status_error(StatusCode::UNAUTHORIZED, "expired".into()).is_unauthorized());
        assert_eq!(
            status_error(StatusCode::TOO_MANY_REQUESTS, "slow down".into()),
            ApiError::Status {
                status: 429,
                body: "slow down".into()
            }
        );
    }

    /// One-shot HTTP server: answers the first request and reports what it saw
    fn serve_once(status: u16, body: &'static str) -> (String, mpsc::Receiver<(String, Vec<(String, String)>)>) {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let (tx, rx) = mpsc::channel();

        std::thread::spawn(move || {
            if let Ok(Some(request)) = server.recv_timeout(Duration::from_secs(10)) {
                let headers = request
                    .headers()
                    .iter()
                    .map(|h| (h.field.to_string(), h.value.to_string()))
                    .collect();
                let _ = tx.send((request.url().to_string(), headers));
                let response = tiny_http::Response::from_string(body).with_status_code(status);
                let _ = request.respond(response);
            }
        });

        (format!("http://{}", addr), rx)
    }

    #[tokio::test]
    async fn test_top_games_round_trip() {
        let (base, rx) = serve_once(
            200,
            r#"{"data":[{"id":"33214","name":"Fortnite","box_art_url":"x-{width}x{height}.jpg"}],"pagination":{}}"#,
        );
        let client = HelixClient::with_base_urls(&base, &base, Duration::from_secs(5));

        let games = client.get_top_games(&creds()).await.unwrap();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].name, "Fortnite");

        let (url, headers) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(url, "/games/top");
        assert!(headers
            .iter()
            .any(|(k, v)| k.eq_ignore_ascii_case("Client-Id") && v == "my-client"));
        assert!(headers
            .iter()
            .any(|(k, v)| k.eq_ignore_ascii_case("Authorization") && v == "Bearer tok123"));
    }

    #[tokio::test]
    async fn test_unauthorized_response() {
        let (base, _rx) = serve_once(401, r#"{"error":"Unauthorized","status":401,"message":"Invalid OAuth token"}"#);
        let client = HelixClient::with_base_urls(&base, &base, Duration::from_secs(5));

        let err = client.get_followed_streams(&creds(), "1").await.unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let (base, _rx) = serve_once(200, "not json");
        let client = HelixClient::with_base_urls(&base, &base, Duration::from_secs(5));

        let err = client.get_users_by_id(&creds(), "1").await.unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[tokio::test]
    async fn test_revoke_posts_form() {
        let (base, rx) = serve_once(200, "");
        let client = HelixClient::with_base_urls(&base, &base, Duration::from_secs(5));

        client.revoke_token("my-client", "tok123").await.unwrap();
        let (url, _headers) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(url, "/revoke");
    }
}
