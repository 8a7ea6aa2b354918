//! ============================================================================
//! Auth Session - sign-in, sign-out and restore
//! ============================================================================
//! Owns the in-memory session (user + token) and keeps it in step with the
//! persisted copy in `SessionDb`. Request headers are derived from it on
//! every call through `credentials()`.
//! ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::redirect::RedirectFlow;
use super::twitch_oauth::{SignInError, TwitchOAuth};
use crate::api::TwitchApi;
use crate::db::{SessionDb, USER_DATA_KEY, USER_TOKEN_KEY};
use crate::types::{redact_token, Credentials, User};

#[derive(Debug, Default)]
struct SessionState {
    user: Option<User>,
    token: Option<String>,
}

/// User and request headers read under one lock acquisition
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub user: Option<User>,
    pub credentials: Credentials,
}

/// Holds a progress flag raised; lowers it when dropped, including when the
/// owning future is cancelled
struct FlagGuard<'a>(&'a AtomicBool);

impl<'a> FlagGuard<'a> {
    /// Raise the flag unless it is already up
    fn try_raise(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }

    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Session manager shared by the front end and the home feed
pub struct AuthSession {
    oauth: TwitchOAuth,
    api: Arc<dyn TwitchApi>,
    store: Arc<SessionDb>,
    state: RwLock<SessionState>,
    logging_in: AtomicBool,
    logging_out: AtomicBool,
}

impl AuthSession {
    pub fn new(oauth: TwitchOAuth, api: Arc<dyn TwitchApi>, store: Arc<SessionDb>) -> Self {
        Self {
            oauth,
            api,
            store,
            state: RwLock::new(SessionState::default()),
            logging_in: AtomicBool::new(false),
            logging_out: AtomicBool::new(false),
        }
    }

    pub fn client_id(&self) -> &str {
        self.oauth.client_id()
    }

    pub fn store(&self) -> &Arc<SessionDb> {
        &self.store
    }

    pub async fn user(&self) -> Option<User> {
        self.state.read().await.user.clone()
    }

    pub async fn is_signed_in(&self) -> bool {
        let state = self.state.read().await;
        state.user.is_some() && state.token.is_some()
    }

    pub fn is_logging_in(&self) -> bool {
        self.logging_in.load(Ordering::SeqCst)
    }

    pub fn is_logging_out(&self) -> bool {
        self.logging_out.load(Ordering::SeqCst)
    }

    /// Headers for the next request: always Client-Id, bearer when signed in
    pub async fn credentials(&self) -> Credentials {
        let state = self.state.read().await;
        self.credentials_for(&state)
    }

    /// Current user together with the headers that belong to it
    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.read().await;
        SessionSnapshot {
            user: state.user.clone(),
            credentials: self.credentials_for(&state),
        }
    }

    fn credentials_for(&self, state: &SessionState) -> Credentials {
        let creds = Credentials::new(self.oauth.client_id());
        match &state.token {
            Some(token) => creds.with_token(token.clone()),
            None => creds,
        }
    }

    /// Restore a persisted session. Returns the restored user, if any.
    ///
    /// No expiry check is made; a token revoked on Twitch's side surfaces as
    /// `ApiError::Unauthorized` on the next call.
    pub async fn load_storage_data(&self) -> Result<Option<User>> {
        let user_json = self.store.get_item(USER_DATA_KEY)?;
        let token_json = self.store.get_item(USER_TOKEN_KEY)?;

        let (user_json, token_json) = match (user_json, token_json) {
            (Some(user), Some(token)) => (user, token),
            _ => {
                debug!("No persisted session");
                return Ok(None);
            }
        };

        let user: User = match serde_json::from_str(&user_json) {
            Ok(user) => user,
            Err(e) => {
                warn!("Ignoring unreadable persisted user: {}", e);
                return Ok(None);
            }
        };
        let token: String = match serde_json::from_str(&token_json) {
            Ok(token) => token,
            Err(e) => {
                warn!("Ignoring unreadable persisted token: {}", e);
                return Ok(None);
            }
        };

        let mut state = self.state.write().await;
        state.user = Some(user.clone());
        state.token = Some(token);

        info!("Restored session for {}", user.display_name);
        Ok(Some(user))
    }

    /// Run the full implicit-grant sign-in through `flow`
    pub async fn sign_in(&self, flow: &dyn RedirectFlow) -> Result<User, SignInError> {
        let _logging_in = FlagGuard::try_raise(&self.logging_in).ok_or(SignInError::InProgress)?;

        let result = self.run_sign_in(flow).await;

        if let Err(e) = &result {
            error!("Sign-in failed: {}", e);
        }
        result
    }

    async fn run_sign_in(&self, flow: &dyn RedirectFlow) -> Result<User, SignInError> {
        let redirect_uri = flow.redirect_uri();
        let request = self.oauth.authorization_request(&redirect_uri);

        let outcome = flow.authorize(&request.url).await?;
        let token = TwitchOAuth::validate(outcome, &request.state)?;
        debug!("Received access token {}", redact_token(&token));

        let creds = Credentials::new(self.oauth.client_id()).with_token(token.clone());
        let user = self
            .api
            .get_current_user(&creds)
            .await?
            .into_iter()
            .next()
            .ok_or(SignInError::MissingProfile)?;

        self.persist(&user, &token)
            .map_err(|e| SignInError::Storage(e.to_string()))?;

        let mut state = self.state.write().await;
        state.user = Some(user.clone());
        state.token = Some(token);

        info!("Signed in as {} ({})", user.display_name, user.id);
        Ok(user)
    }

    fn persist(&self, user: &User, token: &str) -> Result<()> {
        let user_json =
            serde_json::to_string(user).map_err(|e| anyhow!("Failed to serialize user: {}", e))?;
        let token_json =
            serde_json::to_string(token).map_err(|e| anyhow!("Failed to serialize token: {}", e))?;

        self.store.multi_set(&[
            (USER_DATA_KEY, user_json.as_str()),
            (USER_TOKEN_KEY, token_json.as_str()),
        ])
    }

    /// Revoke (best effort) and forget the session.
    ///
    /// In-memory state is cleared first, then both persisted keys are
    /// removed; only a storage failure is reported.
    pub async fn sign_out(&self) -> Result<()> {
        let _logging_out = FlagGuard::raise(&self.logging_out);
        let token = self.state.read().await.token.clone();

        if let Some(token) = token {
            if let Err(e) = self.api.revoke_token(self.oauth.client_id(), &token).await {
                warn!("Token revocation failed (ignored): {}", e);
            }
        }

        {
            let mut state = self.state.write().await;
            state.user = None;
            state.token = None;
        }

        self.store.multi_remove(&[USER_DATA_KEY, USER_TOKEN_KEY])?;
        info!("Signed out");
        Ok(())
    }

    /// Drop the in-memory session and wipe every persisted key
    pub async fn clear_local_data(&self) -> Result<usize> {
        {
            let mut state = self.state.write().await;
            state.user = None;
            state.token = None;
        }
        self.store.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::auth::twitch_oauth::{CallbackParams, RedirectOutcome};
    use crate::types::{FollowRelation, Game, Stream};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeApi {
        profile: Option<User>,
        fail_profile: bool,
        fail_revoke: bool,
        revoked: Mutex<Vec<String>>,
        seen_auth: Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl TwitchApi for FakeApi {
        async fn get_current_user(&self, creds: &Credentials) -> Result<Vec<User>, ApiError> {
            self.seen_auth.lock().unwrap().push(creds.authorization());
            if self.fail_profile {
                return Err(ApiError::Transport("connection reset".into()));
            }
            Ok(self.profile.clone().into_iter().collect())
        }

        async fn get_users_by_id(&self, _: &Credentials, _: &str) -> Result<Vec<User>, ApiError> {
            Ok(vec![])
        }

        async fn get_follows_to(
            &self,
            _: &Credentials,
            _: &str,
        ) -> Result<Vec<FollowRelation>, ApiError> {
            Ok(vec![])
        }

        async fn get_followed_streams(
            &self,
            _: &Credentials,
            _: &str,
        ) -> Result<Vec<Stream>, ApiError> {
            Ok(vec![])
        }

        async fn get_top_games(&self, _: &Credentials) -> Result<Vec<Game>, ApiError> {
            Ok(vec![])
        }

        async fn revoke_token(&self, _: &str, token: &str) -> Result<(), ApiError> {
            self.revoked.lock().unwrap().push(token.to_string());
            if self.fail_revoke {
                return Err(ApiError::Status {
                    status: 400,
                    body: "Invalid token".into(),
                });
            }
            Ok(())
        }
    }

    /// Redirect flow that answers with whatever the test scripts
    enum ScriptedFlow {
        /// Echo the requested state back with this token
        Echo(&'static str),
        /// Reply with a fixed state regardless of the request
        FixedState(&'static str, &'static str),
        Deny,
        Dismiss,
        /// Browser never comes back
        Hang,
    }

    #[async_trait]
    impl RedirectFlow for ScriptedFlow {
        fn redirect_uri(&self) -> String {
            "http://localhost:9876/callback".to_string()
        }

        async fn authorize(&self, auth_url: &str) -> Result<RedirectOutcome, SignInError> {
            let url = url::Url::parse(auth_url).unwrap();
            let state = url
                .query_pairs()
                .find(|(k, _)| k == "state")
                .map(|(_, v)| v.into_owned())
                .unwrap();

            Ok(match self {
                ScriptedFlow::Echo(token) => RedirectOutcome::Success(CallbackParams::from_pairs([
                    ("access_token", token.to_string()),
                    ("state", state),
                ])),
                ScriptedFlow::FixedState(token, fixed) => {
                    RedirectOutcome::Success(CallbackParams::from_pairs([
                        ("access_token", *token),
                        ("state", *fixed),
                    ]))
                }
                ScriptedFlow::Deny => RedirectOutcome::Success(CallbackParams::from_pairs([
                    ("error", "access_denied".to_string()),
                    ("state", state),
                ])),
                ScriptedFlow::Dismiss => RedirectOutcome::Dismissed,
                ScriptedFlow::Hang => std::future::pending::<RedirectOutcome>().await,
            })
        }
    }

    fn profile() -> User {
        User {
            id: "141981764".into(),
            display_name: "TwitchDev".into(),
            email: "dev@example.com".into(),
            profile_image_url: "https://example.com/p.png".into(),
        }
    }

    fn session_with(api: FakeApi) -> (tempfile::TempDir, Arc<FakeApi>, AuthSession) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SessionDb::open(Some(&dir.path().join("s.redb"))).unwrap());
        let api = Arc::new(api);
        let session = AuthSession::new(
            TwitchOAuth::new("client-123".into()),
            Arc::clone(&api) as Arc<dyn TwitchApi>,
            store,
        );
        (dir, api, session)
    }

    #[tokio::test]
    async fn test_sign_in_persists_and_sets_credentials() {
        let (_dir, api, session) = session_with(FakeApi {
            profile: Some(profile()),
            ..Default::default()
        });

        let user = session.sign_in(&ScriptedFlow::Echo("tok-abc")).await.unwrap();
        assert_eq!(user, profile());
        assert!(session.is_signed_in().await);
        assert!(!session.is_logging_in());

        // Profile was fetched with the new token
        assert_eq!(
            api.seen_auth.lock().unwrap().as_slice(),
            &[Some("Bearer tok-abc".to_string())]
        );

        // Header and persisted token agree
        let creds = session.credentials().await;
        assert_eq!(creds.authorization().as_deref(), Some("Bearer tok-abc"));
        assert_eq!(creds.client_id(), "client-123");

        let stored_token = session.store().get_item(USER_TOKEN_KEY).unwrap().unwrap();
        let stored_token: String = serde_json::from_str(&stored_token).unwrap();
        assert_eq!(creds.access_token(), Some(stored_token.as_str()));

        let stored_user = session.store().get_item(USER_DATA_KEY).unwrap().unwrap();
        assert_eq!(serde_json::from_str::<User>(&stored_user).unwrap(), profile());
    }

    #[tokio::test]
    async fn test_sign_in_state_mismatch_leaves_no_trace() {
        let (_dir, api, session) = session_with(FakeApi {
            profile: Some(profile()),
            ..Default::default()
        });

        let err = session
            .sign_in(&ScriptedFlow::FixedState("tok-abc", "forged-state"))
            .await
            .unwrap_err();

        assert_eq!(err, SignInError::StateMismatch);
        assert!(!session.is_signed_in().await);
        assert!(session.user().await.is_none());
        assert!(session.credentials().await.authorization().is_none());
        assert!(session.store().keys().unwrap().is_empty());
        // Never reached the profile call
        assert!(api.seen_auth.lock().unwrap().is_empty());
        assert!(!session.is_logging_in());
    }

    #[tokio::test]
    async fn test_sign_in_error_kinds() {
        let (_dir, _api, session) = session_with(FakeApi {
            profile: Some(profile()),
            ..Default::default()
        });
        assert_eq!(
            session.sign_in(&ScriptedFlow::Deny).await.unwrap_err(),
            SignInError::AccessDenied
        );
        assert_eq!(
            session.sign_in(&ScriptedFlow::Dismiss).await.unwrap_err(),
            SignInError::Cancelled
        );

        let (_dir, _api, session) = session_with(FakeApi {
            fail_profile: true,
            ..Default::default()
        });
        let err = session.sign_in(&ScriptedFlow::Echo("tok")).await.unwrap_err();
        assert!(matches!(err, SignInError::Network(ApiError::Transport(_))));
        assert!(session.store().keys().unwrap().is_empty());

        let (_dir, _api, session) = session_with(FakeApi::default());
        assert_eq!(
            session.sign_in(&ScriptedFlow::Echo("tok")).await.unwrap_err(),
            SignInError::MissingProfile
        );
        assert!(!session.is_signed_in().await);
    }

    #[tokio::test]
    async fn test_overlapping_sign_in_rejected() {
        let (_dir, _api, session) = session_with(FakeApi::default());
        let _held = FlagGuard::raise(&session.logging_in);

        assert_eq!(
            session.sign_in(&ScriptedFlow::Echo("tok")).await.unwrap_err(),
            SignInError::InProgress
        );
    }

    #[tokio::test]
    async fn test_cancelled_sign_in_releases_guard() {
        let (_dir, _api, session) = session_with(FakeApi {
            profile: Some(profile()),
            ..Default::default()
        });

        let cancelled = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            session.sign_in(&ScriptedFlow::Hang),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(!session.is_logging_in());

        let user = session.sign_in(&ScriptedFlow::Echo("tok-abc")).await.unwrap();
        assert_eq!(user, profile());
    }

    #[tokio::test]
    async fn test_snapshot_pairs_user_with_credentials() {
        let (_dir, _api, session) = session_with(FakeApi {
            profile: Some(profile()),
            ..Default::default()
        });

        let empty = session.snapshot().await;
        assert!(empty.user.is_none());
        assert!(empty.credentials.authorization().is_none());
        assert_eq!(empty.credentials.client_id(), "client-123");

        session.sign_in(&ScriptedFlow::Echo("tok-abc")).await.unwrap();
        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.user, Some(profile()));
        assert_eq!(
            snapshot.credentials.authorization().as_deref(),
            Some("Bearer tok-abc")
        );
    }

    #[tokio::test]
    async fn test_sign_out_without_session_is_noop() {
        let (_dir, api, session) = session_with(FakeApi::default());

        session.sign_out().await.unwrap();
        session.sign_out().await.unwrap();

        assert!(api.revoked.lock().unwrap().is_empty());
        assert!(session.store().keys().unwrap().is_empty());
        assert!(!session.is_logging_out());
    }

    #[tokio::test]
    async fn test_sign_out_clears_even_when_revoke_fails() {
        let (_dir, api, session) = session_with(FakeApi {
            profile: Some(profile()),
            fail_revoke: true,
            ..Default::default()
        });
        session.sign_in(&ScriptedFlow::Echo("tok-abc")).await.unwrap();

        session.sign_out().await.unwrap();

        assert_eq!(api.revoked.lock().unwrap().as_slice(), &["tok-abc".to_string()]);
        assert!(!session.is_signed_in().await);
        assert!(session.credentials().await.authorization().is_none());
        assert_eq!(session.store().get_item(USER_DATA_KEY).unwrap(), None);
        assert_eq!(session.store().get_item(USER_TOKEN_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_load_storage_data_restores_session() {
        let (dir, _api, session) = session_with(FakeApi {
            profile: Some(profile()),
            ..Default::default()
        });
        session.sign_in(&ScriptedFlow::Echo("tok-abc")).await.unwrap();
        drop(session);

        // Fresh process: same file, empty memory
        let store = Arc::new(SessionDb::open(Some(&dir.path().join("s.redb"))).unwrap());
        let restored = AuthSession::new(
            TwitchOAuth::new("client-123".into()),
            Arc::new(FakeApi::default()),
            store,
        );
        assert!(!restored.is_signed_in().await);

        let user = restored.load_storage_data().await.unwrap();
        assert_eq!(user, Some(profile()));
        assert_eq!(
            restored.credentials().await.authorization().as_deref(),
            Some("Bearer tok-abc")
        );
    }

    #[tokio::test]
    async fn test_load_storage_data_needs_both_keys() {
        let (_dir, _api, session) = session_with(FakeApi::default());
        session
            .store()
            .set_item(USER_DATA_KEY, &serde_json::to_string(&profile()).unwrap())
            .unwrap();

        assert_eq!(session.load_storage_data().await.unwrap(), None);
        assert!(!session.is_signed_in().await);
    }

    #[tokio::test]
    async fn test_load_storage_data_ignores_corrupt_values() {
        let (_dir, _api, session) = session_with(FakeApi::default());
        session
            .store()
            .multi_set(&[(USER_DATA_KEY, "{not json"), (USER_TOKEN_KEY, "\"tok\"")])
            .unwrap();

        assert_eq!(session.load_storage_data().await.unwrap(), None);
        assert!(!session.is_signed_in().await);
        // Left in place for inspection
        assert_eq!(session.store().keys().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_clear_local_data_wipes_everything() {
        let (_dir, _api, session) = session_with(FakeApi {
            profile: Some(profile()),
            ..Default::default()
        });
        session.sign_in(&ScriptedFlow::Echo("tok")).await.unwrap();
        session.store().set_item("unrelated", "1").unwrap();

        assert_eq!(session.clear_local_data().await.unwrap(), 3);
        assert!(!session.is_signed_in().await);
        assert!(session.store().keys().unwrap().is_empty());
    }
}
