//! ============================================================================
//! Home Feed - top games, followers and followed live streams
//! ============================================================================
//! Three independent loads, each with its own status and alert. A failure in
//! one section never blocks the other two. Followed streams get their
//! streamer avatars resolved in parallel after the list arrives.
//! ============================================================================

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, TwitchApi};
use crate::auth::AuthSession;
use crate::config::StreamFailurePolicy;
use crate::types::{Credentials, FollowRelation, FollowedStream, Game, Stream, DEFAULT_AVATAR_URL};

pub const TOP_GAMES_ALERT_TITLE: &str = "Erro Top Games";
pub const TOP_GAMES_ALERT_MESSAGE: &str =
    "Ocorreu um erro ao buscar os jogos mais assistidos agora na Twitch";
pub const FOLLOWERS_ALERT_TITLE: &str = "Erro Commercial";
pub const FOLLOWERS_ALERT_MESSAGE: &str = "Não foi possível carregar commercial";
pub const STREAMS_ALERT_TITLE: &str = "Erro User Followed Streams";
pub const STREAMS_ALERT_MESSAGE: &str =
    "Ocorreu um erro ao buscar as informações das streams ao vivo que o usuário segue";
pub const SIGN_OUT_ALERT_TITLE: &str = "Erro SignOut";
pub const SIGN_OUT_ALERT_MESSAGE: &str = "Ocorreu um erro ao sair";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HomeError {
    #[error("No signed-in user")]
    NoSession,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Sign-out failed: {0}")]
    SignOut(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    #[default]
    Loading,
    Loaded,
    Failed,
}

/// One-shot user-facing error notice
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub title: String,
    pub message: String,
}

impl Alert {
    fn new(title: &str, message: &str) -> Self {
        Self {
            title: title.to_string(),
            message: message.to_string(),
        }
    }
}

/// Items of one feed section. Items from the last successful load are kept
/// when a later load fails.
#[derive(Debug, Clone, Serialize)]
pub struct Section<T> {
    pub items: Vec<T>,
    pub status: LoadStatus,
}

impl<T> Default for Section<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            status: LoadStatus::Loading,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HomeState {
    pub top_games: Section<Game>,
    pub followers: Section<FollowRelation>,
    pub followed_streams: Section<FollowedStream>,
    /// True while any `load_data` call is in flight
    pub is_refreshing: bool,
    pub alerts: Vec<Alert>,
}

/// Data behind the home screen
pub struct HomeScreen {
    api: Arc<dyn TwitchApi>,
    session: Arc<AuthSession>,
    policy: StreamFailurePolicy,
    state: RwLock<HomeState>,
    in_flight: AtomicUsize,
}

/// Counts one running refresh; released on drop so a cancelled refresh
/// does not leave the feed marked as refreshing
struct RefreshGuard<'a>(&'a AtomicUsize);

impl<'a> RefreshGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl HomeScreen {
    pub fn new(
        api: Arc<dyn TwitchApi>,
        session: Arc<AuthSession>,
        policy: StreamFailurePolicy,
    ) -> Self {
        Self {
            api,
            session,
            policy,
            state: RwLock::new(HomeState::default()),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    /// Current state, including alerts not yet taken
    pub async fn snapshot(&self) -> HomeState {
        let mut state = self.state.read().await.clone();
        state.is_refreshing = self.is_refreshing();
        state
    }

    /// Drain pending alerts
    pub async fn take_alerts(&self) -> Vec<Alert> {
        std::mem::take(&mut self.state.write().await.alerts)
    }

    /// Load all three sections concurrently
    pub async fn load_data(&self) {
        let _refreshing = RefreshGuard::enter(&self.in_flight);

        let (games, followers, streams) = tokio::join!(
            self.load_top_games(),
            self.load_followers(),
            self.load_followed_streams()
        );

        let failed = [games.is_err(), followers.is_err(), streams.is_err()]
            .iter()
            .filter(|failed| **failed)
            .count();
        info!("Home feed loaded ({} of 3 sections failed)", failed);
    }

    /// Pull-to-refresh: same as `load_data`. Overlapping calls race, last
    /// write per section wins.
    pub async fn refresh(&self) {
        debug!("Refreshing home feed");
        self.load_data().await;
    }

    pub async fn load_top_games(&self) -> Result<Vec<Game>, HomeError> {
        self.state.write().await.top_games.status = LoadStatus::Loading;

        let creds = self.session.credentials().await;
        match self.api.get_top_games(&creds).await {
            Ok(games) => {
                let mut state = self.state.write().await;
                state.top_games.items = games.clone();
                state.top_games.status = LoadStatus::Loaded;
                Ok(games)
            }
            Err(e) => {
                error!("Failed to load top games: {}", e);
                let mut state = self.state.write().await;
                state.top_games.status = LoadStatus::Failed;
                state
                    .alerts
                    .push(Alert::new(TOP_GAMES_ALERT_TITLE, TOP_GAMES_ALERT_MESSAGE));
                Err(e.into())
            }
        }
    }

    /// Users following the signed-in user
    pub async fn load_followers(&self) -> Result<Vec<FollowRelation>, HomeError> {
        self.state.write().await.followers.status = LoadStatus::Loading;

        let session = self.session.snapshot().await;
        let result = match session.user {
            Some(user) => {
                self.api
                    .get_follows_to(&session.credentials, &user.id)
                    .await
                    .map_err(HomeError::from)
            }
            None => Err(HomeError::NoSession),
        };

        let mut state = self.state.write().await;
        match result {
            Ok(followers) => {
                state.followers.items = followers.clone();
                state.followers.status = LoadStatus::Loaded;
                Ok(followers)
            }
            Err(e) => {
                error!("Failed to load followers: {}", e);
                state.followers.status = LoadStatus::Failed;
                state
                    .alerts
                    .push(Alert::new(FOLLOWERS_ALERT_TITLE, FOLLOWERS_ALERT_MESSAGE));
                Err(e)
            }
        }
    }

    /// Live channels the signed-in user follows, with streamer avatars
    pub async fn load_followed_streams(&self) -> Result<Vec<FollowedStream>, HomeError> {
        self.state.write().await.followed_streams.status = LoadStatus::Loading;

        let session = self.session.snapshot().await;
        let creds = session.credentials;
        let user = match session.user {
            Some(user) => user,
            None => {
                self.fail_streams(&HomeError::NoSession).await;
                return Err(HomeError::NoSession);
            }
        };

        let streams = match self.api.get_followed_streams(&creds, &user.id).await {
            Ok(streams) => streams,
            Err(e) => {
                let e = HomeError::from(e);
                self.fail_streams(&e).await;

                if self.policy == StreamFailurePolicy::WipeLocalData {
                    warn!("Wiping local data after followed-streams failure");
                    if let Err(wipe) = self.session.clear_local_data().await {
                        error!("Failed to wipe local data: {}", wipe);
                    }
                }
                return Err(e);
            }
        };

        let items = self.resolve_avatars(&creds, streams).await;

        let mut state = self.state.write().await;
        state.followed_streams.items = items.clone();
        state.followed_streams.status = LoadStatus::Loaded;
        Ok(items)
    }

    async fn fail_streams(&self, e: &HomeError) {
        error!("Failed to load followed streams: {}", e);
        let mut state = self.state.write().await;
        state.followed_streams.status = LoadStatus::Failed;
        state
            .alerts
            .push(Alert::new(STREAMS_ALERT_TITLE, STREAMS_ALERT_MESSAGE));
    }

    /// Look up every streamer's avatar in parallel. Order is preserved and a
    /// failed lookup falls back to the default avatar.
    async fn resolve_avatars(
        &self,
        creds: &Credentials,
        streams: Vec<Stream>,
    ) -> Vec<FollowedStream> {
        let api = &self.api;
        let lookups = streams.into_iter().map(|stream| async move {
            let avatar = match api.get_users_by_id(creds, &stream.user_id).await {
                Ok(users) => users
                    .into_iter()
                    .next()
                    .map(|user| user.profile_image_url)
                    .filter(|url| !url.is_empty()),
                Err(e) => {
                    debug!("Avatar lookup for {} failed: {}", stream.user_id, e);
                    None
                }
            };

            FollowedStream {
                stream,
                user_avatar_url: avatar.unwrap_or_else(|| DEFAULT_AVATAR_URL.to_string()),
            }
        });

        join_all(lookups).await
    }

    /// Sign out through the session; a failure raises the sign-out alert
    pub async fn handle_sign_out(&self) -> Result<(), HomeError> {
        match self.session.sign_out().await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("Sign-out failed: {}", e);
                self.state
                    .write()
                    .await
                    .alerts
                    .push(Alert::new(SIGN_OUT_ALERT_TITLE, SIGN_OUT_ALERT_MESSAGE));
                Err(HomeError::SignOut(e.to_string()))
            }
        }
    }
}
