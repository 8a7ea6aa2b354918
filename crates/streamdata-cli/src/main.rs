// ============================================================================
// streamdata - Twitch session and home feed from the terminal
// ============================================================================
// Usage:
//   streamdata login [--no-browser]       Sign in with Twitch (loopback redirect)
//   streamdata logout                     Revoke the token and forget the session
//   streamdata whoami                     Show the persisted user
//   streamdata home [--format json]       Load top games, followers, live streams
//   streamdata auth-url                   Print an authorization URL
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use streamdata_core::{
    AppConfig, AuthSession, HelixClient, HomeScreen, HomeState, LoadStatus, LoopbackRedirect,
    SessionDb, TwitchApi, TwitchOAuth,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "streamdata_core=info,streamdata=info";

/// Twitch session manager and home feed loader
#[derive(Parser)]
#[command(name = "streamdata", version, about = "Sign in to Twitch and load the StreamData home feed")]
struct Cli {
    /// Path to the session database (default: ~/.streamdata/session.redb)
    #[arg(long, global = true)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with Twitch through the browser
    Login {
        /// Print the authorization URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,
    },

    /// Revoke the access token and clear the persisted session
    Logout,

    /// Show the signed-in user
    Whoami,

    /// Load top games, followers and followed live streams
    Home {
        /// Output format: table or json
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Print the authorization URL for the configured redirect port
    AuthUrl,
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn format_timestamp(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn format_status(status: LoadStatus) -> &'static str {
    match status {
        LoadStatus::Loading => "loading",
        LoadStatus::Loaded => "loaded",
        LoadStatus::Failed => "failed",
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
    }
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    if let Commands::AuthUrl = cli.command {
        return cmd_auth_url(&config);
    }

    let db_path = cli
        .db_path
        .map(PathBuf::from)
        .or_else(|| config.db_path.clone());
    let store = Arc::new(SessionDb::open(db_path.as_deref())?);
    tracing::debug!("Session store: {}", store.path().display());
    let api: Arc<dyn TwitchApi> = Arc::new(HelixClient::new(&config));
    let oauth = TwitchOAuth::with_auth_url(config.client_id.clone(), &config.auth_url);
    let session = Arc::new(AuthSession::new(oauth, Arc::clone(&api), store));

    match cli.command {
        Commands::Login { no_browser } => cmd_login(&config, &session, no_browser).await,
        Commands::Logout => cmd_logout(&session).await,
        Commands::Whoami => cmd_whoami(&session).await,
        Commands::Home { format } => cmd_home(&config, api, session, &format).await,
        Commands::AuthUrl => cmd_auth_url(&config),
    }
}

fn cmd_auth_url(config: &AppConfig) -> Result<()> {
    let oauth = TwitchOAuth::with_auth_url(config.client_id.clone(), &config.auth_url);
    let redirect_uri = format!("http://localhost:{}/callback", config.redirect_port);
    let request = oauth.authorization_request(&redirect_uri);

    println!("{}", request.url);
    eprintln!("state: {}", request.state);
    Ok(())
}

async fn cmd_login(config: &AppConfig, session: &AuthSession, no_browser: bool) -> Result<()> {
    if let Some(user) = session.load_storage_data().await? {
        println!(
            "Already signed in as {} ({}). Run `streamdata logout` first.",
            user.display_name, user.id
        );
        return Ok(());
    }

    let mut flow = LoopbackRedirect::bind(config.redirect_port)?;
    if no_browser {
        flow = flow.with_opener(|url| {
            println!("Open this URL in your browser to sign in:\n\n  {}\n", url);
            Ok(())
        });
    } else {
        println!("Opening Twitch in your browser...");
    }

    let user = session.sign_in(&flow).await?;
    println!("Signed in as {} ({})", user.display_name, user.id);
    Ok(())
}

async fn cmd_logout(session: &AuthSession) -> Result<()> {
    let user = session.load_storage_data().await?;
    session.sign_out().await?;

    match user {
        Some(user) => println!("Signed out {}", user.display_name),
        None => println!("No session to sign out."),
    }
    Ok(())
}

async fn cmd_whoami(session: &AuthSession) -> Result<()> {
    match session.load_storage_data().await? {
        Some(user) => {
            println!("=== Twitch User ===");
            println!("Name:    {}", user.display_name);
            println!("ID:      {}", user.id);
            if !user.email.is_empty() {
                println!("Email:   {}", user.email);
            }
            if !user.profile_image_url.is_empty() {
                println!("Avatar:  {}", user.profile_image_url);
            }
            println!("Store:   {}", session.store().path().display());
        }
        None => println!("Not signed in."),
    }
    Ok(())
}

async fn cmd_home(
    config: &AppConfig,
    api: Arc<dyn TwitchApi>,
    session: Arc<AuthSession>,
    format: &str,
) -> Result<()> {
    let format = format.to_lowercase();
    if format != "table" && format != "json" {
        anyhow::bail!("Unknown format '{}'. Valid values: table, json", format);
    }

    session.load_storage_data().await?;
    let home = HomeScreen::new(api, session, config.stream_failure_policy);
    home.load_data().await;
    let state = home.snapshot().await;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        print_home(&state);
    }
    Ok(())
}

fn print_home(state: &HomeState) {
    println!("=== Top Games [{}] ===", format_status(state.top_games.status));
    for (rank, game) in state.top_games.items.iter().enumerate() {
        println!("  {:>3}. {:<40}  {}", rank + 1, truncate(&game.name, 40), game.id);
    }

    println!();
    println!("=== Followers [{}] ===", format_status(state.followers.status));
    for follow in &state.followers.items {
        println!(
            "  {:<25}  {}",
            truncate(&follow.from_name, 25),
            format_timestamp(follow.followed_at)
        );
    }

    println!();
    println!(
        "=== Followed Live Streams [{}] ===",
        format_status(state.followed_streams.status)
    );
    if !state.followed_streams.items.is_empty() {
        println!(
            "  {:<20}  {:<24}  {:>8}  {:<23}  {}",
            "CHANNEL", "GAME", "VIEWERS", "STARTED", "TITLE"
        );
        println!("  {}", "-".repeat(100));
    }
    for item in &state.followed_streams.items {
        let stream = &item.stream;
        println!(
            "  {:<20}  {:<24}  {:>8}  {:<23}  {}",
            truncate(&stream.user_name, 20),
            truncate(&stream.game_name, 24),
            stream.viewer_count,
            format_timestamp(stream.started_at),
            truncate(&stream.title, 40)
        );
    }

    if !state.alerts.is_empty() {
        println!();
        for alert in &state.alerts {
            eprintln!("[{}] {}", alert.title, alert.message);
        }
    }
}
