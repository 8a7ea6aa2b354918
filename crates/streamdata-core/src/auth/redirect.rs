//! ============================================================================
//! Redirect Flow - browser round trip for the implicit grant
//! ============================================================================
//! Twitch puts the implicit-flow token in the URL fragment, which browsers
//! never send to a server. The loopback listener therefore answers the first
//! `/callback` hit with a bridge page that replays the fragment as a query
//! string; the second hit carries `access_token`/`state` (or `error`).
//! ============================================================================

use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tiny_http::{Header, Response, Server};
use tracing::{debug, info, warn};

use super::twitch_oauth::{CallbackParams, RedirectOutcome, SignInError};

const CALLBACK_PATH: &str = "/callback";
/// How long to wait for the user to finish on twitch.tv
pub const DEFAULT_REDIRECT_TIMEOUT: Duration = Duration::from_secs(300);

const BRIDGE_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>StreamData - Signing in</title></head>
<body>
<p>Finishing sign-in&hellip;</p>
<script>
  var fragment = window.location.hash.substring(1);
  window.location.replace('/callback?' + (fragment || 'error=missing_fragment'));
</script>
</body>
</html>
"#;

const DONE_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>StreamData - Twitch</title></head>
<body style="font-family: sans-serif; background: #0e0e10; color: #efeff1; text-align: center; padding-top: 20vh;">
<h1>Twitch sign-in received</h1>
<p>You can close this window and return to StreamData.</p>
</body>
</html>
"#;

/// Drives the external browser leg of the OAuth flow
#[async_trait]
pub trait RedirectFlow: Send + Sync {
    /// Redirect URI registered with Twitch for this flow
    fn redirect_uri(&self) -> String;

    /// Send the user to `auth_url` and wait for a terminal redirect
    async fn authorize(&self, auth_url: &str) -> Result<RedirectOutcome, SignInError>;
}

/// Opens the authorization URL for the user
pub type BrowserOpener = Box<dyn Fn(&str) -> std::io::Result<()> + Send + Sync>;

/// Redirect flow served by a listener on 127.0.0.1
pub struct LoopbackRedirect {
    server: Arc<Server>,
    port: u16,
    timeout: Duration,
    opener: BrowserOpener,
}

impl LoopbackRedirect {
    /// Bind the listener. Port 0 picks a free ephemeral port.
    pub fn bind(port: u16) -> Result<Self> {
        let addr = format!("127.0.0.1:{}", port);
        let server = Server::http(&addr)
            .map_err(|e| anyhow!("Failed to start callback server on {}: {}", addr, e))?;

        let bound_port = server
            .server_addr()
            .to_ip()
            .map(|a| a.port())
            .ok_or_else(|| anyhow!("Callback server is not bound to an IP address"))?;

        debug!("Callback listener bound on port {}", bound_port);

        Ok(Self {
            server: Arc::new(server),
            port: bound_port,
            timeout: DEFAULT_REDIRECT_TIMEOUT,
            opener: Box::new(|url: &str| open::that(url)),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace how the authorization URL is opened (e.g. print it instead)
    pub fn with_opener<F>(mut self, opener: F) -> Self
    where
        F: Fn(&str) -> std::io::Result<()> + Send + Sync + 'static,
    {
        self.opener = Box::new(opener);
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

#[async_trait]
impl RedirectFlow for LoopbackRedirect {
    fn redirect_uri(&self) -> String {
        format!("http://localhost:{}{}", self.port, CALLBACK_PATH)
    }

    async fn authorize(&self, auth_url: &str) -> Result<RedirectOutcome, SignInError> {
        (self.opener)(auth_url)
            .map_err(|e| SignInError::Flow(format!("Failed to open browser: {}", e)))?;

        info!("Waiting for Twitch OAuth redirect on port {}", self.port);

        let server = Arc::clone(&self.server);
        let deadline = Instant::now() + self.timeout;
        tokio::task::spawn_blocking(move || wait_for_redirect(&server, deadline))
            .await
            .map_err(|e| SignInError::Flow(format!("Callback task failed: {}", e)))?
    }
}

/// Serve requests until one carries a token or an error, or the deadline passes
fn wait_for_redirect(server: &Server, deadline: Instant) -> Result<RedirectOutcome, SignInError> {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!("Timed out waiting for OAuth redirect");
            return Ok(RedirectOutcome::Dismissed);
        }

        let request = match server.recv_timeout(remaining) {
            Ok(Some(request)) => request,
            Ok(None) => {
                warn!("Timed out waiting for OAuth redirect");
                return Ok(RedirectOutcome::Dismissed);
            }
            Err(e) => return Err(SignInError::Flow(format!("Callback server error: {}", e))),
        };

        let raw = request.url().to_string();
        let parsed = match url::Url::parse(&format!("http://localhost{}", raw)) {
            Ok(parsed) => parsed,
            Err(_) => {
                let _ = request.respond(html_response("Bad request", 400));
                continue;
            }
        };

        if parsed.path() != CALLBACK_PATH {
            debug!("Ignoring request for {}", parsed.path());
            let _ = request.respond(html_response("Not found", 404));
            continue;
        }

        let params = CallbackParams::from_pairs(parsed.query_pairs());
        if params.is_terminal() {
            let _ = request.respond(html_response(DONE_HTML, 200));
            info!("Received OAuth redirect");
            return Ok(RedirectOutcome::Success(params));
        }

        // Token still in the fragment: hand the browser the bridge page
        let _ = request.respond(html_response(BRIDGE_HTML, 200));
    }
}

fn html_response(body: &str, status: u16) -> Response<Cursor<Vec<u8>>> {
    let response = Response::from_string(body).with_status_code(status);
    match Header::from_bytes(&b"Content-Type"[..], &b"text/html; charset=utf-8"[..]) {
        Ok(header) => response.with_header(header),
        Err(_) => response,
    }
}
