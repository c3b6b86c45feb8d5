//! OAuth callback server.
//!
//! A short-lived loopback HTTP listener that captures the authorization
//! code (or error) from the browser redirect during interactive OAuth.

use crate::error::{McpError, McpResult};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex, Notify, RwLock};
use tracing::{debug, info, warn};

/// Default port the callback server binds on localhost.
pub const CALLBACK_PORT: u16 = 3030;

/// HTML response for successful authorization.
const HTML_SUCCESS: &str = r#"<!DOCTYPE html>
<html>
<head>
  <title>Strata - Authorization Successful</title>
  <style>
    body { font-family: system-ui, -apple-system, sans-serif; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; background: #1a1a2e; color: #eee; }
    .container { text-align: center; padding: 2rem; }
    h1 { color: #4ade80; margin-bottom: 1rem; }
    p { color: #aaa; }
  </style>
</head>
<body>
  <div class="container">
    <h1>Authorization Successful</h1>
    <p>You can close this window and return to your terminal.</p>
  </div>
  <script>setTimeout(() => window.close(), 2000);</script>
</body>
</html>"#;

/// HTML response for failed authorization.
fn html_error(error: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <title>Strata - Authorization Failed</title>
  <style>
    body {{ font-family: system-ui, -apple-system, sans-serif; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; background: #1a1a2e; color: #eee; }}
    .container {{ text-align: center; padding: 2rem; }}
    h1 {{ color: #f87171; margin-bottom: 1rem; }}
    p {{ color: #aaa; }}
    .error {{ color: #fca5a5; font-family: monospace; margin-top: 1rem; padding: 1rem; background: rgba(248,113,113,0.1); border-radius: 0.5rem; }}
  </style>
</head>
<body>
  <div class="container">
    <h1>Authorization Failed</h1>
    <p>An error occurred during authorization.</p>
    <div class="error">{}</div>
  </div>
</body>
</html>"#,
        html_escape(error)
    )
}

/// Escape HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Outcome of one OAuth redirect, written once by the handler.
#[derive(Debug, Default, Clone)]
struct CallbackResult {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// Loopback HTTP server capturing one OAuth redirect.
pub struct CallbackServer {
    port: u16,
    result: Arc<RwLock<CallbackResult>>,
    notify: Arc<Notify>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    bound_addr: RwLock<Option<SocketAddr>>,
}

impl CallbackServer {
    /// Create a server for the default callback port.
    pub fn new() -> Self {
        Self::with_port(CALLBACK_PORT)
    }

    /// Create a server for a specific port. Port 0 picks an ephemeral port;
    /// the bound address is available from [`addr`](Self::addr) after
    /// `start()`.
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            result: Arc::new(RwLock::new(CallbackResult::default())),
            notify: Arc::new(Notify::new()),
            shutdown_tx: Mutex::new(None),
            bound_addr: RwLock::new(None),
        }
    }

    /// Start listening. A bind failure propagates immediately; there is no
    /// retry.
    pub async fn start(&self) -> McpResult<()> {
        let addr = SocketAddr::from(([127, 0, 0, 1], self.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            McpError::connection_failed(format!("Failed to bind OAuth callback server: {e}"))
        })?;

        let bound = listener.local_addr()?;
        *self.bound_addr.write().await = Some(bound);
        info!(addr = %bound, "OAuth callback server started");

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        {
            let mut tx = self.shutdown_tx.lock().await;
            *tx = Some(shutdown_tx);
        }

        let result = self.result.clone();
        let notify = self.notify.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, _)) => {
                                let result = result.clone();
                                let notify = notify.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, result, notify).await {
                                        warn!(error = %e, "Error handling OAuth callback");
                                    }
                                });
                            }
                            Err(e) => {
                                warn!(error = %e, "Error accepting connection");
                            }
                        }
                    }
                    _ = &mut shutdown_rx => {
                        info!("OAuth callback server shutting down");
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    /// Address the server is bound to, once started.
    pub async fn addr(&self) -> Option<SocketAddr> {
        *self.bound_addr.read().await
    }

    /// Wait until the redirect delivers an authorization code.
    ///
    /// Returns the code, or fails with the provider's error string, or with
    /// an authorization-timeout error once `timeout` elapses.
    pub async fn wait_for_callback(&self, timeout: std::time::Duration) -> McpResult<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before checking, so a result recorded
            // between the check and the wait is not missed.
            let notified = self.notify.notified();

            {
                let result = self.result.read().await;
                if let Some(ref error) = result.error {
                    return Err(McpError::AuthFailed(error.clone()));
                }
                if let Some(ref code) = result.code {
                    return Ok(code.clone());
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(McpError::AuthFailed(
                    "OAuth callback timeout - authorization took too long".to_string(),
                ));
            }
        }
    }

    /// The `state` query parameter from the redirect, if one arrived.
    pub async fn get_state(&self) -> Option<String> {
        self.result.read().await.state.clone()
    }

    /// Stop the listener. Safe to call when never started.
    pub async fn stop(&self) {
        let mut tx = self.shutdown_tx.lock().await;
        if let Some(sender) = tx.take() {
            let _ = sender.send(());
        }
        // Wake any waiter so it observes the timeout path promptly.
        self.notify.notify_waiters();
    }
}

impl Default for CallbackServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle one incoming HTTP connection.
async fn handle_connection(
    mut stream: tokio::net::TcpStream,
    result: Arc<RwLock<CallbackResult>>,
    notify: Arc<Notify>,
) -> McpResult<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut buffer = [0u8; 4096];
    let n = stream
        .read(&mut buffer)
        .await
        .map_err(|e| McpError::protocol_error(format!("Failed to read request: {e}")))?;

    let request = String::from_utf8_lossy(&buffer[..n]);

    // Parse HTTP request line
    let first_line = request.lines().next().unwrap_or("");
    let parts: Vec<&str> = first_line.split_whitespace().collect();

    if parts.len() < 2 {
        let response = http_response(400, "text/plain", "Bad Request");
        stream.write_all(response.as_bytes()).await.ok();
        return Ok(());
    }

    if parts[0] != "GET" {
        let response = http_response(404, "text/plain", "Not Found");
        stream.write_all(response.as_bytes()).await.ok();
        return Ok(());
    }

    let path = parts[1];

    // The redirect URI path is not checked: any GET carrying a `code` or
    // `error` query parameter is treated as the OAuth callback.
    let url = format!("http://127.0.0.1{path}");
    let parsed = match url::Url::parse(&url) {
        Ok(u) => u,
        Err(_) => {
            let response = http_response(400, "text/plain", "Invalid URL");
            stream.write_all(response.as_bytes()).await.ok();
            return Ok(());
        }
    };

    let params: HashMap<String, String> = parsed
        .query_pairs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let code = params.get("code");
    let oauth_state = params.get("state");
    let error = params.get("error");
    let error_description = params.get("error_description");

    debug!(
        has_code = code.is_some(),
        state = ?oauth_state,
        error = ?error,
        "Received OAuth callback"
    );

    if let Some(err) = error {
        let error_msg = error_description.cloned().unwrap_or_else(|| err.clone());

        {
            let mut result = result.write().await;
            // First outcome wins.
            if result.code.is_none() && result.error.is_none() {
                result.error = Some(error_msg.clone());
                result.state = oauth_state.cloned();
            }
        }
        notify.notify_one();

        let html = html_error(&error_msg);
        let response = http_response(400, "text/html", &html);
        stream.write_all(response.as_bytes()).await.ok();
        return Ok(());
    }

    if let Some(code) = code {
        {
            let mut result = result.write().await;
            if result.code.is_none() && result.error.is_none() {
                result.code = Some(code.clone());
                result.state = oauth_state.cloned();
            }
        }
        notify.notify_one();

        let response = http_response(200, "text/html", HTML_SUCCESS);
        stream.write_all(response.as_bytes()).await.ok();
        return Ok(());
    }

    let response = http_response(404, "text/plain", "Not Found");
    stream.write_all(response.as_bytes()).await.ok();
    Ok(())
}

/// Build an HTTP response.
fn http_response(status: u16, content_type: &str, body: &str) -> String {
    let status_text = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        _ => "Unknown",
    };

    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        status_text,
        content_type,
        body.len(),
        body
    )
}
