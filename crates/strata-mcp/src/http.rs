//! HTTP transport for remote MCP servers.
//!
//! Implements the streamable HTTP transport, which uses HTTP POST for
//! sending requests and either plain JSON or SSE for receiving responses.

use crate::error::{McpError, McpResult};
use crate::oauth::OAuthProvider;
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::transport::Transport;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Authentication mode for the HTTP transport.
#[derive(Clone, Default)]
pub enum AuthMode {
    /// No authentication.
    #[default]
    None,
    /// Static bearer token attached to every request.
    Bearer(String),
    /// OAuth: the provider is invoked transparently on an auth challenge.
    OAuth(Arc<OAuthProvider>),
}

impl std::fmt::Debug for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Bearer(_) => write!(f, "Bearer(..)"),
            Self::OAuth(_) => write!(f, "OAuth(..)"),
        }
    }
}

/// HTTP transport configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// The server URL (e.g. `https://mcp.example.com/mcp`).
    pub url: String,
    /// Extra headers attached to every request.
    pub headers: HashMap<String, String>,
    /// Authentication mode.
    pub auth: AuthMode,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            headers: HashMap::new(),
            auth: AuthMode::None,
            timeout_secs: 60,
        }
    }
}

impl HttpConfig {
    /// Create a config for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Add a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set the authentication mode.
    pub fn with_auth(mut self, auth: AuthMode) -> Self {
        self.auth = auth;
        self
    }
}

/// Transport over streaming HTTP / SSE.
pub struct HttpTransport {
    config: HttpConfig,
    client: Client,
    connected: AtomicBool,
    /// Session ID assigned by the server, echoed back on later requests.
    session_id: RwLock<Option<String>>,
}

impl HttpTransport {
    /// Create a new HTTP transport.
    ///
    /// The URL scheme is validated here: anything other than http/https
    /// fails at construction time, before any `connect()`.
    pub fn new(config: HttpConfig) -> McpResult<Self> {
        let parsed = url::Url::parse(&config.url)
            .map_err(|e| McpError::InvalidUrl(format!("{}: {e}", config.url)))?;

        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(McpError::InvalidUrl(format!(
                    "{}: unsupported scheme '{other}'",
                    config.url
                )));
            }
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                McpError::connection_failed(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            config,
            client,
            connected: AtomicBool::new(false),
            session_id: RwLock::new(None),
        })
    }

    /// Build request with common headers.
    async fn build_request(&self, body: &str, token: Option<&str>) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .post(&self.config.url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .body(body.to_string());

        for (key, value) in &self.config.headers {
            req = req.header(key, value);
        }

        if let Some(token) = token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }

        if let Some(ref session_id) = *self.session_id.read().await {
            req = req.header("x-session-id", session_id);
        }

        req
    }

    /// Token to attach without triggering interactive auth.
    fn current_token(&self) -> Option<String> {
        match &self.config.auth {
            AuthMode::None => None,
            AuthMode::Bearer(token) => Some(token.clone()),
            AuthMode::OAuth(provider) => provider.cached_token(),
        }
    }

    async fn send(&self, body: &str, token: Option<&str>) -> McpResult<reqwest::Response> {
        let response = self
            .build_request(body, token)
            .await
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    McpError::Timeout
                } else if e.is_connect() {
                    McpError::connection_failed(format!("Connection failed: {e}"))
                } else {
                    McpError::protocol_error(format!("Request failed: {e}"))
                }
            })?;

        // Remember the session ID if the server assigned one.
        if let Some(session_id) = response.headers().get("x-session-id") {
            if let Ok(id) = session_id.to_str() {
                *self.session_id.write().await = Some(id.to_string());
            }
        }

        Ok(response)
    }

    /// Send, and on a 401 with OAuth configured, run the provider and retry
    /// once with the fresh token.
    async fn send_with_auth(&self, body: &str) -> McpResult<reqwest::Response> {
        let response = self.send(body, self.current_token().as_deref()).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let AuthMode::OAuth(ref provider) = self.config.auth else {
            return Err(McpError::AuthRequired);
        };

        debug!("Server challenged for auth, running OAuth flow");
        let token = provider.access_token().await?;
        let response = self.send(body, Some(&token)).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(McpError::AuthRequired);
        }

        Ok(response)
    }

    /// Parse an HTTP response carrying either JSON or an SSE stream.
    async fn parse_response(&self, response: reqwest::Response) -> McpResult<JsonRpcResponse> {
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(McpError::AuthRequired);
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(McpError::protocol_error(format!(
                "Server returned {status}: {text}"
            )));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if content_type.contains("text/event-stream") {
            self.parse_sse_stream(response).await
        } else {
            let text = response
                .text()
                .await
                .map_err(|e| McpError::protocol_error(format!("Failed to read response: {e}")))?;

            serde_json::from_str(&text)
                .map_err(|e| McpError::protocol_error(format!("Invalid JSON response: {e}")))
        }
    }

    /// Parse an SSE stream for the JSON-RPC response.
    async fn parse_sse_stream(&self, response: reqwest::Response) -> McpResult<JsonRpcResponse> {
        use futures::StreamExt;

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk_result) = stream.next().await {
            let chunk =
                chunk_result.map_err(|e| McpError::protocol_error(format!("Stream error: {e}")))?;

            buffer.push_str(&String::from_utf8_lossy(&chunk));

            for line in buffer.lines() {
                if let Some(data) = line.strip_prefix("data: ") {
                    if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(data) {
                        return Ok(response);
                    }
                }
            }

            // Keep only incomplete lines
            if let Some(last_newline) = buffer.rfind('\n') {
                buffer = buffer[last_newline + 1..].to_string();
            }
        }

        Err(McpError::protocol_error(
            "SSE stream ended without response",
        ))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&self) -> McpResult<()> {
        // Streaming HTTP opens per request; there is nothing to acquire
        // here beyond marking the transport usable.
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> McpResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        *self.session_id.write().await = None;
        debug!("Closed HTTP transport");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }

        let request_json = serde_json::to_string(&request)?;

        debug!(id = ?request.id, method = %request.method, "Sending HTTP request");

        let response = self.send_with_auth(&request_json).await?;
        self.parse_response(response).await
    }

    async fn notify(&self, notification: JsonRpcNotification) -> McpResult<()> {
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }

        let notification_json = serde_json::to_string(&notification)?;

        debug!(method = %notification.method, "Sending HTTP notification");

        let response = self.send_with_auth(&notification_json).await?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "Notification returned non-success status");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_config_default() {
        let config = HttpConfig::default();
        assert!(config.url.is_empty());
        assert!(config.headers.is_empty());
        assert!(matches!(config.auth, AuthMode::None));
        assert_eq!(config.timeout_secs, 60);
    }

    #[test]
    fn test_http_config_builder() {
        let config = HttpConfig::new("https://example.com/mcp")
            .with_header("X-Custom", "value")
            .with_auth(AuthMode::Bearer("token".to_string()));
        assert_eq!(config.url, "https://example.com/mcp");
        assert_eq!(config.headers.get("X-Custom"), Some(&"value".to_string()));
        assert!(matches!(config.auth, AuthMode::Bearer(_)));
    }

    #[test]
    fn test_transport_creation() {
        let transport = HttpTransport::new(HttpConfig::new("https://example.com/mcp"));
        assert!(transport.is_ok());
        assert!(!transport.unwrap().is_connected());
    }

    #[test]
    fn test_unsupported_scheme_fails_at_construction() {
        let result = HttpTransport::new(HttpConfig::new("ftp://example.com"));
        match result {
            Err(McpError::InvalidUrl(msg)) => assert!(msg.contains("ftp")),
            other => panic!("Expected InvalidUrl, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_unparseable_url_fails_at_construction() {
        let result = HttpTransport::new(HttpConfig::new("not a url"));
        assert!(matches!(result, Err(McpError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_connect_disconnect_cycle() {
        let transport = HttpTransport::new(HttpConfig::new("https://example.com/mcp")).unwrap();
        assert!(!transport.is_connected());

        transport.connect().await.unwrap();
        assert!(transport.is_connected());

        // Idempotent.
        transport.connect().await.unwrap();
        assert!(transport.is_connected());

        transport.disconnect().await.unwrap();
        assert!(!transport.is_connected());

        // Disconnect on a disconnected transport is a no-op.
        transport.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_request_while_disconnected() {
        let transport = HttpTransport::new(HttpConfig::new("https://example.com/mcp")).unwrap();
        let request = JsonRpcRequest::new(1, "tools/list", None);
        let result = transport.request(request).await;
        assert!(matches!(result, Err(McpError::NotConnected)));
    }

    #[tokio::test]
    async fn test_notify_while_disconnected() {
        let transport = HttpTransport::new(HttpConfig::new("https://example.com/mcp")).unwrap();
        let note = JsonRpcNotification::new("notifications/initialized", None);
        let result = transport.notify(note).await;
        assert!(matches!(result, Err(McpError::NotConnected)));
    }

    #[tokio::test]
    async fn test_request_connection_refused() {
        let config = HttpConfig {
            url: "http://127.0.0.1:1".to_string(), // Invalid port
            timeout_secs: 1,
            ..Default::default()
        };
        let transport = HttpTransport::new(config).unwrap();
        transport.connect().await.unwrap();

        let request = JsonRpcRequest::new(1, "tools/list", None);
        let result = transport.request(request).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_session_id_initially_none() {
        let transport = HttpTransport::new(HttpConfig::new("https://example.com/mcp")).unwrap();
        assert!(transport.session_id.read().await.is_none());
    }

    #[test]
    fn test_auth_mode_debug_hides_token() {
        let debug = format!("{:?}", AuthMode::Bearer("secret-token".to_string()));
        assert!(!debug.contains("secret-token"));
    }
}
