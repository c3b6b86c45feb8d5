//! OAuth support for remote MCP servers.
//!
//! Implements OAuth 2.0 with PKCE: browser redirect, loopback callback,
//! code exchange and token refresh, with tokens persisted per server
//! through [`TokenStore`].

use crate::callback::{CallbackServer, CALLBACK_PORT};
use crate::error::{McpError, McpResult};
use crate::token_store::{ClientRegistration, TokenRecord, TokenStore};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// How long the interactive flow waits for the browser redirect.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(300);

/// OAuth configuration.
#[derive(Debug, Clone, Default)]
pub struct OAuthConfig {
    /// Pre-registered client ID.
    pub client_id: Option<String>,
    /// Pre-registered client secret (optional).
    pub client_secret: Option<String>,
    /// Requested scopes.
    pub scope: Option<String>,
}

/// Token endpoint response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Derive the authorization base URL from a server URL by stripping a
/// trailing `/mcp` or `/sse` suffix.
///
/// This is a heuristic, not a URL-parsing rule: trailing slashes, query
/// strings and other path conventions pass through unchanged, and a server
/// whose auth base differs from its tool-call base will not be handled.
pub fn derive_auth_base(url: &str) -> String {
    url.strip_suffix("/mcp")
        .or_else(|| url.strip_suffix("/sse"))
        .unwrap_or(url)
        .to_string()
}

/// OAuth provider for one remote server.
pub struct OAuthProvider {
    server_name: String,
    auth_base: String,
    config: OAuthConfig,
    store: Arc<TokenStore>,
    http: reqwest::Client,
}

impl OAuthProvider {
    /// Create a provider for `server_url`, persisting tokens through `store`.
    pub fn new(
        server_name: impl Into<String>,
        server_url: &str,
        config: OAuthConfig,
        store: Arc<TokenStore>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            auth_base: derive_auth_base(server_url),
            config,
            store,
            http: reqwest::Client::new(),
        }
    }

    /// The derived authorization base URL.
    pub fn auth_base_url(&self) -> &str {
        &self.auth_base
    }

    /// The fixed localhost redirect URI.
    pub fn redirect_url(&self) -> String {
        format!("http://127.0.0.1:{CALLBACK_PORT}/callback")
    }

    fn authorization_endpoint(&self) -> String {
        format!("{}/authorize", self.auth_base)
    }

    fn token_endpoint(&self) -> String {
        format!("{}/token", self.auth_base)
    }

    /// The static client descriptor bound to this provider.
    ///
    /// When no `client_id` is configured, the id carries over from the
    /// stored registration, so re-persisting this descriptor never loses
    /// a previously registered id.
    pub fn client_registration(&self) -> ClientRegistration {
        let auth_method = if self.config.client_secret.is_some() {
            "client_secret_post"
        } else {
            "none"
        };

        let client_id = self
            .config
            .client_id
            .clone()
            .or_else(|| self.store.get_client_info().map(|info| info.client_id))
            .unwrap_or_default();

        ClientRegistration {
            client_id,
            client_secret: self.config.client_secret.clone(),
            redirect_uris: vec![self.redirect_url()],
            grant_types: vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
            ],
            response_types: vec!["code".to_string()],
            token_endpoint_auth_method: auth_method.to_string(),
        }
    }

    fn client_id(&self) -> McpResult<String> {
        if let Some(ref id) = self.config.client_id {
            return Ok(id.clone());
        }
        if let Some(info) = self.store.get_client_info() {
            return Ok(info.client_id);
        }
        Err(McpError::AuthFailed(format!(
            "No OAuth client_id configured for {}",
            self.server_name
        )))
    }

    /// The stored access token, if present and not expired. Never triggers
    /// the interactive flow.
    pub fn cached_token(&self) -> Option<String> {
        self.store
            .get_tokens()
            .filter(|record| !is_expired(record))
            .map(|record| record.access_token)
    }

    /// Get a usable access token, refreshing or re-authorizing as needed.
    ///
    /// Invoked by the HTTP transport when the server challenges for auth.
    /// May open the user's browser and block (up to the auth timeout) on the
    /// loopback callback.
    pub async fn access_token(&self) -> McpResult<String> {
        if let Some(record) = self.store.get_tokens() {
            if !is_expired(&record) {
                return Ok(record.access_token);
            }

            if let Some(ref refresh_token) = record.refresh_token {
                debug!(server = %self.server_name, "Access token expired, refreshing");
                match self.refresh(refresh_token).await {
                    Ok(token) => return Ok(token),
                    Err(e) => {
                        info!(server = %self.server_name, error = %e, "Token refresh failed, re-authorizing");
                    }
                }
            }
        }

        self.authorize().await
    }

    async fn refresh(&self, refresh_token: &str) -> McpResult<String> {
        let response = refresh_tokens(
            &self.http,
            &self.token_endpoint(),
            &self.client_id()?,
            self.config.client_secret.as_deref(),
            refresh_token,
        )
        .await?;

        let record = token_record_from_response(response);
        let token = record.access_token.clone();
        self.store.set_tokens(record)?;
        Ok(token)
    }

    /// Run the interactive authorization flow: open the browser, wait for
    /// the loopback callback, exchange the code, persist the tokens.
    pub async fn authorize(&self) -> McpResult<String> {
        let client_id = self.client_id()?;
        self.store.set_client_info(self.client_registration());

        let verifier = generate_code_verifier();
        let challenge = generate_code_challenge(&verifier);
        let state = generate_state();

        let auth_url = build_auth_url(
            &self.authorization_endpoint(),
            &client_id,
            &self.redirect_url(),
            self.config.scope.as_deref(),
            &state,
            &challenge,
        );

        let server = CallbackServer::new();
        server.start().await?;

        info!(server = %self.server_name, "Opening browser for authorization");
        // Fire and forget; the user completes the flow in the browser.
        let _ = open::that(&auth_url);

        let wait_result = server.wait_for_callback(AUTH_TIMEOUT).await;
        let returned_state = server.get_state().await;
        server.stop().await;

        let code = wait_result?;
        verify_state(&state, returned_state.as_deref())?;

        let response = exchange_code(
            &self.http,
            &self.token_endpoint(),
            &client_id,
            self.config.client_secret.as_deref(),
            &code,
            &self.redirect_url(),
            &verifier,
        )
        .await?;

        let record = token_record_from_response(response);
        let token = record.access_token.clone();
        self.store.set_tokens(record)?;

        info!(server = %self.server_name, "Authorization complete");
        Ok(token)
    }
}

/// Check the redirect's state parameter against the one we issued.
fn verify_state(expected: &str, got: Option<&str>) -> McpResult<()> {
    match got {
        Some(s) if s == expected => Ok(()),
        _ => Err(McpError::AuthFailed(
            "OAuth state mismatch - possible CSRF".to_string(),
        )),
    }
}

/// Convert a token endpoint response into the persisted record, resolving
/// `expires_in` to an absolute expiry timestamp.
fn token_record_from_response(response: TokenResponse) -> TokenRecord {
    let expiry = response.expires_in.map(|secs| unix_now() + secs);
    TokenRecord {
        access_token: response.access_token,
        refresh_token: response.refresh_token,
        expiry,
        scope: response.scope,
        token_type: response.token_type,
    }
}

/// Whether the record's access token is expired, with a 60 second buffer.
fn is_expired(record: &TokenRecord) -> bool {
    match record.expiry {
        Some(expiry) => expiry <= unix_now() + 60,
        None => false,
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Generate PKCE code verifier.
pub fn generate_code_verifier() -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(&bytes)
}

/// Generate PKCE code challenge from verifier.
pub fn generate_code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    let result = hasher.finalize();
    URL_SAFE_NO_PAD.encode(result)
}

/// Generate OAuth state parameter.
pub fn generate_state() -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(&bytes)
}

/// Build authorization URL.
pub fn build_auth_url(
    auth_endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    scope: Option<&str>,
    state: &str,
    code_challenge: &str,
) -> String {
    let mut url = format!(
        "{}?response_type=code&client_id={}&redirect_uri={}&state={}&code_challenge={}&code_challenge_method=S256",
        auth_endpoint,
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(state),
        urlencoding::encode(code_challenge),
    );

    if let Some(scope) = scope {
        url.push_str(&format!("&scope={}", urlencoding::encode(scope)));
    }

    url
}

/// Exchange authorization code for tokens.
#[allow(clippy::too_many_arguments)]
pub async fn exchange_code(
    client: &reqwest::Client,
    token_endpoint: &str,
    client_id: &str,
    client_secret: Option<&str>,
    code: &str,
    redirect_uri: &str,
    code_verifier: &str,
) -> McpResult<TokenResponse> {
    let mut params = vec![
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("client_id", client_id),
        ("code_verifier", code_verifier),
    ];

    if let Some(secret) = client_secret {
        params.push(("client_secret", secret));
    }

    let response = client
        .post(token_endpoint)
        .form(&params)
        .send()
        .await
        .map_err(|e| McpError::AuthFailed(format!("Token request failed: {e}")))?;

    if !response.status().is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(McpError::AuthFailed(format!(
            "Token exchange failed: {text}"
        )));
    }

    let tokens: TokenResponse = response
        .json()
        .await
        .map_err(|e| McpError::AuthFailed(format!("Invalid token response: {e}")))?;

    Ok(tokens)
}

/// Refresh tokens using a refresh token.
pub async fn refresh_tokens(
    client: &reqwest::Client,
    token_endpoint: &str,
    client_id: &str,
    client_secret: Option<&str>,
    refresh_token: &str,
) -> McpResult<TokenResponse> {
    let mut params = vec![
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("client_id", client_id),
    ];

    if let Some(secret) = client_secret {
        params.push(("client_secret", secret));
    }

    let response = client
        .post(token_endpoint)
        .form(&params)
        .send()
        .await
        .map_err(|e| McpError::AuthFailed(format!("Refresh request failed: {e}")))?;

    if !response.status().is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(McpError::AuthFailed(format!(
            "Token refresh failed: {text}"
        )));
    }

    let tokens: TokenResponse = response
        .json()
        .await
        .map_err(|e| McpError::AuthFailed(format!("Invalid refresh response: {e}")))?;

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn provider(dir: &TempDir, url: &str, config: OAuthConfig) -> OAuthProvider {
        let store = Arc::new(TokenStore::with_base_dir("test-server", dir.path()));
        OAuthProvider::new("test-server", url, config, store)
    }

    #[test]
    fn test_derive_auth_base_strips_mcp_suffix() {
        assert_eq!(derive_auth_base("https://host/x/mcp"), "https://host/x");
    }

    #[test]
    fn test_derive_auth_base_strips_sse_suffix() {
        assert_eq!(derive_auth_base("https://host/x/sse"), "https://host/x");
    }

    #[test]
    fn test_derive_auth_base_no_suffix_unchanged() {
        assert_eq!(derive_auth_base("https://host/x"), "https://host/x");
    }

    #[test]
    fn test_derive_auth_base_trailing_slash_unchanged() {
        // The heuristic only matches exact suffixes.
        assert_eq!(derive_auth_base("https://host/mcp/"), "https://host/mcp/");
    }

    #[test]
    fn test_generate_code_verifier() {
        let verifier = generate_code_verifier();
        // Base64url encoded 32 bytes = 43 characters
        assert!(verifier.len() >= 40);
    }

    #[test]
    fn test_generate_code_challenge_deterministic() {
        let verifier = "test_verifier_12345678901234567890";
        let challenge = generate_code_challenge(verifier);
        // Base64url encoded SHA256 = 43 characters
        assert_eq!(challenge.len(), 43);
        assert_eq!(challenge, generate_code_challenge(verifier));
    }

    #[test]
    fn test_generate_state_uniqueness() {
        assert_ne!(generate_state(), generate_state());
    }

    #[test]
    fn test_build_auth_url() {
        let url = build_auth_url(
            "https://auth.example.com/authorize",
            "client123",
            "http://127.0.0.1:3030/callback",
            Some("read write"),
            "state123",
            "challenge123",
        );

        assert!(url.contains("response_type=code"));
        assert!(url.contains("client_id=client123"));
        assert!(url.contains("scope=read%20write"));
        assert!(url.contains("code_challenge_method=S256"));
    }

    #[test]
    fn test_build_auth_url_no_scope() {
        let url = build_auth_url(
            "https://auth.example.com/authorize",
            "client123",
            "http://127.0.0.1:3030/callback",
            None,
            "state123",
            "challenge123",
        );

        assert!(!url.contains("scope="));
    }

    #[test]
    fn test_redirect_url_uses_callback_port() {
        let dir = TempDir::new().unwrap();
        let provider = provider(&dir, "https://example.com/mcp", OAuthConfig::default());
        assert_eq!(provider.redirect_url(), "http://127.0.0.1:3030/callback");
    }

    #[test]
    fn test_endpoints_derived_from_auth_base() {
        let dir = TempDir::new().unwrap();
        let provider = provider(&dir, "https://example.com/x/mcp", OAuthConfig::default());
        assert_eq!(provider.auth_base_url(), "https://example.com/x");
        assert_eq!(
            provider.authorization_endpoint(),
            "https://example.com/x/authorize"
        );
        assert_eq!(provider.token_endpoint(), "https://example.com/x/token");
    }

    #[test]
    fn test_client_registration_without_secret() {
        let dir = TempDir::new().unwrap();
        let config = OAuthConfig {
            client_id: Some("client123".to_string()),
            ..Default::default()
        };
        let provider = provider(&dir, "https://example.com/mcp", config);

        let reg = provider.client_registration();
        assert_eq!(reg.client_id, "client123");
        assert_eq!(reg.redirect_uris, vec!["http://127.0.0.1:3030/callback"]);
        assert_eq!(reg.grant_types, vec!["authorization_code", "refresh_token"]);
        assert_eq!(reg.response_types, vec!["code"]);
        assert_eq!(reg.token_endpoint_auth_method, "none");
    }

    #[test]
    fn test_client_registration_with_secret() {
        let dir = TempDir::new().unwrap();
        let config = OAuthConfig {
            client_id: Some("client123".to_string()),
            client_secret: Some("secret456".to_string()),
            scope: None,
        };
        let provider = provider(&dir, "https://example.com/mcp", config);

        let reg = provider.client_registration();
        assert_eq!(reg.token_endpoint_auth_method, "client_secret_post");
    }

    #[test]
    fn test_client_id_missing_fails() {
        let dir = TempDir::new().unwrap();
        let provider = provider(&dir, "https://example.com/mcp", OAuthConfig::default());
        assert!(matches!(
            provider.client_id(),
            Err(McpError::AuthFailed(_))
        ));
    }

    #[test]
    fn test_client_id_from_stored_registration() {
        let dir = TempDir::new().unwrap();
        let provider = provider(&dir, "https://example.com/mcp", OAuthConfig::default());
        provider.store.set_client_info(ClientRegistration {
            client_id: "registered-client".to_string(),
            client_secret: None,
            redirect_uris: vec![],
            grant_types: vec![],
            response_types: vec![],
            token_endpoint_auth_method: "none".to_string(),
        });

        assert_eq!(provider.client_id().unwrap(), "registered-client");
    }

    #[test]
    fn test_client_registration_keeps_stored_client_id() {
        let dir = TempDir::new().unwrap();
        let provider = provider(&dir, "https://example.com/mcp", OAuthConfig::default());
        provider.store.set_client_info(ClientRegistration {
            client_id: "registered-client".to_string(),
            client_secret: None,
            redirect_uris: vec![],
            grant_types: vec![],
            response_types: vec![],
            token_endpoint_auth_method: "none".to_string(),
        });

        assert_eq!(provider.client_id().unwrap(), "registered-client");

        // Re-persisting the descriptor, as the interactive flow does,
        // must not lose the registered id.
        provider.store.set_client_info(provider.client_registration());
        assert_eq!(provider.client_id().unwrap(), "registered-client");
    }

    #[test]
    fn test_client_registration_prefers_configured_client_id() {
        let dir = TempDir::new().unwrap();
        let config = OAuthConfig {
            client_id: Some("configured-client".to_string()),
            ..Default::default()
        };
        let provider = provider(&dir, "https://example.com/mcp", config);
        provider.store.set_client_info(ClientRegistration {
            client_id: "registered-client".to_string(),
            client_secret: None,
            redirect_uris: vec![],
            grant_types: vec![],
            response_types: vec![],
            token_endpoint_auth_method: "none".to_string(),
        });

        assert_eq!(provider.client_registration().client_id, "configured-client");
    }

    #[test]
    fn test_verify_state() {
        assert!(verify_state("abc", Some("abc")).is_ok());
        assert!(verify_state("abc", Some("xyz")).is_err());
        assert!(verify_state("abc", None).is_err());
    }

    #[test]
    fn test_token_record_from_response_expiry() {
        let record = token_record_from_response(TokenResponse {
            access_token: "access123".to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: Some("refresh456".to_string()),
            expires_in: Some(3600),
            scope: Some("read".to_string()),
        });

        assert_eq!(record.access_token, "access123");
        let expiry = record.expiry.unwrap();
        let expected = unix_now() + 3600;
        assert!(expiry >= expected - 2 && expiry <= expected);
    }

    #[test]
    fn test_token_record_no_expiry_never_expires() {
        let record = token_record_from_response(TokenResponse {
            access_token: "access123".to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: None,
            expires_in: None,
            scope: None,
        });

        assert!(record.expiry.is_none());
        assert!(!is_expired(&record));
    }

    #[test]
    fn test_is_expired_applies_buffer() {
        let mut record = token_record_from_response(TokenResponse {
            access_token: "access123".to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: None,
            expires_in: Some(30),
            scope: None,
        });

        // 30 seconds left is inside the 60 second buffer.
        assert!(is_expired(&record));

        record.expiry = Some(unix_now() + 3600);
        assert!(!is_expired(&record));
    }

    #[tokio::test]
    async fn test_access_token_returns_stored_valid_token() {
        let dir = TempDir::new().unwrap();
        let provider = provider(
            &dir,
            "https://example.com/mcp",
            OAuthConfig {
                client_id: Some("client123".to_string()),
                ..Default::default()
            },
        );

        provider
            .store
            .set_tokens(TokenRecord {
                access_token: "stored-token".to_string(),
                refresh_token: None,
                expiry: Some(unix_now() + 3600),
                scope: None,
                token_type: "Bearer".to_string(),
            })
            .unwrap();

        let token = provider.access_token().await.unwrap();
        assert_eq!(token, "stored-token");
    }
}
