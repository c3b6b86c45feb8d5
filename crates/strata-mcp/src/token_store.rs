//! File-based OAuth token storage, scoped per server identity.
//!
//! Tokens live at `<base>/.tokens/<server>/tokens.json`. The record is
//! loaded lazily on first access and then served from memory for the rest
//! of the process; the file is not re-read if another process refreshes it.

use crate::error::McpResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Persisted OAuth tokens for one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Unix timestamp when the access token expires.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// OAuth client descriptor from registration or configuration.
///
/// Held in memory only; never written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRegistration {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: String,
}

#[derive(Default)]
struct StoreState {
    tokens: Option<TokenRecord>,
    tokens_loaded: bool,
    client_info: Option<ClientRegistration>,
}

/// Token storage for one named server.
pub struct TokenStore {
    server_name: String,
    base_dir: PathBuf,
    state: Mutex<StoreState>,
}

impl TokenStore {
    /// Create a store for `server_name`, rooted in the current directory.
    pub fn new(server_name: impl Into<String>) -> Self {
        Self::with_base_dir(server_name, ".")
    }

    /// Create a store rooted at a specific directory (useful for testing).
    pub fn with_base_dir(server_name: impl Into<String>, base_dir: impl AsRef<Path>) -> Self {
        Self {
            server_name: server_name.into(),
            base_dir: base_dir.as_ref().to_path_buf(),
            state: Mutex::new(StoreState::default()),
        }
    }

    /// The server identity this store is scoped to.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Path of the token file for this server.
    pub fn token_path(&self) -> PathBuf {
        self.base_dir
            .join(".tokens")
            .join(&self.server_name)
            .join("tokens.json")
    }

    /// Get the stored tokens, reading them from disk on first access.
    ///
    /// A missing or malformed token file is treated as "no tokens".
    pub fn get_tokens(&self) -> Option<TokenRecord> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.tokens_loaded {
            state.tokens = self.read_from_disk();
            state.tokens_loaded = true;
        }
        state.tokens.clone()
    }

    /// Store tokens in memory and persist them to disk.
    ///
    /// Writes are serialized by the store's lock so two calls cannot
    /// interleave partial writes.
    pub fn set_tokens(&self, record: TokenRecord) -> McpResult<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let path = self.token_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let data = serde_json::to_string_pretty(&record)?;
        std::fs::write(&path, &data)?;

        // Tokens are secrets; keep the file private on unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }

        info!(server = %self.server_name, path = %path.display(), "Saved OAuth tokens");

        state.tokens = Some(record);
        state.tokens_loaded = true;
        Ok(())
    }

    /// Get the registered OAuth client descriptor, if any.
    pub fn get_client_info(&self) -> Option<ClientRegistration> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.client_info.clone()
    }

    /// Store the registered OAuth client descriptor (memory only).
    pub fn set_client_info(&self, info: ClientRegistration) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.client_info = Some(info);
        debug!(server = %self.server_name, "Saved OAuth client registration");
    }

    fn read_from_disk(&self) -> Option<TokenRecord> {
        let path = self.token_path();
        let data = match std::fs::read_to_string(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(server = %self.server_name, path = %path.display(), "Token file not found");
                return None;
            }
            Err(e) => {
                warn!(
                    server = %self.server_name,
                    path = %path.display(),
                    error = %e,
                    "Token file read failed"
                );
                return None;
            }
        };

        match serde_json::from_str(&data) {
            Ok(record) => {
                debug!(server = %self.server_name, "OAuth tokens loaded");
                Some(record)
            }
            Err(e) => {
                warn!(
                    server = %self.server_name,
                    path = %path.display(),
                    error = %e,
                    "Token file parse failed"
                );
                None
            }
        }
    }
}
