//! Stdio transport: spawns an MCP server as a subprocess and speaks
//! line-delimited JSON-RPC over its stdin/stdout.

use crate::error::{McpError, McpResult};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::transport::Transport;
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

/// Stdio transport configuration.
#[derive(Debug, Clone, Default)]
pub struct StdioConfig {
    /// Command to spawn.
    pub command: String,
    /// Command arguments.
    pub args: Vec<String>,
    /// Extra environment variables for the child process.
    pub env: HashMap<String, String>,
}

impl StdioConfig {
    /// Create a config for `command` with `args`.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: HashMap::new(),
        }
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Channel to a spawned server process.
struct StdioChannel {
    child: Child,
    stdin: tokio::process::ChildStdin,
    stdout: BufReader<tokio::process::ChildStdout>,
}

/// Transport over a subprocess's stdio.
pub struct StdioTransport {
    config: StdioConfig,
    channel: Mutex<Option<StdioChannel>>,
    connected: AtomicBool,
}

impl StdioTransport {
    /// Create a new stdio transport. The process is spawned on `connect()`.
    pub fn new(config: StdioConfig) -> Self {
        Self {
            config,
            channel: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    async fn spawn(&self) -> McpResult<StdioChannel> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .envs(&self.config.env);

        debug!(command = %self.config.command, args = ?self.config.args, "Starting MCP server process");

        let mut child = cmd
            .spawn()
            .map_err(|e| McpError::ProcessError(format!("Failed to start server: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::ProcessError("Failed to get stdin".to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::ProcessError("Failed to get stdout".to_string()))?;

        Ok(StdioChannel {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    /// Send one line-delimited JSON message.
    async fn send_message(channel: &mut StdioChannel, content: &str) -> McpResult<()> {
        trace!(message = %content, "Sending stdio message");
        channel.stdin.write_all(content.as_bytes()).await?;
        channel.stdin.write_all(b"\n").await?;
        channel.stdin.flush().await?;
        Ok(())
    }

    /// Read messages until a JSON-RPC response arrives. Server-initiated
    /// notifications on stdout are skipped.
    async fn read_response(channel: &mut StdioChannel) -> McpResult<JsonRpcResponse> {
        loop {
            let mut line = String::new();
            let bytes = channel.stdout.read_line(&mut line).await?;
            if bytes == 0 {
                return Err(McpError::connection_failed("Server closed connection"));
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            trace!(message = %line, "Received stdio message");

            if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(line) {
                return Ok(response);
            }

            debug!("Skipping non-response stdio message");
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&self) -> McpResult<()> {
        let mut guard = self.channel.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let channel = self.spawn().await?;
        *guard = Some(channel);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> McpResult<()> {
        let mut guard = self.channel.lock().await;
        let Some(mut channel) = guard.take() else {
            return Ok(());
        };
        self.connected.store(false, Ordering::SeqCst);

        // Closing stdin signals the server to exit; give it a moment before
        // killing.
        drop(channel.stdin);
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Err(e) = channel.child.kill().await {
            // The process may already be gone, or teardown may race another
            // task's cleanup. Neither is a real failure.
            warn!(error = %e, "Error killing MCP server process during disconnect");
        }

        debug!("Closed stdio transport");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        let mut guard = self.channel.lock().await;
        let channel = guard.as_mut().ok_or(McpError::NotConnected)?;

        debug!(id = ?request.id, method = %request.method, "Sending stdio request");

        Self::send_message(channel, &serde_json::to_string(&request)?).await?;
        Self::read_response(channel).await
    }

    async fn notify(&self, notification: JsonRpcNotification) -> McpResult<()> {
        let mut guard = self.channel.lock().await;
        let channel = guard.as_mut().ok_or(McpError::NotConnected)?;

        debug!(method = %notification.method, "Sending stdio notification");

        Self::send_message(channel, &serde_json::to_string(&notification)?).await
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.channel.try_lock() {
            if let Some(ref mut channel) = *guard {
                let _ = channel.child.start_kill();
            }
        }
    }
}
