//! MCP client façade.
//!
//! Wraps one [`Transport`] in a connect/disconnect lifecycle, runs the
//! initialize handshake, and multiplexes tool discovery and invocation
//! through the resulting session.

use crate::error::{McpError, McpResult};
use crate::protocol::{
    CallToolParams, InitializeParams, InitializeResult, JsonRpcNotification, JsonRpcRequest,
    ListToolsResult, ToolCallResult, ToolContent, ToolDescriptor,
};
use crate::transport::Transport;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// MCP client for a single server connection.
///
/// Operations are expected to be invoked sequentially by one logical
/// caller; a single instance is not guaranteed safe for concurrent
/// multi-caller use without an external lock. Callers should `disconnect()`
/// before dropping the client; transports do best-effort cleanup in `Drop`
/// but cannot run async teardown there.
pub struct McpClient {
    transport: Arc<dyn Transport>,
    /// Request ID counter.
    next_id: AtomicU64,
    /// Whether the initialize handshake completed on the current connection.
    session_open: AtomicBool,
    /// Capabilities advertised by the server during initialization.
    server_info: RwLock<Option<InitializeResult>>,
    /// Pure cache of the last tool listing; safe to drop and rebuild.
    tools_cache: RwLock<Option<Vec<ToolDescriptor>>>,
}

impl McpClient {
    /// Create a client over `transport`. No I/O happens until `connect()`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
            session_open: AtomicBool::new(false),
            server_info: RwLock::new(None),
            tools_cache: RwLock::new(None),
        }
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Check if the transport is connected and the session is initialized.
    pub fn is_connected(&self) -> bool {
        self.session_open.load(Ordering::SeqCst) && self.transport.is_connected()
    }

    /// Connect the transport and run the initialize handshake.
    ///
    /// A no-op when already connected. If the handshake fails, the
    /// transport is torn back down before the error propagates, so a
    /// subsequent `connect()` starts clean.
    pub async fn connect(&self) -> McpResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        self.transport.connect().await?;

        match self.initialize().await {
            Ok(init_result) => {
                debug!(
                    protocol_version = %init_result.protocol_version,
                    server_name = %init_result.server_info.name,
                    "MCP server initialized"
                );
                *self.server_info.write().await = Some(init_result);
                self.session_open.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                // No zombie state: release whatever the transport acquired.
                if let Err(close_err) = self.transport.disconnect().await {
                    debug!(error = %close_err, "Error closing transport after failed handshake");
                }
                Err(e)
            }
        }
    }

    async fn initialize(&self) -> McpResult<InitializeResult> {
        let init_params = InitializeParams::default();
        let request = JsonRpcRequest::new(
            self.next_request_id(),
            "initialize",
            Some(serde_json::to_value(&init_params)?),
        );

        let response = self.transport.request(request).await?;

        if let Some(error) = response.error {
            return Err(McpError::InitializationFailed(error.message));
        }

        let init_result: InitializeResult = serde_json::from_value(
            response
                .result
                .ok_or_else(|| McpError::protocol_error("Missing initialize result"))?,
        )
        .map_err(|e| McpError::protocol_error(e.to_string()))?;

        let notification = JsonRpcNotification::new("notifications/initialized", None);
        self.transport.notify(notification).await?;

        Ok(init_result)
    }

    /// Disconnect the transport. A no-op when not connected.
    ///
    /// The tool cache is dropped; a reconnect starts with a fresh listing.
    pub async fn disconnect(&self) -> McpResult<()> {
        self.session_open.store(false, Ordering::SeqCst);
        *self.server_info.write().await = None;
        *self.tools_cache.write().await = None;
        self.transport.disconnect().await?;
        info!("Disconnected from MCP server");
        Ok(())
    }

    /// Server capabilities from the initialize handshake, while connected.
    pub async fn server_info(&self) -> Option<InitializeResult> {
        self.server_info.read().await.clone()
    }

    /// List the tools the server advertises.
    ///
    /// With `use_cache` the previous listing is returned unchanged when
    /// present, without a remote call; schema changes on the server stay
    /// invisible until a forced refresh or a reconnect.
    pub async fn list_tools(&self, use_cache: bool) -> McpResult<Vec<ToolDescriptor>> {
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }

        if use_cache {
            if let Some(ref cached) = *self.tools_cache.read().await {
                return Ok(cached.clone());
            }
        }

        let request = JsonRpcRequest::new(self.next_request_id(), "tools/list", None);
        let response = self.transport.request(request).await?;

        if let Some(error) = response.error {
            return Err(McpError::protocol_error(error.message));
        }

        let result: ListToolsResult = serde_json::from_value(
            response
                .result
                .ok_or_else(|| McpError::protocol_error("Missing tools/list result"))?,
        )
        .map_err(|e| McpError::protocol_error(e.to_string()))?;

        let tools: Vec<ToolDescriptor> = result
            .tools
            .into_iter()
            .map(ToolDescriptor::normalized)
            .collect();

        info!(tool_count = tools.len(), "Discovered MCP tools");

        *self.tools_cache.write().await = Some(tools.clone());
        Ok(tools)
    }

    /// Call a tool by name with the given arguments.
    ///
    /// If the remote flags the invocation as failed, the error carries the
    /// tool's error content; otherwise the result's content blocks are
    /// returned unchanged.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<Vec<ToolContent>> {
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }

        debug!(tool = name, "Calling MCP tool");

        let params = CallToolParams {
            name: name.to_string(),
            arguments: Some(arguments),
        };

        let request = JsonRpcRequest::new(
            self.next_request_id(),
            "tools/call",
            Some(serde_json::to_value(&params)?),
        );

        let response = self.transport.request(request).await?;

        if let Some(error) = response.error {
            return Err(McpError::tool_error(error.message));
        }

        let result: ToolCallResult = serde_json::from_value(
            response
                .result
                .ok_or_else(|| McpError::protocol_error("Missing tools/call result"))?,
        )
        .map_err(|e| McpError::protocol_error(e.to_string()))?;

        if result.is_error {
            return Err(McpError::tool_error(flatten_error_content(&result.content)));
        }

        Ok(result.content)
    }

    /// Look up a single tool's descriptor by name, respecting the cache.
    pub async fn get_tool_schema(&self, name: &str) -> McpResult<Option<ToolDescriptor>> {
        let tools = self.list_tools(true).await?;
        Ok(tools.into_iter().find(|tool| tool.name == name))
    }
}

/// Render a failed tool call's content blocks into an error message.
fn flatten_error_content(content: &[ToolContent]) -> String {
    let texts: Vec<&str> = content
        .iter()
        .filter_map(|block| match block {
            ToolContent::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();

    if texts.is_empty() {
        serde_json::to_string(content).unwrap_or_else(|_| "Unknown tool error".to_string())
    } else {
        texts.join("\n")
    }
}
