//! MCP transport contract.
//!
//! A transport owns the lifecycle of one logical connection:
//! `disconnected -> connecting -> connected -> disconnected`. There is no
//! reconnecting state; a dropped connection is torn down fully and a fresh
//! `connect()` issued.

use crate::error::McpResult;
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;

/// Transport trait for MCP communication.
///
/// Concrete transports differ only in how they obtain their read/write
/// channel: a subprocess's stdio ([`StdioTransport`](crate::StdioTransport))
/// or a streaming HTTP/SSE connection
/// ([`HttpTransport`](crate::HttpTransport)).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Acquire the transport's resources. No-op when already connected.
    ///
    /// On failure everything partially acquired is released before the
    /// error propagates, so a subsequent `connect()` starts clean.
    async fn connect(&self) -> McpResult<()>;

    /// Release the transport's resources. No-op when not connected.
    async fn disconnect(&self) -> McpResult<()>;

    /// Check if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Send a request and wait for a response.
    ///
    /// Fails with [`McpError::NotConnected`](crate::McpError::NotConnected)
    /// while disconnected, without attempting any I/O.
    async fn request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse>;

    /// Send a notification (no response expected).
    async fn notify(&self, notification: JsonRpcNotification) -> McpResult<()>;
}
