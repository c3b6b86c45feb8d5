//! Model Context Protocol (MCP) client for strata.
//!
//! Connects to remote tool servers over one of several wire transports and
//! multiplexes tool discovery and invocation through a single session.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────┐
//! │   caller    │────▶│  McpClient   │────▶│ MCP servers │
//! │             │◀────│  (transport) │◀────│   (tools)   │
//! └─────────────┘     └──────────────┘     └─────────────┘
//! ```
//!
//! # Supported Transports
//!
//! - **stdio**: local servers spawned as a subprocess
//! - **HTTP/SSE**: remote servers via streaming HTTP or Server-Sent Events
//! - **OAuth**: interactive browser authentication for remote servers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use strata_mcp::{HttpConfig, HttpTransport, McpClient};
//!
//! # async fn example() -> strata_mcp::McpResult<()> {
//! let transport = Arc::new(HttpTransport::new(HttpConfig::new(
//!     "https://mcp.example.com/mcp",
//! ))?);
//!
//! let client = McpClient::new(transport);
//! client.connect().await?;
//!
//! let tools = client.list_tools(true).await?;
//! let result = client
//!     .call_tool("search", serde_json::json!({ "query": "rust" }))
//!     .await?;
//!
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! A single `McpClient`/transport pair is driven by one logical caller;
//! concurrent multi-caller use needs an external lock. The one piece of
//! real parallelism is the OAuth [`CallbackServer`], which accepts the
//! browser redirect on its own task while the caller awaits the result.

pub mod callback;
mod client;
mod error;
pub mod http;
pub mod oauth;
pub mod protocol;
pub mod stdio;
pub mod token_store;
mod transport;

pub use callback::{CallbackServer, CALLBACK_PORT};
pub use client::McpClient;
pub use error::{McpError, McpResult};
pub use http::{AuthMode, HttpConfig, HttpTransport};
pub use oauth::{OAuthConfig, OAuthProvider, AUTH_TIMEOUT};
pub use protocol::{ToolCallResult, ToolContent, ToolDescriptor};
pub use stdio::{StdioConfig, StdioTransport};
pub use token_store::{ClientRegistration, TokenRecord, TokenStore};
pub use transport::Transport;
