//! Shared MCP transport abstractions.
//!
//! Implementations normalize protocol differences across stdio and
//! streamable HTTP so the connection layer can treat both as a live
//! request/response channel.

use async_trait::async_trait;
use rust_mcp_schema::schema_utils::{RequestFromClient, ServerMessage};
use rust_mcp_schema::InitializeResult;

use crate::core::config::McpServerConfig;

pub mod http;
pub mod stdio;

/// Supported MCP transport backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpTransportKind {
    StreamableHttp,
    Stdio,
}

impl McpTransportKind {
    /// Resolves transport type from config, defaulting to streamable HTTP.
    pub fn from_config(config: &McpServerConfig) -> Result<Self, String> {
        let transport = config
            .transport
            .as_deref()
            .unwrap_or("streamable-http")
            .to_ascii_lowercase();
        match transport.as_str() {
            "streamable-http" | "streamable_http" | "http" => Ok(McpTransportKind::StreamableHttp),
            "stdio" => Ok(McpTransportKind::Stdio),
            other => Err(format!("Unsupported MCP transport: {}", other)),
        }
    }
}

/// Transport contract required by the connection layer: perform the
/// handshake once, then exchange JSON-RPC requests for responses.
#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn initialize(&self, config: &McpServerConfig) -> Result<InitializeResult, String>;

    async fn request(&self, request: RequestFromClient) -> Result<ServerMessage, String>;
}

/// Opens the transport a config describes. Spawning the stdio subprocess
/// or building the HTTP client happens here; the protocol handshake is the
/// caller's next step.
pub async fn connect(
    server_id: &str,
    config: &McpServerConfig,
) -> Result<Box<dyn McpTransport>, String> {
    match McpTransportKind::from_config(config)? {
        McpTransportKind::Stdio => {
            let transport = stdio::StdioTransport::spawn(server_id, config).await?;
            Ok(Box::new(transport))
        }
        McpTransportKind::StreamableHttp => {
            let transport = http::StreamableHttpTransport::new(server_id, config)?;
            Ok(Box::new(transport))
        }
    }
}
