//! Cached per-server MCP connections.
//!
//! A connection is lazy: nothing is spawned or dialed until the first
//! request needs the server's tools. The handshake plus tool listing runs
//! at most once per process thanks to a single-flight guard; concurrent
//! first users share the same round trip, and a failure leaves the cell
//! empty so a later request can retry.

use std::collections::HashMap;
use std::sync::Arc;

use rust_mcp_schema::schema_utils::RequestFromClient;
use rust_mcp_schema::CallToolRequestParams;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::core::config::McpServerConfig;
use crate::core::error::GatewayError;
use crate::mcp::protocol::{parse_call_tool, parse_list_tools};
use crate::mcp::transport::{self, McpTransport};
use crate::tools::{ObjectHandler, Tool, ToolSet};

struct Session {
    tools: ToolSet,
}

pub struct McpConnection {
    server_id: String,
    config: McpServerConfig,
    session: OnceCell<Session>,
    #[cfg(test)]
    injected_transport: std::sync::Mutex<Option<Arc<dyn McpTransport>>>,
}

impl McpConnection {
    pub fn new(server_id: &str, config: McpServerConfig) -> Self {
        Self {
            server_id: server_id.to_string(),
            config,
            session: OnceCell::new(),
            #[cfg(test)]
            injected_transport: std::sync::Mutex::new(None),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Returns the server's tools, connecting and listing on first use and
    /// serving the cached set thereafter. Concurrent callers share one
    /// underlying handshake.
    pub async fn tool_set(&self) -> Result<ToolSet, GatewayError> {
        let session = self
            .session
            .get_or_try_init(|| self.establish())
            .await
            .map_err(|err| {
                GatewayError::Transport(format!("MCP server '{}': {}", self.server_id, err))
            })?;
        Ok(session.tools.clone())
    }

    async fn establish(&self) -> Result<Session, String> {
        let transport = self.open_transport().await?;
        let details = transport.initialize(&self.config).await?;
        debug!(
            server_id = %self.server_id,
            server = %details.server_info.name,
            "MCP handshake complete"
        );

        let response = transport
            .request(RequestFromClient::ListToolsRequest(None))
            .await?;
        let list = parse_list_tools(response)?;
        debug!(server_id = %self.server_id, tools = list.tools.len(), "Listed MCP tools");

        let mut tools = ToolSet::default();
        for descriptor in &list.tools {
            let schema =
                serde_json::to_value(&descriptor.input_schema).map_err(|err| err.to_string())?;
            let description = descriptor.description.clone().unwrap_or_default();
            tools.insert(Arc::new(Tool::remote(
                &descriptor.name,
                &description,
                schema,
                remote_handler(transport.clone(), descriptor.name.clone()),
            )));
        }

        Ok(Session { tools })
    }

    async fn open_transport(&self) -> Result<Arc<dyn McpTransport>, String> {
        #[cfg(test)]
        if let Some(injected) = self.injected_transport.lock().unwrap().clone() {
            return Ok(injected);
        }
        let transport = transport::connect(&self.server_id, &self.config).await?;
        Ok(Arc::from(transport))
    }

    #[cfg(test)]
    pub fn inject_transport(&self, transport: Arc<dyn McpTransport>) {
        *self.injected_transport.lock().unwrap() = Some(transport);
    }
}

/// Wraps one remote tool as a pass-through executor. Arguments go over the
/// wire untouched and the remote result comes back unmodified; remote
/// failures surface as the tool's answer, not a stream error, unless the
/// transport itself fails.
fn remote_handler(transport: Arc<dyn McpTransport>, tool_name: String) -> ObjectHandler {
    Arc::new(move |arguments| {
        let transport = transport.clone();
        let tool_name = tool_name.clone();
        Box::pin(async move {
            let mut params = CallToolRequestParams::new(&tool_name);
            if !arguments.is_empty() {
                params = params.with_arguments(arguments);
            }
            let response = transport
                .request(RequestFromClient::CallToolRequest(params))
                .await?;
            let result = parse_call_tool(response)?;
            serde_json::to_value(&result).map_err(|err| err.to_string())
        })
    })
}

/// Process-lifetime pool of connections, one per configured server id.
#[derive(Default, Clone)]
pub struct McpPool {
    connections: HashMap<String, Arc<McpConnection>>,
}

impl McpPool {
    pub fn from_config(servers: &HashMap<String, McpServerConfig>) -> Self {
        let connections = servers
            .iter()
            .map(|(id, config)| {
                (
                    id.clone(),
                    Arc::new(McpConnection::new(id, config.clone())),
                )
            })
            .collect();
        Self { connections }
    }

    pub fn get(&self, server_id: &str) -> Option<Arc<McpConnection>> {
        self.connections.get(server_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_mcp_schema::schema_utils::ServerMessage;
    use rust_mcp_schema::InitializeResult;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingTransport {
        handshakes: AtomicUsize,
        calls: AtomicUsize,
    }

    impl CountingTransport {
        fn new() -> Self {
            Self {
                handshakes: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl McpTransport for CountingTransport {
        async fn initialize(&self, _config: &McpServerConfig) -> Result<InitializeResult, String> {
            self.handshakes.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            let result = serde_json::from_value(json!({
                "capabilities": {},
                "protocolVersion": "2025-11-25",
                "serverInfo": {"name": "counting", "version": "1.0.0"}
            }))
            .unwrap();
            Ok(result)
        }

        async fn request(&self, request: RequestFromClient) -> Result<ServerMessage, String> {
            let body = match request {
                RequestFromClient::ListToolsRequest(_) => json!({
                    "jsonrpc": "2.0",
                    "id": 0,
                    "result": {
                        "tools": [{
                            "name": "lookup",
                            "description": "Looks things up",
                            "inputSchema": {"type": "object", "properties": {"q": {"type": "string"}}}
                        }]
                    }
                }),
                _ => {
                    self.calls.fetch_add(1, Ordering::SeqCst);
                    json!({
                        "jsonrpc": "2.0",
                        "id": 1,
                        "result": {
                            "content": [{"type": "text", "text": "remote answer"}]
                        }
                    })
                }
            };
            Ok(serde_json::from_value(body).unwrap())
        }
    }

    fn connection_with(transport: Arc<CountingTransport>) -> McpConnection {
        let connection = McpConnection::new("alpha", McpServerConfig::default());
        connection.inject_transport(transport);
        connection
    }

    #[tokio::test]
    async fn concurrent_first_use_shares_one_handshake() {
        let transport = Arc::new(CountingTransport::new());
        let connection = connection_with(transport.clone());

        let (first, second) = tokio::join!(connection.tool_set(), connection.tool_set());
        assert!(first.is_ok());
        assert!(second.is_ok());
        assert_eq!(transport.handshakes.load(Ordering::SeqCst), 1);

        // A later call reuses the cache without another handshake.
        connection.tool_set().await.unwrap();
        assert_eq!(transport.handshakes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn remote_tools_forward_calls_over_the_transport() {
        let transport = Arc::new(CountingTransport::new());
        let connection = connection_with(transport.clone());

        let tools = connection.tool_set().await.unwrap();
        let tool = tools.get("lookup").unwrap();

        let mut arguments = serde_json::Map::new();
        arguments.insert("q".to_string(), json!("foo"));
        let result = tool.execute(&arguments).await.unwrap();

        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result["content"][0]["text"], json!("remote answer"));
    }

    #[tokio::test]
    async fn pool_returns_connections_by_server_id() {
        let mut servers = HashMap::new();
        servers.insert("alpha".to_string(), McpServerConfig::default());
        let pool = McpPool::from_config(&servers);

        assert!(pool.get("alpha").is_some());
        assert!(pool.get("beta").is_none());
    }
}
