//! Agent resolution and request wiring.
//!
//! The gateway owns the static configuration, the local tool registry, and
//! the MCP connection pool. Per request it resolves the `model` field to an
//! agent, assembles that agent's tool set (cheap; the MCP connections
//! underneath are cached), and hands everything to the tool-call loop.

use serde_json::Value;
use tracing::debug;

use crate::api::ChatMessage;
use crate::core::config::{AgentConfig, GatewayConfig, ProviderConfig, ProviderKind};
use crate::core::error::GatewayError;
use crate::core::event::EventStream;
use crate::core::tool_loop::{spawn_tool_loop, ToolLoopParams};
use crate::mcp::McpPool;
use crate::provider::{AnthropicAdapter, OpenAiAdapter, ProviderAdapter};
use crate::tools::{ToolRegistry, ToolSet};

pub struct Gateway {
    config: GatewayConfig,
    registry: ToolRegistry,
    mcp: McpPool,
    http: reqwest::Client,
}

impl Gateway {
    pub fn new(config: GatewayConfig, registry: ToolRegistry) -> Self {
        let mcp = McpPool::from_config(&config.mcp_servers);
        Self {
            config,
            registry,
            mcp,
            http: reqwest::Client::new(),
        }
    }

    pub fn server_config(&self) -> &crate::core::config::ServerConfig {
        &self.config.server
    }

    /// Agent ids and configs, sorted for stable listings.
    pub fn agents(&self) -> Vec<(&String, &AgentConfig)> {
        let mut agents: Vec<_> = self.config.agents.iter().collect();
        agents.sort_by_key(|(id, _)| id.as_str());
        agents
    }

    pub fn agent(&self, agent_id: &str) -> Result<&AgentConfig, GatewayError> {
        self.config.agents.get(agent_id).ok_or_else(|| {
            GatewayError::Configuration(format!("Agent '{}' not found", agent_id))
        })
    }

    fn provider(&self, provider_id: &str) -> Result<&ProviderConfig, GatewayError> {
        self.config.providers.get(provider_id).ok_or_else(|| {
            GatewayError::Configuration(format!("Provider '{}' not found", provider_id))
        })
    }

    /// The adapter family is fixed per agent at resolution time; `google`
    /// speaks through its OpenAI-compatible surface.
    fn adapter_for(&self, provider: &ProviderConfig) -> ProviderAdapter {
        let base_url = provider.base_url();
        let api_key = provider.api_key.clone().unwrap_or_default();
        match provider.kind {
            ProviderKind::OpenAi | ProviderKind::Google => {
                ProviderAdapter::OpenAi(OpenAiAdapter::new(self.http.clone(), base_url, api_key))
            }
            ProviderKind::Anthropic => ProviderAdapter::Anthropic(AnthropicAdapter::new(
                self.http.clone(),
                base_url,
                api_key,
            )),
        }
    }

    /// Local registry tools merged with every MCP server the agent names.
    /// A failed connect or listing fails the request that triggered it.
    async fn agent_tool_set(&self, agent: &AgentConfig) -> Result<ToolSet, GatewayError> {
        let mut tools = self.registry.tool_set();
        for server_id in &agent.mcp_servers {
            let connection = self.mcp.get(server_id).ok_or_else(|| {
                GatewayError::Configuration(format!("MCP server '{}' not found", server_id))
            })?;
            tools.merge(connection.tool_set().await?);
        }
        Ok(tools)
    }

    /// Entry point for one chat-completion request: resolves the agent and
    /// returns the canonical event stream driven by the tool-call loop.
    pub async fn chat_stream(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<EventStream, GatewayError> {
        let agent = self.agent(model)?;
        let provider = self.provider(&agent.provider)?;
        let tools = self.agent_tool_set(agent).await?;
        debug!(
            agent = %model,
            upstream_model = %agent.model,
            tools = tools.len(),
            "Starting chat stream"
        );

        let adapter = self.adapter_for(provider);
        Ok(spawn_tool_loop(ToolLoopParams {
            adapter,
            model: agent.model.clone(),
            messages,
            tools,
            extra_args: agent.model_args.clone(),
            max_steps: agent.max_steps,
        }))
    }
}

/// Convenience for `/v1/models`.
pub fn model_listing(gateway: &Gateway) -> Value {
    let data: Vec<Value> = gateway
        .agents()
        .iter()
        .map(|(id, agent)| {
            let mut entry = serde_json::json!({
                "id": id,
                "object": "model",
            });
            if let Some(label) = &agent.label {
                entry["label"] = Value::String(label.clone());
            }
            entry
        })
        .collect();
    serde_json::json!({
        "object": "list",
        "data": data,
    })
}
