//! Gateway configuration.
//!
//! One TOML file declares the HTTP server, the upstream providers, the
//! agents exposed through `/v1/models`, and the MCP servers agents may pull
//! tools from. Cross-references are checked at load time so a bad agent id
//! fails startup, not a request.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::core::error::GatewayError;

/// Default recursion budget for the tool-call loop, in provider rounds.
pub const DEFAULT_MAX_STEPS: usize = 10;

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_GOOGLE_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,
    #[serde(default)]
    pub mcp_servers: HashMap<String, McpServerConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Accepted API keys. Empty disables the check.
    #[serde(default)]
    pub api_keys: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_keys: Vec::new(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

/// Which provider family an upstream speaks.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "google")]
    Google,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
}

impl ProviderConfig {
    pub fn base_url(&self) -> String {
        if let Some(base) = &self.api_base {
            return base.clone();
        }
        match self.kind {
            ProviderKind::OpenAi => DEFAULT_OPENAI_BASE_URL.to_string(),
            ProviderKind::Anthropic => DEFAULT_ANTHROPIC_BASE_URL.to_string(),
            // Gemini exposes an OpenAI-compatible surface; the gateway
            // talks to that rather than the native API.
            ProviderKind::Google => DEFAULT_GOOGLE_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub provider: String,
    pub model: String,
    /// Display name surfaced through `/v1/models`.
    #[serde(default)]
    pub label: Option<String>,
    /// MCP servers whose tools merge into this agent's tool set.
    #[serde(default)]
    pub mcp_servers: Vec<String>,
    /// Extra model arguments merged verbatim into provider request bodies.
    #[serde(default)]
    pub model_args: Map<String, Value>,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

fn default_max_steps() -> usize {
    DEFAULT_MAX_STEPS
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct McpServerConfig {
    /// "streamable-http" (default) or "stdio".
    #[serde(default)]
    pub transport: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub protocol_version: Option<String>,
}

/// Errors that can occur when loading configuration from disk.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "Failed to read config at {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "Failed to parse config at {}: {}", path.display(), source)
            }
        }
    }
}

impl StdError for ConfigError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

impl GatewayConfig {
    pub fn load_from_path(config_path: &Path) -> Result<Self, Box<dyn StdError>> {
        let contents = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
            path: config_path.to_path_buf(),
            source,
        })?;
        let config: GatewayConfig =
            toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: config_path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "toolgate")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Cross-reference check: every agent must name a configured provider
    /// and only configured MCP servers.
    pub fn validate(&self) -> Result<(), GatewayError> {
        for (agent_id, agent) in &self.agents {
            if !self.providers.contains_key(&agent.provider) {
                return Err(GatewayError::Configuration(format!(
                    "Agent '{}' references unknown provider '{}'",
                    agent_id, agent.provider
                )));
            }
            for server_id in &agent.mcp_servers {
                if !self.mcp_servers.contains_key(server_id) {
                    return Err(GatewayError::Configuration(format!(
                        "Agent '{}' references unknown MCP server '{}'",
                        agent_id, server_id
                    )));
                }
            }
        }
        Ok(())
    }
}
