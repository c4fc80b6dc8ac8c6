//! Command-line entry point: argument parsing, logging setup, config
//! loading, and server startup.

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::core::config::GatewayConfig;
use crate::core::gateway::Gateway;
use crate::server;
use crate::tools::ToolRegistry;

#[derive(Parser)]
#[command(name = "toolgate")]
#[command(about = "An OpenAI-compatible gateway with streaming tool-call orchestration")]
#[command(
    long_about = "Toolgate exposes a single OpenAI-compatible chat-completions endpoint and \
routes requests to configured LLM providers, letting models call local and \
MCP-bridged tools mid-stream.\n\n\
Configuration lives in a TOML file declaring providers, agents, and MCP \
servers; pass it with --config or place it in the platform config directory."
)]
struct Args {
    /// Path to the gateway config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the configured bind port.
    #[arg(long)]
    port: Option<u16>,
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = args
        .config
        .or_else(GatewayConfig::default_config_path)
        .ok_or("No config file given and no platform config directory available")?;
    let mut config = GatewayConfig::load_from_path(&config_path)?;

    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    // Local tools register here before startup; the registry rejects
    // duplicate names, so a bad tool set never serves a request.
    let registry = ToolRegistry::new();

    let gateway = Gateway::new(config, registry);
    actix_web::rt::System::new().block_on(server::serve(gateway))?;
    Ok(())
}
