use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use termbridge_core::{SessionRegistry, ValidationGate};
use tracing::info;
use tracing_subscriber::EnvFilter;

use termbridge_server::config::ServerConfig;
use termbridge_server::server::build_server;
use termbridge_server::transport::StdioTransport;

/// Expose configured commands and interactive command-line sessions as
/// MCP tools over stdio.
#[derive(Debug, Parser)]
#[command(name = "termbridge", version, about)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, env = "TERMBRIDGE_CONFIG")]
    config: PathBuf,

    /// Log filter, e.g. `info` or `termbridge_core=debug`.
    #[arg(long, env = "TERMBRIDGE_LOG", default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries the protocol; all diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = ServerConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    let gate: Arc<dyn ValidationGate> = Arc::new(config.build_gate()?);
    let registry = Arc::new(SessionRegistry::new(Arc::clone(&gate)));

    let server = build_server(&config, Arc::clone(&registry), gate)
        .await
        .context("registering tools")?;
    info!(
        commands = config.commands.len(),
        tools = server.tools().count().await,
        "termbridge starting on stdio"
    );

    server.serve(StdioTransport::new()).await?;

    // The client is gone; tear down whatever sessions are still alive.
    registry.close_all().await;
    Ok(())
}
