use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use mesh_node::{HttpGateway, Node, NodeConfig};

/// Sudoku mesh node.
#[derive(Parser, Debug)]
#[command(name = "mesh-node", version, about = "Join or start a Sudoku brute-force mesh")]
struct Cli {
    /// HTTP port to listen on.
    #[arg(short = 'p', long)]
    http_port: Option<u16>,

    /// P2P port to listen on.
    #[arg(short = 's', long)]
    p2p_port: Option<u16>,

    /// Mesh member (host:port) to join.
    #[arg(short = 'a', long)]
    anchor: Option<String>,

    /// Validator handicap in milliseconds.
    #[arg(short = 'd', long)]
    handicap: Option<u64>,

    /// Host to bind and advertise.
    #[arg(long)]
    host: Option<String>,

    /// Path to a TOML config file.
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Log level (overridden by RUST_LOG).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut NodeConfig) {
        if let Some(port) = self.http_port {
            config.node.http_port = port;
        }
        if let Some(port) = self.p2p_port {
            config.node.p2p_port = port;
        }
        if let Some(anchor) = self.anchor {
            config.node.anchor = Some(anchor);
        }
        if let Some(handicap) = self.handicap {
            config.node.handicap_ms = handicap;
        }
        if let Some(host) = self.host {
            config.node.host = host;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = NodeConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    cli.apply(&mut config);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    let http_addr = config.http_bind_addr();
    let (node, handle) = Node::bind(config).await?;
    tracing::info!(address = %handle.self_address, http = %http_addr, "Starting mesh node");

    let gateway = HttpGateway::new(http_addr, handle);
    tokio::spawn(async move {
        if let Err(e) = gateway.run().await {
            tracing::error!(error = %e, "HTTP gateway stopped");
        }
    });

    node.run().await
}
