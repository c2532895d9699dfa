//! relay-gateway
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌───────────────────────────────────────────────┐
//!                        │                 RELAY GATEWAY                 │
//!   ?targetUrl=...       │  ┌──────────┐   ┌──────────┐   ┌───────────┐  │
//!   ─────────────────────┼─▶│  proxy   │──▶│ deadline │──▶│ upstream  │──┼──▶ Target
//!   (port 3001)          │  │ forward  │   │  guard   │   │  client   │  │
//!                        │  └──────────┘   └──────────┘   └───────────┘  │
//!                        │                                               │
//!   POST/GET/DELETE /mcp │  ┌──────────┐   ┌──────────┐   ┌───────────┐  │
//!   ─────────────────────┼─▶│ session  │──▶│ registry │──▶│  handler  │  │
//!   (port 3000)          │  │  router  │   │          │◀──│ transport │  │
//!                        │  └──────────┘   └──────────┘   └───────────┘  │
//!                        │                                               │
//!                        │  config · observability · lifecycle           │
//!                        └───────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;

use relay_gateway::config::load_config;
use relay_gateway::lifecycle::{launch, signals, Shutdown};
use relay_gateway::observability::{logging, metrics};
use relay_gateway::session::minimal;

#[derive(Parser, Debug)]
#[command(name = "relay-gateway", version, about = "Streaming forwarding proxy and session router")]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Loading validates; every problem is reported at once.
    let config = load_config(cli.config.as_deref())?;
    if cli.check {
        println!("configuration OK");
        return Ok(());
    }

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "relay-gateway starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let factory = minimal::factory(config.sessions.server_name.clone());
    let running = launch(config, factory, &shutdown).await?;

    let signal = signals::wait_for_signal().await?;
    tracing::info!(signal = signal.as_str(), "Shutdown signal received");
    shutdown.trigger();
    running.wait().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
