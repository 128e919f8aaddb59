//! Pixlie engine server binary.
//!
//! Usage:
//!   pixlie-engine
//!   pixlie-engine --config engine.json
//!   pixlie-engine --port 8080 --bind 0.0.0.0
//!   pixlie-engine --data ~/.pixlie/hn.db
//!
//! # Environment Variables
//!
//! - `RUST_LOG` - log filter (default: info,pixlie_engine=debug,tower_http=debug)
//! - `ANTHROPIC_API_KEY` / `OPENAI_API_KEY` - provider keys not set in the config file

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pixlie_engine::storage::ConfigService;
use pixlie_engine::{build_coordinator, AppState, ConfigOverrides};

#[derive(Parser)]
#[command(name = "pixlie-engine")]
#[command(about = "LLM-driven analysis engine over the Pixlie dataset", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.pixlie/engine.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Dataset database path
    #[arg(short, long)]
    data: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pixlie_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let service = match cli.config {
        Some(path) => ConfigService::with_path(path),
        None => ConfigService::new(),
    }
    .context("failed to load config")?;
    info!(path = %service.path().display(), "config loaded");

    let mut config = service.into_config();
    config.apply_overrides(ConfigOverrides {
        bind: cli.bind,
        port: cli.port,
        data: cli.data,
    });
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.server.bind, config.server.port))?;

    let coordinator = build_coordinator(&config).context("failed to start engine")?;
    let state = AppState::new(coordinator.clone());

    pixlie_engine::api::serve(state, addr, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
    })
    .await?;

    coordinator.shutdown().await;
    info!("engine stopped");
    Ok(())
}
