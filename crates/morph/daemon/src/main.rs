//! morphd: the Morph routing daemon
//!
//! Polls worker capability configs into the registry and serves
//! synchronous transform requests over REST.

use anyhow::Context;
use clap::Parser;
use morph_daemon::{DaemonConfig, DaemonError, Server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Morph Daemon CLI
#[derive(Parser)]
#[command(name = "morphd")]
#[command(about = "Morph Daemon - transform routing service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "MORPH_CONFIG")]
    config: Option<String>,

    /// Listen address, overriding the config file
    #[arg(short, long, env = "MORPH_LISTEN_ADDR")]
    listen: Option<String>,

    /// Worker base URL to poll; repeatable
    #[arg(short, long = "worker", env = "MORPH_WORKER_URLS", value_delimiter = ',')]
    workers: Vec<String>,

    /// Log level
    #[arg(long, env = "MORPH_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "MORPH_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))
        .context("loading configuration")?;

    // Override with CLI args
    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen
            .parse()
            .map_err(|e| DaemonError::Config(format!("Invalid listen address: {}", e)))?;
    }
    if !cli.workers.is_empty() {
        config.registry.worker_urls = cli.workers.clone();
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.server.listen_addr,
        role = ?config.registry.role,
        "Starting morphd"
    );

    let server = Server::new(config).context("assembling server")?;
    server.run().await.context("serving")?;
    Ok(())
}
