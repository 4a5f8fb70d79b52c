//! Pool Syncer
//!
//! Follows the chain through a chain-sync session and keeps a reorg-consistent
//! record of AMM pool states in PostgreSQL, with Redis resume state.

use anyhow::Result;
use clap::Parser;
use pool_syncer::config::SyncerConfig;
use pool_syncer::infrastructure::ServiceContainer;
use std::path::PathBuf;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "pool-syncer")]
#[command(about = "Chain-sync indexer for AMM pool state")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "syncer.toml")]
    config: PathBuf,

    /// Override log level
    #[arg(long)]
    log_level: Option<String>,

    /// Dry run mode (validate config and exit)
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_found = cli.config.exists();
    let mut config = if config_found {
        SyncerConfig::from_file(&cli.config)?
    } else {
        SyncerConfig::default()
    };

    // Override log level if provided
    if let Some(log_level) = cli.log_level {
        config.monitoring.log_level = log_level;
    }

    // Initialize logging
    init_logging(&config)?;
    if !config_found {
        warn!("Config file not found, using defaults: {}", cli.config.display());
    }

    info!("Starting Pool Syncer");
    info!("Network: {}", config.network.environment);
    info!("Security parameter: {}", config.security_param());
    info!("Upstream: {}:{}", config.upstream.host, config.upstream.port);

    // Validate configuration
    config.validate()?;
    info!("Configuration validated successfully");

    if cli.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        return Ok(());
    }

    info!("Initializing services...");
    let container = ServiceContainer::new(config).await?;
    container.health_check().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let driver = container.sync_driver(shutdown_rx);
    let mut driver_handle = tokio::spawn(driver.run());

    info!("Pool syncer started successfully. Press Ctrl+C to shutdown.");
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
            match (&mut driver_handle).await {
                Ok(Ok(_)) => info!("Sync driver finished"),
                Ok(Err(e)) => error!("Sync driver error: {}", e),
                Err(e) => error!("Sync driver task error: {}", e),
            }
        }
        result = &mut driver_handle => {
            match result {
                Ok(Ok(_)) => info!("Sync driver finished"),
                Ok(Err(e)) => {
                    error!("Sync driver stopped on fatal error: {}", e);
                    return Err(e.into());
                }
                Err(e) => error!("Sync driver task error: {}", e),
            }
        }
    }

    info!("Shutting down Pool Syncer");
    Ok(())
}

fn init_logging(config: &SyncerConfig) -> Result<()> {
    let log_level = config.monitoring.log_level.parse().unwrap_or(tracing::Level::INFO);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("pool_syncer={}", log_level).into());

    if config.monitoring.structured_logging {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()?;
    }

    Ok(())
}
