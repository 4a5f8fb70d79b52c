//! Service container for dependency injection

use crate::adapters::chain_sync::ReplayConnector;
use crate::adapters::storage::{PostgresStore, RedisFastStore};
use crate::config::SyncerConfig;
use crate::core::{ChainSyncConnector, DurableStore, FastStore, SyncError, SyncResult};
use crate::domain::decoder::PoolDecoder;
use crate::services::{ResumeManager, RetryPolicy, SyncDriver, SyncSettings};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Service container managing all dependencies
pub struct ServiceContainer {
    /// Configuration
    pub config: SyncerConfig,

    /// Source of truth for blocks and pool snapshots
    pub durable: Arc<dyn DurableStore>,

    /// Resume state cache
    pub fast: Arc<dyn FastStore>,

    /// Upstream chain-sync source
    pub connector: Arc<dyn ChainSyncConnector>,

    pub decoder: PoolDecoder,
}

impl ServiceContainer {
    /// Connect the production adapters described by `config`
    pub async fn new(config: SyncerConfig) -> SyncResult<Self> {
        info!("Initializing service container");

        let decoder = PoolDecoder::new(config.network_context()?);
        let connector = Self::build_connector(&config).await?;

        let postgres = PostgresStore::connect(&config.database).await?;
        if config.database.run_migrations {
            postgres.migrate().await?;
        }
        let redis = RedisFastStore::connect(&config.redis, config.security_param())?;
        info!("Storage backends initialized");

        Ok(Self {
            config,
            durable: Arc::new(postgres),
            fast: Arc::new(redis),
            connector,
            decoder,
        })
    }

    async fn build_connector(config: &SyncerConfig) -> SyncResult<Arc<dyn ChainSyncConnector>> {
        match &config.upstream.replay_file {
            Some(path) => Ok(Arc::new(ReplayConnector::from_file(path).await?)),
            None => Err(SyncError::Configuration(format!(
                "no chain-sync client available for {}:{}; set upstream.replay_file",
                config.upstream.host, config.upstream.port
            ))),
        }
    }

    /// Perform health check on all services
    pub async fn health_check(&self) -> SyncResult<()> {
        info!("Performing health check");

        self.durable.health_check().await?;
        self.fast.health_check().await?;

        info!("All services healthy");
        Ok(())
    }

    /// Driver wired to this container's adapters
    pub fn sync_driver(&self, shutdown: watch::Receiver<bool>) -> SyncDriver {
        let resume = ResumeManager::new(
            Arc::clone(&self.durable),
            Arc::clone(&self.fast),
            self.config.security_param(),
            self.config.start_point(),
        );

        SyncDriver::new(
            Arc::clone(&self.durable),
            Arc::clone(&self.fast),
            Arc::clone(&self.connector),
            self.decoder.clone(),
            resume,
        )
        .with_retry(RetryPolicy::from(&self.config.retry))
        .with_settings(SyncSettings::from(&self.config.upstream))
        .with_shutdown(shutdown)
    }
}
