//! Chain-sync driver
//!
//! Owns one upstream session at a time and applies its events strictly in
//! order. An event is acknowledged, by requesting the next one, only after
//! its store writes have committed.

use super::resume::ResumeManager;
use super::retry::{capped_backoff, RetryPolicy};
use crate::config::UpstreamConfig;
use crate::core::{
    Block, ChainSyncConnector, ChainSyncEvent, DurableStore, FastStore, Point, SyncResult, TxOutputRef,
};
use crate::domain::decoder::{DatumWitnesses, PoolDecoder};
use crate::domain::models::PoolSnapshot;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Blocks between periodic progress reports
const PROGRESS_INTERVAL: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Resuming,
    Streaming,
    ApplyingBlock,
    ApplyingRollback,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStats {
    pub blocks_applied: u64,
    pub empty_blocks: u64,
    pub snapshots_written: u64,
    pub decode_failures: u64,
    pub rollbacks: u64,
    pub blocks_rolled_back: u64,
    pub sessions: u64,
    pub last_slot: Option<u64>,
    pub started_at: DateTime<Utc>,
}

impl Default for SyncStats {
    fn default() -> Self {
        Self {
            blocks_applied: 0,
            empty_blocks: 0,
            snapshots_written: 0,
            decode_failures: 0,
            rollbacks: 0,
            blocks_rolled_back: 0,
            sessions: 0,
            last_slot: None,
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub pipeline_depth: usize,
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from(&UpstreamConfig::default())
    }
}

impl From<&UpstreamConfig> for SyncSettings {
    fn from(config: &UpstreamConfig) -> Self {
        Self {
            pipeline_depth: config.pipeline_depth.max(1),
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
            max_reconnect_delay: Duration::from_secs(config.max_reconnect_delay_secs),
        }
    }
}

/// Resolves once `true` has been sent; never resolves if the sender is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}

pub struct SyncDriver {
    durable: Arc<dyn DurableStore>,
    fast: Arc<dyn FastStore>,
    connector: Arc<dyn ChainSyncConnector>,
    decoder: PoolDecoder,
    resume: ResumeManager,
    retry: RetryPolicy,
    settings: SyncSettings,
    shutdown: watch::Receiver<bool>,
    state: SyncState,
    stats: SyncStats,
}

impl SyncDriver {
    pub fn new(
        durable: Arc<dyn DurableStore>,
        fast: Arc<dyn FastStore>,
        connector: Arc<dyn ChainSyncConnector>,
        decoder: PoolDecoder,
        resume: ResumeManager,
    ) -> Self {
        let (_, shutdown) = watch::channel(false);
        Self {
            durable,
            fast,
            connector,
            decoder,
            resume,
            retry: RetryPolicy::default(),
            settings: SyncSettings::default(),
            shutdown,
            state: SyncState::Idle,
            stats: SyncStats::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Stop cleanly once `true` is sent on the channel
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Supervise sessions until shutdown or a fatal error. Session failures
    /// are retried forever with capped backoff.
    pub async fn run(mut self) -> SyncResult<SyncStats> {
        info!("Starting pool syncer");
        self.log_resume_state().await;

        let mut failures = 0u32;
        while !self.is_shutdown() {
            let sessions = self.stats.sessions;
            match self.run_session().await {
                Ok(()) => break,
                Err(e) if e.is_fatal() => {
                    error!("Fatal sync error: {}", e);
                    self.state = SyncState::Stopped;
                    self.log_stats();
                    return Err(e);
                }
                Err(e) => {
                    if self.stats.sessions > sessions {
                        failures = 0;
                    }
                    failures = failures.saturating_add(1);
                    let delay = capped_backoff(self.settings.reconnect_delay, self.settings.max_reconnect_delay, failures);
                    warn!(attempt = failures, "Chain-sync session failed: {}", e);
                    warn!("Reconnecting in {:?}...", delay);

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown_requested(&mut self.shutdown) => break,
                    }
                }
            }
        }

        self.state = SyncState::Stopped;
        info!("Pool syncer stopped");
        self.log_stats();
        Ok(self.stats)
    }

    /// One session: negotiate an intersection, then stream events until
    /// shutdown (`Ok`) or an error
    pub async fn run_session(&mut self) -> SyncResult<()> {
        self.state = SyncState::Resuming;
        let points = self.resume.resolve_start_points().await?;
        debug!(count = points.len(), "Offering intersection candidates");

        let mut session = self.connector.connect().await?;
        let intersection = session.resume(&points, self.settings.pipeline_depth).await?;
        self.stats.sessions += 1;
        info!(
            slot = intersection.point.slot(),
            tip = intersection.tip.slot(),
            "Intersection found at {}",
            intersection.point
        );

        self.state = SyncState::Streaming;
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => {
                    info!("Shutdown requested, closing chain-sync session");
                    return Ok(());
                }
                event = session.request_next() => event?,
            };

            self.handle_event(event).await?;
        }
    }

    /// Apply one event to completion, retries included
    pub async fn handle_event(&mut self, event: ChainSyncEvent) -> SyncResult<()> {
        match event {
            ChainSyncEvent::RollForward(block) => {
                self.state = SyncState::ApplyingBlock;
                self.apply_block(&block).await?;
            }
            ChainSyncEvent::RollBackward { point, tip } => {
                self.state = SyncState::ApplyingRollback;
                self.apply_rollback(&point, &tip).await?;
            }
        }
        self.state = SyncState::Streaming;
        Ok(())
    }

    async fn apply_block(&mut self, block: &Block) -> SyncResult<()> {
        if block.transactions.is_empty() {
            self.stats.empty_blocks += 1;
            debug!(height = block.height, slot = block.slot, "Skipping empty block");
            return Ok(());
        }

        let (snapshots, failures) = self.decode_block(block);
        self.stats.decode_failures += failures;

        let header = &block.header();
        let point = &block.point();
        let snapshots = &snapshots;
        let durable = self.durable.as_ref();
        let fast = self.fast.as_ref();

        self.retry
            .run("apply block", || async move {
                // Fast store first, best effort
                if let Err(e) = fast.set_last_sync_slot(header.slot).await {
                    warn!(slot = header.slot, "Failed to update last sync slot: {}", e);
                }
                if let Err(e) = fast.push_intersection_candidate(point).await {
                    warn!(slot = header.slot, "Failed to cache intersection candidate: {}", e);
                }

                let mut tx = durable.begin().await?;
                tx.create_block(header).await?;
                for snapshot in snapshots {
                    tx.create_pool_snapshot(header, snapshot).await?;
                }
                tx.commit().await
            })
            .await?;

        self.stats.blocks_applied += 1;
        self.stats.snapshots_written += snapshots.len() as u64;
        self.stats.last_slot = Some(block.slot);

        if snapshots.is_empty() {
            debug!(height = block.height, slot = block.slot, "Applied block");
        } else {
            info!(
                height = block.height,
                slot = block.slot,
                snapshots = snapshots.len(),
                "Applied block with pool updates"
            );
        }
        if self.stats.blocks_applied % PROGRESS_INTERVAL == 0 {
            self.log_stats();
        }
        Ok(())
    }

    /// Decode every output of the block. Failures are counted and skipped.
    fn decode_block(&self, block: &Block) -> (Vec<PoolSnapshot>, u64) {
        let witnesses = DatumWitnesses::from_block(block);
        let mut snapshots = Vec::new();
        let mut failures = 0;

        for tx in &block.transactions {
            for (index, output) in tx.outputs.iter().enumerate() {
                let output_ref = TxOutputRef::new(tx.id.clone(), index as u32);
                match self.decoder.decode(&output_ref, output, &witnesses) {
                    Ok(Some(snapshot)) => {
                        debug!(family = %snapshot.family(), lp_asset = %snapshot.lp_asset(), "Decoded pool at {}", output_ref);
                        snapshots.push(snapshot);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        failures += 1;
                        warn!(height = block.height, "Skipping output {}: {}", output_ref, e);
                    }
                }
            }
        }

        (snapshots, failures)
    }

    async fn apply_rollback(&mut self, point: &Point, tip: &Point) -> SyncResult<()> {
        let durable = self.durable.as_ref();
        let fast = self.fast.as_ref();

        let deleted = self
            .retry
            .run("rollback", || async move {
                let mut tx = durable.begin().await?;
                let deleted = tx.rollback_to_point(point).await?;
                tx.commit().await?;
                Ok(deleted)
            })
            .await?;

        // Fast store after the durable prune, best effort
        if let Err(e) = fast.set_last_sync_slot(point.slot()).await {
            warn!(slot = point.slot(), "Failed to reset last sync slot: {}", e);
        }
        if let Err(e) = fast.rollback_intersection_candidates(point).await {
            warn!(slot = point.slot(), "Failed to prune intersection candidates: {}", e);
        }

        self.stats.rollbacks += 1;
        self.stats.blocks_rolled_back += deleted;
        self.stats.last_slot = Some(point.slot());

        if deleted > 0 {
            info!(slot = point.slot(), tip = tip.slot(), deleted, "Rolled back to {}", point);
        } else {
            debug!(slot = point.slot(), tip = tip.slot(), "Rollback to {} removed nothing", point);
        }
        Ok(())
    }

    async fn log_resume_state(&self) {
        match self.durable.latest_block().await {
            Ok(Some(block)) => info!(height = block.height, slot = block.slot, "Durable store tip"),
            Ok(None) => info!("Durable store is empty"),
            Err(e) => warn!("Could not read durable store tip: {}", e),
        }
        match self.fast.last_sync_slot().await {
            Ok(slot) => info!(last_sync_slot = ?slot, "Fast store resume state"),
            Err(e) => warn!("Could not read fast store resume state: {}", e),
        }
    }

    fn log_stats(&self) {
        let stats = &self.stats;
        info!(
            blocks_applied = stats.blocks_applied,
            empty_blocks = stats.empty_blocks,
            snapshots_written = stats.snapshots_written,
            decode_failures = stats.decode_failures,
            rollbacks = stats.rollbacks,
            blocks_rolled_back = stats.blocks_rolled_back,
            sessions = stats.sessions,
            last_slot = ?stats.last_slot,
            uptime_secs = (Utc::now() - stats.started_at).num_seconds(),
            "Sync statistics"
        );
    }
}
