//! Core trait abstractions (Ports in Hexagonal Architecture)

use async_trait::async_trait;

use super::error::SyncResult;
use super::types::*;
use crate::domain::models::PoolSnapshot;

/// Durable store - source of truth for blocks and pool snapshots
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Open a scoped transaction. Writes become visible on `commit`; dropping
    /// the handle, or returning early with an error, rolls all of them back.
    async fn begin(&self) -> SyncResult<Box<dyn DurableTransaction>>;

    /// Most recent `limit` persisted block points, descending by slot
    async fn intersection_candidates(&self, limit: usize) -> SyncResult<Vec<Point>>;

    /// Highest persisted block
    async fn latest_block(&self) -> SyncResult<Option<BlockHeader>>;

    /// Health check
    async fn health_check(&self) -> SyncResult<()>;
}

/// Writer capabilities available inside a durable transaction
#[async_trait]
pub trait DurableTransaction: Send {
    /// Insert one block row keyed by height
    async fn create_block(&mut self, block: &BlockHeader) -> SyncResult<()>;

    /// Insert one snapshot row foreign-keyed to `block`
    async fn create_pool_snapshot(&mut self, block: &BlockHeader, snapshot: &PoolSnapshot) -> SyncResult<()>;

    /// Delete every block with a slot greater than `point`'s (all of them for
    /// `Origin`) together with their snapshots. Returns the deleted block count.
    async fn rollback_to_point(&mut self, point: &Point) -> SyncResult<u64>;

    async fn commit(self: Box<Self>) -> SyncResult<()>;
}

/// Fast store - advisory resume state
#[async_trait]
pub trait FastStore: Send + Sync {
    async fn last_sync_slot(&self) -> SyncResult<Option<u64>>;

    async fn set_last_sync_slot(&self, slot: u64) -> SyncResult<()>;

    /// Push onto the head of the candidate ring buffer, evicting the oldest
    /// entry once capacity is reached
    async fn push_intersection_candidate(&self, point: &Point) -> SyncResult<()>;

    /// Drop candidates at or after `point`; clears the cache if none remain
    async fn rollback_intersection_candidates(&self, point: &Point) -> SyncResult<()>;

    /// Cached candidates, newest first
    async fn intersection_candidates(&self) -> SyncResult<Vec<Point>>;

    async fn health_check(&self) -> SyncResult<()>;
}

/// Opens sessions with the upstream chain-sync endpoint
#[async_trait]
pub trait ChainSyncConnector: Send + Sync {
    async fn connect(&self) -> SyncResult<Box<dyn ChainSyncSession>>;
}

/// One live chain-sync session
#[async_trait]
pub trait ChainSyncSession: Send {
    /// Offer candidate points; the node picks the newest one it still has on chain
    async fn resume(&mut self, points: &[Point], pipeline_depth: usize) -> SyncResult<Intersection>;

    /// Acknowledge the previous event and wait for the next one
    async fn request_next(&mut self) -> SyncResult<ChainSyncEvent>;
}
