//! In-memory stores
//!
//! Process-local implementations of both store ports, with fault-injection
//! hooks for exercising the driver's retry paths.

use super::{prune_candidates, push_candidate};
use crate::core::{
    BlockHeader, DurableStore, DurableTransaction, FastStore, Point, StorageError, SyncError, SyncResult,
};
use crate::domain::models::PoolSnapshot;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Snapshot row together with the height of the block that created it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSnapshot {
    pub block_height: u64,
    pub snapshot: PoolSnapshot,
}

#[derive(Debug, Clone, Default)]
struct DurableState {
    blocks: BTreeMap<u64, BlockHeader>,
    snapshots: Vec<StoredSnapshot>,
}

fn lock<T>(mutex: &Mutex<T>) -> SyncResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| SyncError::Storage(StorageError::Unavailable("in-memory store lock poisoned".to_string())))
}

fn take_fault(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Durable store backed by a mutex-guarded map. Transactions stage writes
/// on a private copy that replaces the shared state on commit.
#[derive(Debug, Clone, Default)]
pub struct MemoryDurableStore {
    state: Arc<Mutex<DurableState>>,
    failing_begins: Arc<AtomicUsize>,
    failing_commits: Arc<AtomicUsize>,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to `begin` fail with a transient error
    pub fn fail_next_begins(&self, n: usize) {
        self.failing_begins.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` commits fail with a transient error
    pub fn fail_next_commits(&self, n: usize) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Persisted blocks in height order
    pub fn blocks(&self) -> Vec<BlockHeader> {
        self.state
            .lock()
            .map(|s| s.blocks.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn snapshots(&self) -> Vec<StoredSnapshot> {
        self.state.lock().map(|s| s.snapshots.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn begin(&self) -> SyncResult<Box<dyn DurableTransaction>> {
        if take_fault(&self.failing_begins) {
            return Err(SyncError::Storage(StorageError::Unavailable("injected begin failure".to_string())));
        }
        let staged = lock(&self.state)?.clone();
        Ok(Box::new(MemoryTransaction {
            shared: Arc::clone(&self.state),
            failing_commits: Arc::clone(&self.failing_commits),
            staged,
        }))
    }

    async fn intersection_candidates(&self, limit: usize) -> SyncResult<Vec<Point>> {
        let state = lock(&self.state)?;
        let mut points: Vec<&BlockHeader> = state.blocks.values().collect();
        points.sort_by(|a, b| b.slot.cmp(&a.slot));
        Ok(points.into_iter().take(limit).map(BlockHeader::point).collect())
    }

    async fn latest_block(&self) -> SyncResult<Option<BlockHeader>> {
        Ok(lock(&self.state)?.blocks.values().next_back().cloned())
    }

    async fn health_check(&self) -> SyncResult<()> {
        lock(&self.state).map(|_| ())
    }
}

struct MemoryTransaction {
    shared: Arc<Mutex<DurableState>>,
    failing_commits: Arc<AtomicUsize>,
    staged: DurableState,
}

#[async_trait]
impl DurableTransaction for MemoryTransaction {
    async fn create_block(&mut self, block: &BlockHeader) -> SyncResult<()> {
        if self.staged.blocks.contains_key(&block.height) {
            return Err(SyncError::Schema(format!("duplicate block height {}", block.height)));
        }
        if self.staged.blocks.values().any(|b| b.slot == block.slot) {
            return Err(SyncError::Schema(format!("duplicate block slot {}", block.slot)));
        }
        self.staged.blocks.insert(block.height, block.clone());
        Ok(())
    }

    async fn create_pool_snapshot(&mut self, block: &BlockHeader, snapshot: &PoolSnapshot) -> SyncResult<()> {
        if !self.staged.blocks.contains_key(&block.height) {
            return Err(SyncError::Schema(format!("no block row at height {}", block.height)));
        }
        let provenance = snapshot.provenance();
        if self
            .staged
            .snapshots
            .iter()
            .any(|s| s.snapshot.family() == snapshot.family() && s.snapshot.provenance() == provenance)
        {
            return Err(SyncError::Schema(format!("duplicate snapshot for output {}", provenance)));
        }
        self.staged.snapshots.push(StoredSnapshot {
            block_height: block.height,
            snapshot: snapshot.clone(),
        });
        Ok(())
    }

    async fn rollback_to_point(&mut self, point: &Point) -> SyncResult<u64> {
        let before = self.staged.blocks.len();
        if point.is_origin() {
            self.staged.blocks.clear();
        } else {
            self.staged.blocks.retain(|_, b| b.slot <= point.slot());
        }
        let blocks = &self.staged.blocks;
        self.staged.snapshots.retain(|s| blocks.contains_key(&s.block_height));
        Ok((before - self.staged.blocks.len()) as u64)
    }

    async fn commit(self: Box<Self>) -> SyncResult<()> {
        if take_fault(&self.failing_commits) {
            return Err(SyncError::Storage(StorageError::Unavailable("injected commit failure".to_string())));
        }
        let MemoryTransaction { shared, staged, .. } = *self;
        *lock(&shared)? = staged;
        debug!("Committed in-memory transaction");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct FastState {
    last_sync_slot: Option<u64>,
    candidates: Vec<Point>,
}

/// Fast store holding the resume state in process memory
#[derive(Debug, Clone)]
pub struct MemoryFastStore {
    state: Arc<Mutex<FastState>>,
    capacity: usize,
    failing_ops: Arc<AtomicUsize>,
}

impl MemoryFastStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::default(),
            capacity,
            failing_ops: Arc::default(),
        }
    }

    /// Make the next `n` operations fail, as an unreachable cache would
    pub fn fail_next_ops(&self, n: usize) {
        self.failing_ops.store(n, Ordering::SeqCst);
    }

    fn guard(&self) -> SyncResult<MutexGuard<'_, FastState>> {
        if take_fault(&self.failing_ops) {
            return Err(SyncError::Storage(StorageError::Cache("injected cache failure".to_string())));
        }
        lock(&self.state)
    }
}

#[async_trait]
impl FastStore for MemoryFastStore {
    async fn last_sync_slot(&self) -> SyncResult<Option<u64>> {
        Ok(self.guard()?.last_sync_slot)
    }

    async fn set_last_sync_slot(&self, slot: u64) -> SyncResult<()> {
        self.guard()?.last_sync_slot = Some(slot);
        Ok(())
    }

    async fn push_intersection_candidate(&self, point: &Point) -> SyncResult<()> {
        let mut state = self.guard()?;
        push_candidate(&mut state.candidates, point, self.capacity);
        Ok(())
    }

    async fn rollback_intersection_candidates(&self, point: &Point) -> SyncResult<()> {
        let mut state = self.guard()?;
        prune_candidates(&mut state.candidates, point);
        Ok(())
    }

    async fn intersection_candidates(&self) -> SyncResult<Vec<Point>> {
        Ok(self.guard()?.candidates.clone())
    }

    async fn health_check(&self) -> SyncResult<()> {
        self.guard().map(|_| ())
    }
}
