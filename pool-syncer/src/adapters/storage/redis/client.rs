//! Redis fast store

use super::super::{prune_candidates, push_candidate};
use crate::config::RedisConfig;
use crate::core::{FastStore, Point, StorageError, SyncError, SyncResult};
use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;
use tracing::{debug, error};

const LAST_SYNC_SLOT: &str = "last_sync_slot";
const INTERSECTION_CANDIDATES: &str = "intersection_candidates";

/// Resume state in Redis: a slot counter and a capped list of JSON points,
/// newest at the head
pub struct RedisFastStore {
    pool: Pool,
    capacity: usize,
    key_prefix: String,
}

impl RedisFastStore {
    /// Build the connection pool. No connection is opened until first use.
    pub fn connect(config: &RedisConfig, capacity: usize) -> SyncResult<Self> {
        let mut cfg = Config::from_url(&config.url);
        cfg.pool = Some(deadpool_redis::PoolConfig::new(config.max_connections));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| SyncError::Configuration(format!("invalid Redis configuration: {}", e)))?;

        debug!("Redis pool created for {}", config.url);

        Ok(Self {
            pool,
            capacity: capacity.max(1),
            key_prefix: config.key_prefix.clone(),
        })
    }

    fn key(&self, name: &str) -> String {
        if self.key_prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}:{}", self.key_prefix, name)
        }
    }

    async fn conn(&self) -> SyncResult<Connection> {
        Ok(self.pool.get().await?)
    }

    async fn read_candidates(&self, conn: &mut Connection) -> SyncResult<Vec<Point>> {
        let raw: Vec<String> = conn.lrange(self.key(INTERSECTION_CANDIDATES), 0, -1).await?;
        raw.iter()
            .map(|json| serde_json::from_str(json).map_err(SyncError::from))
            .collect()
    }

    /// Replace the whole list in one atomic step, deleting it when empty
    async fn write_candidates(&self, conn: &mut Connection, candidates: &[Point]) -> SyncResult<()> {
        let key = self.key(INTERSECTION_CANDIDATES);
        let encoded = candidates
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<String>, _>>()?;

        let mut pipe = redis::pipe();
        pipe.atomic().del(&key).ignore();
        if !encoded.is_empty() {
            pipe.rpush(&key, encoded).ignore();
        }
        let _: () = pipe.query_async(conn).await?;
        Ok(())
    }
}

#[async_trait]
impl FastStore for RedisFastStore {
    async fn last_sync_slot(&self) -> SyncResult<Option<u64>> {
        let mut conn = self.conn().await?;
        let slot: Option<u64> = conn.get(self.key(LAST_SYNC_SLOT)).await?;
        Ok(slot)
    }

    async fn set_last_sync_slot(&self, slot: u64) -> SyncResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.set(self.key(LAST_SYNC_SLOT), slot).await?;
        Ok(())
    }

    async fn push_intersection_candidate(&self, point: &Point) -> SyncResult<()> {
        let mut conn = self.conn().await?;
        let key = self.key(INTERSECTION_CANDIDATES);

        let head: Option<String> = conn.lindex(&key, 0).await?;
        let head = head.map(|json| serde_json::from_str::<Point>(&json)).transpose()?;

        // Replaying or re-applying a block must keep the list strictly descending
        if head.map_or(true, |h| h.slot() < point.slot() && !h.is_origin()) {
            let stop = isize::try_from(self.capacity).unwrap_or(isize::MAX) - 1;
            let _: () = redis::pipe()
                .atomic()
                .lpush(&key, serde_json::to_string(point)?)
                .ignore()
                .ltrim(&key, 0, stop)
                .ignore()
                .query_async(&mut conn)
                .await?;
            return Ok(());
        }

        let mut candidates = self.read_candidates(&mut conn).await?;
        push_candidate(&mut candidates, point, self.capacity);
        self.write_candidates(&mut conn, &candidates).await
    }

    async fn rollback_intersection_candidates(&self, point: &Point) -> SyncResult<()> {
        let mut conn = self.conn().await?;
        let mut candidates = self.read_candidates(&mut conn).await?;
        let before = candidates.len();
        prune_candidates(&mut candidates, point);
        if candidates.len() != before {
            self.write_candidates(&mut conn, &candidates).await?;
        }
        debug!(kept = candidates.len(), dropped = before - candidates.len(), "Pruned intersection candidates");
        Ok(())
    }

    async fn intersection_candidates(&self) -> SyncResult<Vec<Point>> {
        let mut conn = self.conn().await?;
        self.read_candidates(&mut conn).await
    }

    async fn health_check(&self) -> SyncResult<()> {
        let mut conn = self.conn().await?;

        let pong: String = redis::cmd("PING").query_async(&mut conn).await.map_err(|e| {
            error!("Redis health check failed: {}", e);
            SyncError::Storage(StorageError::Cache(format!("Health check failed: {}", e)))
        })?;

        if pong == "PONG" {
            Ok(())
        } else {
            Err(SyncError::Storage(StorageError::Cache("Unexpected PING response".to_string())))
        }
    }
}
