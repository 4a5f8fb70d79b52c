//! PostgreSQL adapter
//!
//! Source of truth for blocks and pool snapshots. Snapshot tables reference
//! `block(height)` with `ON DELETE CASCADE`, so a rollback only deletes
//! block rows.

use crate::config::DatabaseConfig;
use crate::core::{BlockHeader, DurableStore, DurableTransaction, Point, SyncError, SyncResult};
use crate::domain::models::{LegacyPoolSnapshot, PoolSnapshot, StablePoolSnapshot, V2PoolSnapshot};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, Postgres};
use sqlx::{PgPool, Row, Transaction};
use std::time::Duration;
use tracing::{debug, info};

/// PostgreSQL durable store
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to PostgreSQL
    pub async fn connect(config: &DatabaseConfig) -> SyncResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.postgres_url)
            .await?;

        info!("PostgreSQL connected successfully");

        Ok(Self { pool })
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> SyncResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }
}

fn to_i64(value: u64, what: &str) -> SyncResult<i64> {
    i64::try_from(value).map_err(|_| SyncError::Schema(format!("{} {} does not fit a BIGINT column", what, value)))
}

fn to_i32(value: u32, what: &str) -> SyncResult<i32> {
    i32::try_from(value).map_err(|_| SyncError::Schema(format!("{} {} does not fit an INTEGER column", what, value)))
}

fn to_u64(value: i64, what: &str) -> SyncResult<u64> {
    u64::try_from(value).map_err(|_| SyncError::Schema(format!("negative {} {} in database", what, value)))
}

#[async_trait]
impl DurableStore for PostgresStore {
    async fn begin(&self) -> SyncResult<Box<dyn DurableTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresTransaction { tx }))
    }

    async fn intersection_candidates(&self, limit: usize) -> SyncResult<Vec<Point>> {
        let rows = sqlx::query("SELECT slot, header_hash FROM block ORDER BY slot DESC LIMIT $1")
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let slot: i64 = row.try_get("slot")?;
                let hash: String = row.try_get("header_hash")?;
                Ok(Point::new(to_u64(slot, "slot")?, hash))
            })
            .collect()
    }

    async fn latest_block(&self) -> SyncResult<Option<BlockHeader>> {
        let row = sqlx::query("SELECT height, slot, header_hash FROM block ORDER BY height DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let height: i64 = row.try_get("height")?;
                let slot: i64 = row.try_get("slot")?;
                Ok(Some(BlockHeader {
                    height: to_u64(height, "height")?,
                    slot: to_u64(slot, "slot")?,
                    header_hash: row.try_get("header_hash")?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn health_check(&self) -> SyncResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// One open database transaction. sqlx rolls it back when dropped
/// uncommitted.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PostgresTransaction {
    async fn insert_legacy(&mut self, block: &BlockHeader, pool: &LegacyPoolSnapshot) -> SyncResult<()> {
        let profit_sharing = pool.profit_sharing.as_ref().map(|d| d.to_json());
        sqlx::query(
            r#"
            INSERT INTO pool_v1 (
                block_id, slot, created_tx_id, created_tx_index, pool_nft, lp_asset,
                asset_a, asset_b, reserve_a, reserve_b, total_liquidity,
                root_k_last, profit_sharing, pool_address, raw_datum
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(to_i64(block.height, "height")?)
        .bind(to_i64(block.slot, "slot")?)
        .bind(&pool.provenance.tx_hash)
        .bind(to_i32(pool.provenance.output_index, "output index")?)
        .bind(pool.pool_nft.as_str())
        .bind(pool.lp_asset.as_str())
        .bind(pool.asset_a.as_str())
        .bind(pool.asset_b.as_str())
        .bind(Decimal::from(pool.reserve_a))
        .bind(Decimal::from(pool.reserve_b))
        .bind(Decimal::from(pool.total_liquidity))
        .bind(Decimal::from(pool.root_k_last))
        .bind(profit_sharing)
        .bind(&pool.pool_address)
        .bind(pool.raw_datum.to_json())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_v2(&mut self, block: &BlockHeader, pool: &V2PoolSnapshot) -> SyncResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pool_v2 (
                block_id, slot, created_tx_id, created_tx_index, lp_asset, asset_a,
                asset_b, reserve_a, reserve_b, total_liquidity,
                base_fee_a_numerator, base_fee_b_numerator, fee_sharing_numerator,
                allow_dynamic_fee, pool_address, raw_datum
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(to_i64(block.height, "height")?)
        .bind(to_i64(block.slot, "slot")?)
        .bind(&pool.provenance.tx_hash)
        .bind(to_i32(pool.provenance.output_index, "output index")?)
        .bind(pool.lp_asset.as_str())
        .bind(pool.asset_a.as_str())
        .bind(pool.asset_b.as_str())
        .bind(Decimal::from(pool.reserve_a))
        .bind(Decimal::from(pool.reserve_b))
        .bind(Decimal::from(pool.total_liquidity))
        .bind(Decimal::from(pool.base_fee_a_numerator))
        .bind(Decimal::from(pool.base_fee_b_numerator))
        .bind(pool.fee_sharing_numerator.map(Decimal::from))
        .bind(pool.allow_dynamic_fee)
        .bind(&pool.pool_address)
        .bind(pool.raw_datum.to_json())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_stable(&mut self, block: &BlockHeader, pool: &StablePoolSnapshot) -> SyncResult<()> {
        let assets: Vec<String> = pool.assets.iter().map(|a| a.as_str().to_string()).collect();
        let balances: Vec<Decimal> = pool.balances.iter().copied().map(Decimal::from).collect();
        sqlx::query(
            r#"
            INSERT INTO stable_pool (
                block_id, slot, created_tx_id, created_tx_index, pool_nft, lp_asset,
                assets, balances, total_liquidity, amplification_coefficient,
                order_hash, pool_address, raw_datum
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(to_i64(block.height, "height")?)
        .bind(to_i64(block.slot, "slot")?)
        .bind(&pool.provenance.tx_hash)
        .bind(to_i32(pool.provenance.output_index, "output index")?)
        .bind(pool.pool_nft.as_str())
        .bind(pool.lp_asset.as_str())
        .bind(assets)
        .bind(balances)
        .bind(Decimal::from(pool.total_liquidity))
        .bind(Decimal::from(pool.amplification_coefficient))
        .bind(&pool.order_hash)
        .bind(&pool.pool_address)
        .bind(pool.raw_datum.to_json())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DurableTransaction for PostgresTransaction {
    async fn create_block(&mut self, block: &BlockHeader) -> SyncResult<()> {
        sqlx::query("INSERT INTO block (height, slot, header_hash) VALUES ($1, $2, $3)")
            .bind(to_i64(block.height, "height")?)
            .bind(to_i64(block.slot, "slot")?)
            .bind(&block.header_hash)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn create_pool_snapshot(&mut self, block: &BlockHeader, snapshot: &PoolSnapshot) -> SyncResult<()> {
        match snapshot {
            PoolSnapshot::Legacy(pool) => self.insert_legacy(block, pool).await,
            PoolSnapshot::V2(pool) => self.insert_v2(block, pool).await,
            PoolSnapshot::Stable(pool) => self.insert_stable(block, pool).await,
        }
    }

    async fn rollback_to_point(&mut self, point: &Point) -> SyncResult<u64> {
        if point.is_origin() {
            let deleted: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM block")
                .fetch_one(&mut *self.tx)
                .await?;
            sqlx::query("TRUNCATE block, pool_v1, pool_v2, stable_pool")
                .execute(&mut *self.tx)
                .await?;
            debug!(blocks = deleted, "Truncated all blocks for rollback to origin");
            return Ok(deleted.max(0) as u64);
        }

        let result = sqlx::query("DELETE FROM block WHERE slot > $1")
            .bind(to_i64(point.slot(), "slot")?)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> SyncResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_conversions_reject_overflow() {
        assert_eq!(to_i32(7, "output index").unwrap(), 7);
        assert!(matches!(to_i32(u32::MAX, "output index"), Err(SyncError::Schema(_))));
        assert!(to_i32(u32::MAX, "output index").unwrap_err().is_fatal());

        assert_eq!(to_i64(42, "slot").unwrap(), 42);
        assert!(matches!(to_i64(u64::MAX, "slot"), Err(SyncError::Schema(_))));
        assert!(matches!(to_u64(-1, "height"), Err(SyncError::Schema(_))));
    }
}
