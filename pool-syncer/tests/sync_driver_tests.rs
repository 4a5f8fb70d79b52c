//! Sync driver integration tests

use anyhow::Result;
use pool_syncer::adapters::chain_sync::{Exhausted, ReplayConnector};
use pool_syncer::adapters::storage::{MemoryDurableStore, MemoryFastStore};
use pool_syncer::core::{
    AssetUnit, Block, ChainSyncEvent, Datum, FastStore, PlutusData, Point, Transaction, TxOutput, Value,
};
use pool_syncer::domain::{NetworkContext, NetworkEnvironment, PoolDecoder, PoolSnapshot};
use pool_syncer::services::{ResumeManager, RetryPolicy, SyncDriver, SyncSettings, SyncState};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const V2_SCRIPT: &str = "ea07b733d932129c378af627436e7cbc2ef0bf96e0036bb51b3bde6b";
const V2_LP_POLICY: &str = "f5808c2c990d86da54bfc97d89cee6efa20cd8461616359478d96b4c";
const TOKEN_POLICY: &str = "29d222ce763455e3d7a09a665ce554f00ac89d2e99a1a83d267170c6";
const SECURITY_PARAM: usize = 10;

fn token() -> AssetUnit {
    AssetUnit::new(TOKEN_POLICY, "4d494e")
}

fn asset_datum(unit: &AssetUnit) -> PlutusData {
    PlutusData::constr(
        0,
        vec![
            PlutusData::Bytes(hex::decode(unit.policy_id()).unwrap()),
            PlutusData::Bytes(hex::decode(unit.asset_name()).unwrap()),
        ],
    )
}

/// V2 pool output holding `lovelace` and `tokens` with matching datum reserves
fn v2_pool_output(lovelace: u64, tokens: u64) -> TxOutput {
    let datum = PlutusData::constr(
        0,
        vec![
            PlutusData::constr(0, vec![PlutusData::constr(1, vec![PlutusData::Bytes(vec![0x5b; 28])])]),
            asset_datum(&AssetUnit::native()),
            asset_datum(&token()),
            PlutusData::int(1_000_000),
            PlutusData::int(lovelace),
            PlutusData::int(tokens),
            PlutusData::int(30),
            PlutusData::int(30),
            PlutusData::constr(1, vec![]),
            PlutusData::constr(0, vec![]),
        ],
    );
    TxOutput {
        address: format!("11{}{}", V2_SCRIPT, "ab".repeat(28)),
        value: Value::new()
            .with(AssetUnit::native(), lovelace)
            .with(AssetUnit::new(V2_LP_POLICY, "4d5350"), 1)
            .with(token(), tokens),
        datum: Some(Datum::Inline(datum)),
    }
}

/// Output at an enterprise key address
fn wallet_output() -> TxOutput {
    TxOutput {
        address: format!("61{}", "cd".repeat(28)),
        value: Value::new().with(AssetUnit::native(), 5_000_000),
        datum: None,
    }
}

fn block(height: u64, slot: u64, outputs: Vec<TxOutput>) -> Block {
    let transactions = if outputs.is_empty() {
        Vec::new()
    } else {
        vec![Transaction {
            id: format!("tx{:04}", height),
            outputs,
            datums: HashMap::new(),
        }]
    };
    Block {
        height,
        slot,
        header_hash: format!("blk-{}-{}", height, slot),
        transactions,
    }
}

fn wallet_block(height: u64, slot: u64) -> Block {
    block(height, slot, vec![wallet_output()])
}

fn pool_block(height: u64, slot: u64) -> Block {
    block(height, slot, vec![wallet_output(), v2_pool_output(111_990_389, 5_000)])
}

fn forward(block: Block) -> ChainSyncEvent {
    ChainSyncEvent::RollForward(block)
}

fn rollback(point: Point) -> ChainSyncEvent {
    ChainSyncEvent::RollBackward {
        point,
        tip: Point::new(9_999, "tip"),
    }
}

/// Create in-memory stores
fn create_test_stores() -> (Arc<MemoryDurableStore>, Arc<MemoryFastStore>) {
    (
        Arc::new(MemoryDurableStore::new()),
        Arc::new(MemoryFastStore::new(SECURITY_PARAM)),
    )
}

/// Create a driver over the given stores with immediate retries
fn create_test_driver(
    durable: &Arc<MemoryDurableStore>,
    fast: &Arc<MemoryFastStore>,
    connector: ReplayConnector,
    max_attempts: u32,
) -> SyncDriver {
    let decoder = PoolDecoder::new(NetworkContext::builtin(NetworkEnvironment::Mainnet).unwrap());
    let resume = ResumeManager::new(durable.clone(), fast.clone(), SECURITY_PARAM, Point::Origin);
    SyncDriver::new(durable.clone(), fast.clone(), Arc::new(connector), decoder, resume)
        .with_retry(RetryPolicy::immediate(max_attempts))
        .with_settings(SyncSettings {
            pipeline_depth: 1,
            reconnect_delay: Duration::from_millis(1),
            max_reconnect_delay: Duration::from_millis(5),
        })
}

#[tokio::test]
async fn test_pool_block_then_rollback() -> Result<()> {
    let (durable, fast) = create_test_stores();
    let mut driver = create_test_driver(&durable, &fast, ReplayConnector::new(Vec::new()), 3);

    driver.handle_event(forward(wallet_block(99, 990))).await?;
    driver.handle_event(forward(pool_block(100, 1000))).await?;

    assert_eq!(durable.blocks().len(), 2);
    let snapshots = durable.snapshots();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].block_height, 100);
    match &snapshots[0].snapshot {
        PoolSnapshot::V2(pool) => {
            assert_eq!(pool.asset_a, AssetUnit::native());
            assert_eq!(pool.reserve_a, 111_990_389);
            assert_eq!(pool.provenance.tx_hash, "tx0100");
            assert_eq!(pool.provenance.output_index, 1);
        }
        other => panic!("expected a v2 snapshot, got {:?}", other),
    }
    assert_eq!(fast.last_sync_slot().await?, Some(1000));

    driver.handle_event(rollback(Point::new(990, "blk-99-990"))).await?;

    let heights: Vec<u64> = durable.blocks().iter().map(|b| b.height).collect();
    assert_eq!(heights, vec![99]);
    assert!(durable.snapshots().is_empty());
    assert_eq!(fast.last_sync_slot().await?, Some(990));
    assert!(fast.intersection_candidates().await?.is_empty());
    assert_eq!(driver.stats().rollbacks, 1);
    assert_eq!(driver.stats().blocks_rolled_back, 1);
    assert_eq!(driver.state(), SyncState::Streaming);

    Ok(())
}

#[tokio::test]
async fn test_heights_strictly_increasing() -> Result<()> {
    let (durable, fast) = create_test_stores();
    let mut driver = create_test_driver(&durable, &fast, ReplayConnector::new(Vec::new()), 3);

    for height in 1..=5 {
        driver.handle_event(forward(wallet_block(height, height * 10))).await?;
    }

    let heights: Vec<u64> = durable.blocks().iter().map(|b| b.height).collect();
    assert_eq!(heights, vec![1, 2, 3, 4, 5]);

    let slots: Vec<u64> = fast.intersection_candidates().await?.iter().map(Point::slot).collect();
    assert_eq!(slots, vec![50, 40, 30, 20, 10]);
    assert_eq!(driver.stats().blocks_applied, 5);

    Ok(())
}

#[tokio::test]
async fn test_candidate_ring_stays_bounded() -> Result<()> {
    let (durable, fast) = create_test_stores();
    let mut driver = create_test_driver(&durable, &fast, ReplayConnector::new(Vec::new()), 3);

    for height in 1..=25 {
        driver.handle_event(forward(wallet_block(height, height * 20))).await?;
    }

    let candidates = fast.intersection_candidates().await?;
    assert_eq!(candidates.len(), SECURITY_PARAM);
    assert!(candidates.windows(2).all(|pair| pair[0].slot() > pair[1].slot()));
    assert_eq!(candidates[0], Point::new(500, "blk-25-500"));

    Ok(())
}

#[tokio::test]
async fn test_decode_failure_keeps_block() -> Result<()> {
    let (durable, fast) = create_test_stores();
    let mut driver = create_test_driver(&durable, &fast, ReplayConnector::new(Vec::new()), 3);

    let mut broken = v2_pool_output(2_000_000, 10);
    broken.datum = None;
    let block = block(7, 70, vec![broken, v2_pool_output(3_000_000, 20)]);

    driver.handle_event(forward(block)).await?;

    assert_eq!(durable.blocks().len(), 1);
    let snapshots = durable.snapshots();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].snapshot.reserves(), vec![3_000_000, 20]);
    assert_eq!(driver.stats().decode_failures, 1);
    assert_eq!(driver.stats().snapshots_written, 1);

    Ok(())
}

#[tokio::test]
async fn test_failed_commit_is_retried() -> Result<()> {
    let (durable, fast) = create_test_stores();
    let mut driver = create_test_driver(&durable, &fast, ReplayConnector::new(Vec::new()), 3);

    durable.fail_next_commits(2);
    driver.handle_event(forward(pool_block(1, 10))).await?;

    assert_eq!(durable.blocks().len(), 1);
    assert_eq!(durable.snapshots().len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_exhausted_retries_persist_nothing() -> Result<()> {
    let (durable, fast) = create_test_stores();
    let mut driver = create_test_driver(&durable, &fast, ReplayConnector::new(Vec::new()), 3);

    durable.fail_next_commits(3);
    let result = driver.handle_event(forward(pool_block(1, 10))).await;

    assert!(result.is_err());
    assert!(durable.blocks().is_empty());
    assert!(durable.snapshots().is_empty());
    assert_eq!(driver.stats().blocks_applied, 0);

    Ok(())
}

#[tokio::test]
async fn test_empty_block_is_acknowledged_without_writes() -> Result<()> {
    let (durable, fast) = create_test_stores();
    let mut driver = create_test_driver(&durable, &fast, ReplayConnector::new(Vec::new()), 3);

    driver.handle_event(forward(block(1, 10, Vec::new()))).await?;

    assert!(durable.blocks().is_empty());
    assert_eq!(fast.last_sync_slot().await?, None);
    assert_eq!(driver.stats().empty_blocks, 1);

    Ok(())
}

#[tokio::test]
async fn test_fast_store_outage_does_not_block_forward() -> Result<()> {
    let (durable, fast) = create_test_stores();
    let mut driver = create_test_driver(&durable, &fast, ReplayConnector::new(Vec::new()), 3);

    fast.fail_next_ops(2);
    driver.handle_event(forward(pool_block(1, 10))).await?;

    assert_eq!(durable.blocks().len(), 1);
    assert_eq!(fast.last_sync_slot().await?, None);

    Ok(())
}

#[tokio::test]
async fn test_rollback_completes_while_fast_store_is_down() -> Result<()> {
    let (durable, fast) = create_test_stores();
    let mut driver = create_test_driver(&durable, &fast, ReplayConnector::new(Vec::new()), 3);

    driver.handle_event(forward(wallet_block(1, 10))).await?;
    driver.handle_event(forward(wallet_block(2, 20))).await?;

    fast.fail_next_ops(1_000);
    driver.handle_event(rollback(Point::new(10, "blk-1-10"))).await?;

    assert_eq!(durable.blocks().len(), 1);
    assert_eq!(driver.stats().rollbacks, 1);
    assert_eq!(driver.stats().blocks_rolled_back, 1);
    assert_eq!(driver.state(), SyncState::Streaming);

    Ok(())
}

#[tokio::test]
async fn test_durable_rollback_is_retried() -> Result<()> {
    let (durable, fast) = create_test_stores();
    let mut driver = create_test_driver(&durable, &fast, ReplayConnector::new(Vec::new()), 3);

    driver.handle_event(forward(wallet_block(1, 10))).await?;
    driver.handle_event(forward(wallet_block(2, 20))).await?;

    durable.fail_next_commits(2);
    driver.handle_event(rollback(Point::new(10, "blk-1-10"))).await?;
    assert_eq!(durable.blocks().len(), 1);
    assert_eq!(fast.last_sync_slot().await?, Some(10));

    driver.handle_event(forward(wallet_block(2, 25))).await?;
    durable.fail_next_commits(3);
    assert!(driver.handle_event(rollback(Point::new(10, "blk-1-10"))).await.is_err());
    assert_eq!(durable.blocks().len(), 2);
    assert_eq!(driver.stats().rollbacks, 1);

    Ok(())
}

#[tokio::test]
async fn test_rollback_to_origin_truncates() -> Result<()> {
    let (durable, fast) = create_test_stores();
    let mut driver = create_test_driver(&durable, &fast, ReplayConnector::new(Vec::new()), 3);

    driver.handle_event(forward(pool_block(1, 10))).await?;
    driver.handle_event(forward(pool_block(2, 20))).await?;
    driver.handle_event(rollback(Point::Origin)).await?;

    assert!(durable.blocks().is_empty());
    assert!(durable.snapshots().is_empty());
    assert_eq!(fast.last_sync_slot().await?, Some(0));
    assert!(fast.intersection_candidates().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_run_replays_fork_and_stops_on_shutdown() -> Result<()> {
    let (durable, fast) = create_test_stores();
    let connector = ReplayConnector::new(vec![
        forward(wallet_block(1, 10)),
        forward(pool_block(2, 20)),
        rollback(Point::new(10, "blk-1-10")),
        forward(pool_block(2, 25)),
        forward(block(3, 30, Vec::new())),
    ]);
    let exhausted = connector.exhausted();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let driver = create_test_driver(&durable, &fast, connector, 3).with_shutdown(shutdown_rx);

    let handle = tokio::spawn(driver.run());
    exhausted.notified().await;
    shutdown_tx.send(true)?;
    let stats = handle.await??;

    let slots: Vec<u64> = durable.blocks().iter().map(|b| b.slot).collect();
    assert_eq!(slots, vec![10, 25]);
    assert_eq!(durable.snapshots().len(), 1);
    assert_eq!(durable.snapshots()[0].block_height, 2);
    assert_eq!(stats.blocks_applied, 3);
    assert_eq!(stats.empty_blocks, 1);
    // Intersection rollback plus the fork
    assert_eq!(stats.rollbacks, 2);
    assert_eq!(stats.sessions, 1);

    Ok(())
}

#[tokio::test]
async fn test_restart_resumes_behind_the_tip() -> Result<()> {
    let (durable, fast) = create_test_stores();
    let chain: Vec<ChainSyncEvent> = (1..=6).map(|h| forward(wallet_block(h, h * 10))).collect();

    let first = ReplayConnector::new(chain[..5].to_vec());
    let exhausted = first.exhausted();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(create_test_driver(&durable, &fast, first, 3).with_shutdown(shutdown_rx).run());
    exhausted.notified().await;
    shutdown_tx.send(true)?;
    handle.await??;
    assert_eq!(durable.blocks().len(), 5);

    // Restart: resumes at the third newest candidate, re-applies the rest
    let second = ReplayConnector::new(chain);
    let exhausted = second.exhausted();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(create_test_driver(&durable, &fast, second, 3).with_shutdown(shutdown_rx).run());
    exhausted.notified().await;
    shutdown_tx.send(true)?;
    let stats = handle.await??;

    let heights: Vec<u64> = durable.blocks().iter().map(|b| b.height).collect();
    assert_eq!(heights, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(stats.blocks_rolled_back, 2);
    assert_eq!(stats.blocks_applied, 3);

    Ok(())
}

#[tokio::test]
async fn test_reconnects_after_refused_connections() -> Result<()> {
    let (durable, fast) = create_test_stores();
    let connector = ReplayConnector::new(vec![forward(wallet_block(1, 10))]);
    connector.fail_connects(2);
    let exhausted = connector.exhausted();
    let observer = connector.clone();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(create_test_driver(&durable, &fast, connector, 3).with_shutdown(shutdown_rx).run());
    exhausted.notified().await;
    shutdown_tx.send(true)?;
    let stats = handle.await??;

    assert_eq!(observer.connect_count(), 1);
    assert_eq!(stats.sessions, 1);
    assert_eq!(durable.blocks().len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_session_closed_triggers_resume() -> Result<()> {
    let (durable, fast) = create_test_stores();
    let chain: Vec<ChainSyncEvent> = (1..=4).map(|h| forward(wallet_block(h, h * 10))).collect();
    let connector = ReplayConnector::new(chain).on_exhausted(Exhausted::Close);
    let observer = connector.clone();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(create_test_driver(&durable, &fast, connector, 3).with_shutdown(shutdown_rx).run());
    while observer.connect_count() < 3 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    shutdown_tx.send(true)?;
    let stats = handle.await??;

    let heights: Vec<u64> = durable.blocks().iter().map(|b| b.height).collect();
    assert_eq!(heights, vec![1, 2, 3, 4]);
    assert!(stats.sessions >= 2);

    Ok(())
}

#[tokio::test]
async fn test_schema_violation_is_fatal() -> Result<()> {
    let (durable, fast) = create_test_stores();
    let connector = ReplayConnector::new(vec![forward(wallet_block(1, 10)), forward(wallet_block(1, 20))]);

    let result = create_test_driver(&durable, &fast, connector, 2).run().await;

    let err = result.expect_err("duplicate height must stop the driver");
    assert!(err.is_fatal());
    assert_eq!(durable.blocks().len(), 1);

    Ok(())
}
