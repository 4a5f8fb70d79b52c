//! Pool Syncer Library
//!
//! Chain-sync indexer for AMM liquidity pools: follows the chain through an
//! upstream chain-sync session, decodes pool outputs into typed snapshots and
//! persists them to PostgreSQL, keeping Redis resume state for fast restarts.
//! Rollbacks are applied to both stores so the durable view always matches
//! the canonical chain.

pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types
pub use config::SyncerConfig;
pub use core::{SyncError, SyncResult};
pub use domain::{PoolDecoder, PoolSnapshot};
pub use services::{SyncDriver, SyncStats};
