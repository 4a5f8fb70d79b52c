//! Adapters layer - Infrastructure implementations
//!
//! Implementations of the port traits defined in the core layer: the
//! durable and fast stores and the upstream chain-sync source.

pub mod chain_sync;
pub mod storage;

// Re-export commonly used adapters
pub use chain_sync::{Exhausted, ReplayConnector};
pub use storage::{MemoryDurableStore, MemoryFastStore, PostgresStore, RedisFastStore};
