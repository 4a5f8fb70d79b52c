//! Core abstractions and types
//!
//! Chain types, the structured datum model, port traits and error
//! definitions. Nothing here depends on a concrete store or transport.

pub mod error;
pub mod plutus;
pub mod traits;
pub mod types;

// Re-export commonly used items
pub use error::{DecodeError, NetworkError, StorageError, SyncError, SyncResult};
pub use plutus::PlutusData;
pub use traits::{ChainSyncConnector, ChainSyncSession, DurableStore, DurableTransaction, FastStore};
pub use types::{
    AssetUnit, Block, BlockHeader, ChainSyncEvent, Datum, Intersection, Point, Transaction, TxOutput, TxOutputRef,
    Value, NATIVE_UNIT,
};
