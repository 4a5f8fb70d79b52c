//! Domain layer
//!
//! Pool snapshot models and the pure output decoder, independent of
//! storage and transport.

pub mod decoder;
pub mod models;

pub use decoder::{normalize_asset_pair, DatumWitnesses, NetworkContext, NetworkEnvironment, PoolDecoder};
pub use models::*;
