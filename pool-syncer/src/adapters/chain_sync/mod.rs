//! Upstream chain-sync adapters

pub mod replay;

pub use replay::{Exhausted, ReplayConnector};
