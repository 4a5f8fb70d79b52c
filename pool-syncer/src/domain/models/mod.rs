//! Domain models for AMM pool entities
//!
//! These models represent pool state as decoded from chain outputs.
//! They are independent of storage implementation.

pub mod pool;

// Re-export all models
pub use pool::*;
