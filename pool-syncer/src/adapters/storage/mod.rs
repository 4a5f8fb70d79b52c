//! Storage adapters
//!
//! Implementations of the durable and fast store ports: PostgreSQL and
//! Redis for production, in-memory variants for tests.

pub mod memory;
pub mod postgres;
pub mod redis;

use crate::core::Point;

pub use self::memory::{MemoryDurableStore, MemoryFastStore};
pub use self::postgres::PostgresStore;
pub use self::redis::RedisFastStore;

/// Insert `point` at the head of a newest-first candidate list, dropping
/// entries it supersedes and evicting past `capacity`
pub(crate) fn push_candidate(candidates: &mut Vec<Point>, point: &Point, capacity: usize) {
    candidates.retain(|existing| existing.slot() < point.slot() && !existing.is_origin());
    candidates.insert(0, point.clone());
    candidates.truncate(capacity.max(1));
}

/// Drop candidates at or after `point`; `Origin` drops them all
pub(crate) fn prune_candidates(candidates: &mut Vec<Point>, point: &Point) {
    if point.is_origin() {
        candidates.clear();
    } else {
        candidates.retain(|existing| existing.slot() < point.slot());
    }
}
