//! Resume point selection

use crate::core::{DurableStore, FastStore, Point, SyncResult};
use std::sync::Arc;
use tracing::{debug, warn};

/// Newest candidates skipped before offering, since they may be rolled back
const UNSTABLE_CANDIDATES: usize = 2;

/// Computes the points offered to the upstream node when a session opens
pub struct ResumeManager {
    durable: Arc<dyn DurableStore>,
    fast: Arc<dyn FastStore>,
    security_param: usize,
    start_point: Point,
}

impl ResumeManager {
    pub fn new(
        durable: Arc<dyn DurableStore>,
        fast: Arc<dyn FastStore>,
        security_param: usize,
        start_point: Point,
    ) -> Self {
        Self {
            durable,
            fast,
            security_param,
            start_point,
        }
    }

    /// Cached candidates, or the durable store's recent blocks when the cache
    /// is empty, followed by the configured start point and `Origin`
    pub async fn resolve_start_points(&self) -> SyncResult<Vec<Point>> {
        let cached = match self.fast.intersection_candidates().await {
            Ok(points) => points,
            Err(e) => {
                warn!("Fast store unavailable, resuming from durable history: {}", e);
                Vec::new()
            }
        };

        let candidates = if cached.is_empty() {
            let points = self.durable.intersection_candidates(self.security_param).await?;
            debug!(count = points.len(), "Using durable store intersection candidates");
            points
        } else {
            debug!(count = cached.len(), "Using cached intersection candidates");
            cached
        };

        Ok(assemble(candidates, &self.start_point))
    }
}

fn assemble(candidates: Vec<Point>, start_point: &Point) -> Vec<Point> {
    let mut points: Vec<Point> = candidates.into_iter().skip(UNSTABLE_CANDIDATES).collect();
    for fallback in [start_point.clone(), Point::Origin] {
        if !points.contains(&fallback) {
            points.push(fallback);
        }
    }
    points
}
