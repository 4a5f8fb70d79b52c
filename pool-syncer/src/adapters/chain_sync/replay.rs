//! Scripted chain-sync source
//!
//! Replays a fixed event log with the node's intersection semantics: a
//! session resumes after the newest offered point that appears in the log,
//! and the first event after `resume` is a roll-backward to that point.

use crate::core::{
    ChainSyncConnector, ChainSyncEvent, ChainSyncSession, Intersection, NetworkError, Point, SyncError, SyncResult,
};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info};

/// What a session does once every scripted event has been delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhausted {
    /// Wait for new events forever, like a node at the chain tip
    Wait,
    /// Close the session
    Close,
}

/// Connector handing out sessions over one shared event log
#[derive(Debug, Clone)]
pub struct ReplayConnector {
    events: Arc<Vec<ChainSyncEvent>>,
    on_exhausted: Exhausted,
    exhausted: Arc<Notify>,
    failing_connects: Arc<AtomicUsize>,
    connects: Arc<AtomicUsize>,
}

impl ReplayConnector {
    pub fn new(events: Vec<ChainSyncEvent>) -> Self {
        Self {
            events: Arc::new(events),
            on_exhausted: Exhausted::Wait,
            exhausted: Arc::new(Notify::new()),
            failing_connects: Arc::default(),
            connects: Arc::default(),
        }
    }

    /// Load a JSON array of events
    pub async fn from_file(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SyncError::Configuration(format!("cannot read replay file {}: {}", path.display(), e)))?;
        let events: Vec<ChainSyncEvent> = serde_json::from_str(&content)
            .map_err(|e| SyncError::Configuration(format!("invalid replay file {}: {}", path.display(), e)))?;

        info!("Loaded {} chain-sync events from {}", events.len(), path.display());
        Ok(Self::new(events))
    }

    pub fn on_exhausted(mut self, mode: Exhausted) -> Self {
        self.on_exhausted = mode;
        self
    }

    /// Make the next `n` connection attempts fail
    pub fn fail_connects(&self, n: usize) {
        self.failing_connects.store(n, Ordering::SeqCst);
    }

    /// Notified each time a session delivers its last event and starts waiting
    pub fn exhausted(&self) -> Arc<Notify> {
        Arc::clone(&self.exhausted)
    }

    /// Successful connections so far
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainSyncConnector for ReplayConnector {
    async fn connect(&self) -> SyncResult<Box<dyn ChainSyncSession>> {
        let refused = self
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(NetworkError::ConnectionFailed("replay source refused connection".to_string()).into());
        }

        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ReplaySession {
            events: Arc::clone(&self.events),
            on_exhausted: self.on_exhausted,
            exhausted: Arc::clone(&self.exhausted),
            cursor: None,
            pending_rollback: None,
        }))
    }
}

struct ReplaySession {
    events: Arc<Vec<ChainSyncEvent>>,
    on_exhausted: Exhausted,
    exhausted: Arc<Notify>,
    cursor: Option<usize>,
    pending_rollback: Option<ChainSyncEvent>,
}

impl ReplaySession {
    fn tip(&self) -> Point {
        self.events
            .iter()
            .rev()
            .find_map(|event| match event {
                ChainSyncEvent::RollForward(block) => Some(block.point()),
                ChainSyncEvent::RollBackward { .. } => None,
            })
            .unwrap_or(Point::Origin)
    }

    /// Position just after the roll-forward of `point`
    fn position_after(&self, point: &Point) -> Option<usize> {
        if point.is_origin() {
            return Some(0);
        }
        self.events
            .iter()
            .rposition(|event| matches!(event, ChainSyncEvent::RollForward(block) if &block.point() == point))
            .map(|index| index + 1)
    }
}

#[async_trait]
impl ChainSyncSession for ReplaySession {
    async fn resume(&mut self, points: &[Point], pipeline_depth: usize) -> SyncResult<Intersection> {
        let (point, cursor) = points
            .iter()
            .find_map(|point| self.position_after(point).map(|cursor| (point.clone(), cursor)))
            .ok_or(NetworkError::NoIntersection(points.len()))?;

        let tip = self.tip();
        debug!(cursor, pipeline_depth, "Replay session resumed at {}", point);

        self.cursor = Some(cursor);
        self.pending_rollback = Some(ChainSyncEvent::RollBackward {
            point: point.clone(),
            tip: tip.clone(),
        });
        Ok(Intersection { point, tip })
    }

    async fn request_next(&mut self) -> SyncResult<ChainSyncEvent> {
        let cursor = self
            .cursor
            .ok_or_else(|| NetworkError::Protocol("request_next before resume".to_string()))?;

        if let Some(rollback) = self.pending_rollback.take() {
            return Ok(rollback);
        }

        match self.events.get(cursor) {
            Some(event) => {
                self.cursor = Some(cursor + 1);
                Ok(event.clone())
            }
            None => match self.on_exhausted {
                Exhausted::Close => Err(NetworkError::SessionClosed("replay log exhausted".to_string()).into()),
                Exhausted::Wait => {
                    self.exhausted.notify_one();
                    futures::future::pending::<()>().await;
                    Err(NetworkError::SessionClosed("replay log exhausted".to_string()).into())
                }
            },
        }
    }
}
