//! Status board: latest status record per subsystem.
//!
//! Subsystems post flat string maps tagged with a `type` key ("network",
//! "mining", ...). The board keeps the newest record for each type and
//! forwards every update to live subscribers.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::collaborators::StatusSink;

pub type StatusRecord = HashMap<String, String>;

#[derive(Clone)]
pub struct StatusBoard {
    latest: Arc<DashMap<String, StatusRecord>>,
    updates: broadcast::Sender<StatusRecord>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            latest: Arc::new(DashMap::new()),
            updates,
        }
    }

    /// Newest record of the given type.
    pub fn get(&self, kind: &str) -> Option<StatusRecord> {
        self.latest.get(kind).map(|r| r.value().clone())
    }

    /// All newest records, keyed by type.
    pub fn all(&self) -> HashMap<String, StatusRecord> {
        self.latest
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusRecord> {
        self.updates.subscribe()
    }
}

impl StatusSink for StatusBoard {
    fn insert(&self, status: StatusRecord) {
        let kind = status
            .get("type")
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());
        tracing::trace!(kind, ?status, "status update");
        self.latest.insert(kind, status.clone());
        // No subscribers is fine.
        let _ = self.updates.send(status);
    }
}
