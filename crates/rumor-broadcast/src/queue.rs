//! Retry queue: un-acknowledged fan-out entries, per neighbor.
//!
//! An entry lives from the moment a new value is queued for a neighbor until
//! an acknowledgment echoing its correlation id arrives from that neighbor.
//! There is no in-flight state: every entry is eligible for resending on every
//! pump tick until it is removed.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rumor_transport::{Body, NodeId};
use serde_json::Value;

use crate::correlation::CorrelationId;
use crate::messages::{BROADCAST, CORRELATION_FIELD};

/// A value waiting to be acknowledged by one neighbor.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub target: NodeId,
    pub correlation_id: CorrelationId,
    pub message: Value,
    pub enqueued_at: Instant,
}

impl PendingEntry {
    pub fn new(target: impl Into<NodeId>, correlation_id: CorrelationId, message: Value) -> Self {
        Self {
            target: target.into(),
            correlation_id,
            message,
            enqueued_at: Instant::now(),
        }
    }

    /// The `broadcast` body sent on every retry of this entry.
    #[must_use]
    pub fn payload(&self) -> Body {
        Body::new(BROADCAST)
            .with("message", self.message.clone())
            .with(CORRELATION_FIELD, self.correlation_id.0)
    }

    /// Time since the entry was queued.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

/// Pending entries keyed by neighbor, then by correlation id.
///
/// Not synchronized: owned by exactly one task (the retry pump).
#[derive(Debug, Default)]
pub struct RetryQueue {
    pending: HashMap<NodeId, HashMap<CorrelationId, PendingEntry>>,
}

impl RetryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an entry. An entry with the same neighbor and id is replaced.
    pub fn insert(&mut self, entry: PendingEntry) {
        self.pending
            .entry(entry.target.clone())
            .or_default()
            .insert(entry.correlation_id, entry);
    }

    /// Remove the entry `neighbor` acknowledged, if it is still queued.
    ///
    /// Only the entry keyed by `(neighbor, id)` is touched.
    pub fn acknowledge(&mut self, neighbor: &str, id: CorrelationId) -> Option<PendingEntry> {
        let entries = self.pending.get_mut(neighbor)?;
        let removed = entries.remove(&id);
        if entries.is_empty() {
            self.pending.remove(neighbor);
        }
        removed
    }

    /// Point-in-time copy of every pending entry.
    #[must_use]
    pub fn pending(&self) -> Vec<PendingEntry> {
        self.pending
            .values()
            .flat_map(|entries| entries.values().cloned())
            .collect()
    }

    /// Number of entries pending for `neighbor`.
    #[must_use]
    pub fn pending_for(&self, neighbor: &str) -> usize {
        self.pending.get(neighbor).map_or(0, HashMap::len)
    }

    /// Pending entry count per neighbor.
    #[must_use]
    pub fn per_neighbor(&self) -> HashMap<NodeId, usize> {
        self.pending
            .iter()
            .map(|(neighbor, entries)| (neighbor.clone(), entries.len()))
            .collect()
    }

    /// Total number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.values().map(HashMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
