//! Topology table: which nodes each node gossips to.
//!
//! The table is filled verbatim from `topology` messages. No connectivity
//! validation is done: a node missing from the table simply has no neighbors.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use rumor_transport::NodeId;

/// Adjacency list, safe to read while an update is applied.
#[derive(Debug, Default)]
pub struct TopologyTable {
    neighbors: RwLock<HashMap<NodeId, Vec<NodeId>>>,
}

impl TopologyTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the neighbor list of `node`.
    pub fn set_neighbors(&self, node: impl Into<NodeId>, neighbors: Vec<NodeId>) {
        self.neighbors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node.into(), neighbors);
    }

    /// Replace the neighbor list of every node named in `topology`.
    ///
    /// Nodes not named keep their current neighbors.
    pub fn apply(&self, topology: HashMap<NodeId, Vec<NodeId>>) {
        let mut table = self.neighbors.write().unwrap_or_else(PoisonError::into_inner);
        for (node, neighbors) in topology {
            table.insert(node, neighbors);
        }
    }

    /// Neighbors of `node`, in configured order.
    #[must_use]
    pub fn neighbors(&self, node: &str) -> Vec<NodeId> {
        self.neighbors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of nodes with a configured neighbor list.
    #[must_use]
    pub fn len(&self) -> usize {
        self.neighbors.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no topology has been configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
