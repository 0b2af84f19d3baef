//! Gossip handler: ingests `broadcast`, `read` and `topology` requests.
//!
//! A `broadcast` is acknowledged as soon as the value is recorded and its
//! fan-out entries are queued. Dissemination happens later, driven by the
//! retry pump.

use std::collections::HashMap;

use rumor_transport::{Body, Message, NodeId, Transport};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::correlation::CorrelationIdGenerator;
use crate::dedup::DedupStore;
use crate::error::Result;
use crate::messages::{
    BroadcastOk, BroadcastRequest, ReadOk, TopologyRequest, BROADCAST_OK, READ_OK, TOPOLOGY_OK,
};
use crate::pump::PumpHandle;
use crate::queue::PendingEntry;
use crate::topology::TopologyTable;

/// Per-node broadcast state and request handling.
pub struct GossipHandler<T> {
    transport: T,
    dedup: DedupStore,
    topology: TopologyTable,
    ids: CorrelationIdGenerator,
    pump: PumpHandle,
}

impl<T: Transport> GossipHandler<T> {
    pub fn new(transport: T, ids: CorrelationIdGenerator, pump: PumpHandle) -> Self {
        Self {
            transport,
            dedup: DedupStore::new(),
            topology: TopologyTable::new(),
            ids,
            pump,
        }
    }

    /// Values seen so far.
    pub fn dedup(&self) -> &DedupStore {
        &self.dedup
    }

    pub fn topology(&self) -> &TopologyTable {
        &self.topology
    }

    /// Record `value` and queue it for every neighbor except `source`.
    ///
    /// Returns the number of fan-out entries queued: zero for a value that
    /// was already seen. Fails only if this node has not been initialized.
    pub fn on_broadcast(&self, value: Value, source: Option<&str>) -> Result<usize> {
        let me = self.transport.node_id()?;

        if !self.dedup.test_and_set(&value) {
            trace!(value = %value, "Duplicate broadcast ignored");
            return Ok(0);
        }

        let mut queued = 0;
        for neighbor in self.topology.neighbors(&me) {
            if Some(neighbor.as_str()) == source {
                continue;
            }

            let entry = PendingEntry::new(neighbor, self.ids.next_id(), value.clone());
            let target = entry.target.clone();
            let correlation_id = entry.correlation_id;
            match self.pump.enqueue(entry) {
                Ok(()) => queued += 1,
                // Nothing rejects broadcasts once the pump is gone; the value
                // stays recorded locally but will not reach this neighbor.
                Err(e) => warn!(
                    target_node = %target,
                    %correlation_id,
                    error = %e,
                    "Fan-out entry dropped"
                ),
            }
        }

        debug!(value = %value, source = ?source, queued, "New value accepted");
        Ok(queued)
    }

    /// Every value accepted so far, in no particular order.
    pub fn on_read(&self) -> Vec<Value> {
        self.dedup.snapshot()
    }

    /// Replace the neighbor lists of every node named in `topology`.
    pub fn on_topology(&self, topology: HashMap<NodeId, Vec<NodeId>>) {
        debug!(nodes = topology.len(), "Applying topology");
        self.topology.apply(topology);
    }

    /// Handle a `broadcast` from a client or a peer.
    pub fn handle_broadcast(&self, request: &Message) -> Result<()> {
        let BroadcastRequest {
            message,
            correlation_id,
        } = request.body.decode()?;

        self.on_broadcast(message, Some(request.src.as_str()))?;

        let ok = Body::from_payload(BROADCAST_OK, &BroadcastOk { correlation_id })?;
        self.transport.reply(request, ok)?;
        Ok(())
    }

    /// Handle a `read`.
    pub fn handle_read(&self, request: &Message) -> Result<()> {
        let ok = Body::from_payload(
            READ_OK,
            &ReadOk {
                messages: self.on_read(),
            },
        )?;
        self.transport.reply(request, ok)?;
        Ok(())
    }

    /// Handle a `topology`.
    pub fn handle_topology(&self, request: &Message) -> Result<()> {
        let TopologyRequest { topology } = request.body.decode()?;
        self.on_topology(topology);
        self.transport.reply(request, Body::new(TOPOLOGY_OK))?;
        Ok(())
    }
}
