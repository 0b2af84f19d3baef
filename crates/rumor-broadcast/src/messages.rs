//! Message bodies produced and consumed by the broadcast protocol.

use std::collections::HashMap;

use rumor_transport::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::correlation::CorrelationId;

pub const BROADCAST: &str = "broadcast";
pub const BROADCAST_OK: &str = "broadcast_ok";
pub const READ: &str = "read";
pub const READ_OK: &str = "read_ok";
pub const TOPOLOGY: &str = "topology";
pub const TOPOLOGY_OK: &str = "topology_ok";

/// Field carrying the correlation id in retries and their acknowledgments.
pub const CORRELATION_FIELD: &str = "correlation_id";

/// `broadcast` from a client, or a retry from a peer (with a correlation id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastRequest {
    pub message: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
}

/// `broadcast_ok`, echoing the request's correlation id if it had one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BroadcastOk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
}

/// `read_ok`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadOk {
    pub messages: Vec<Value>,
}

/// `topology`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyRequest {
    pub topology: HashMap<NodeId, Vec<NodeId>>,
}
