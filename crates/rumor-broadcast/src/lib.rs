//! Fault-tolerant gossip broadcast.
//!
//! Every node keeps the set of values it has seen and forwards each new value
//! to its configured neighbors. Forwarding is at-least-once: an entry stays in
//! a per-neighbor retry queue and is resent on every pump tick until the
//! neighbor acknowledges it by echoing the entry's correlation id.
//!
//! # Components
//!
//! - [`DedupStore`]: values seen by this node, with an atomic test-and-set.
//! - [`TopologyTable`]: neighbor lists set by `topology` messages.
//! - [`RetryQueue`]: pending fan-out entries keyed by neighbor and correlation id.
//! - [`RetryPump`]: the task that owns the queue and resends pending entries.
//! - [`ShutdownController`]: cancels and joins the pump.
//! - [`GossipHandler`]: `broadcast`, `read` and `topology` handling.
//! - [`BroadcastService`]: wires everything to a [`rumor_transport::Node`].
//!
//! # Example
//!
//! ```no_run
//! use rumor_broadcast::{BroadcastConfig, BroadcastService};
//! use rumor_transport::Node;
//!
//! # async fn example() -> rumor_transport::Result<()> {
//! let mut node = Node::new();
//! let service = BroadcastService::attach(&mut node, BroadcastConfig::default());
//! node.run().await?;
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod correlation;
pub mod dedup;
pub mod error;
pub mod gossip;
pub mod messages;
pub mod pump;
pub mod queue;
pub mod service;
pub mod shutdown;
pub mod topology;

#[cfg(test)]
pub(crate) mod test_support;

pub use correlation::{CorrelationId, CorrelationIdGenerator};
pub use dedup::DedupStore;
pub use error::{Error, Result};
pub use gossip::GossipHandler;
pub use pump::{PumpHandle, QueueStats, RetryPump};
pub use queue::{PendingEntry, RetryQueue};
pub use service::{BroadcastConfig, BroadcastService};
pub use shutdown::ShutdownController;
pub use topology::TopologyTable;
