//! Retry pump: the single owner of the retry queue.
//!
//! # Message Passing
//!
//! The queue is never shared. Everything that touches it goes through the
//! pump's command channel:
//!
//! | Source | Command |
//! |--------|---------|
//! | Gossip handler | `Enqueue` a new fan-out entry |
//! | RPC completion callback | `Acknowledge` an echoed correlation id |
//! | Service / tests | `Stats` query |
//!
//! # Ticks
//!
//! On every tick the pump takes a point-in-time copy of the queue and issues
//! one RPC per entry. Entries are not marked in flight, so an entry that has
//! not been acknowledged by the next tick is sent again; receivers are
//! idempotent. A failed send leaves the entry queued for the next tick. There
//! is no backoff and no attempt limit.

use std::collections::HashMap;
use std::time::Duration;

use rumor_transport::{Message, NodeId, ResponseCallback, Transport};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::correlation::CorrelationId;
use crate::error::{Error, Result};
use crate::messages::BroadcastOk;
use crate::queue::{PendingEntry, RetryQueue};

/// Commands accepted by the pump.
#[derive(Debug)]
pub(crate) enum PumpCommand {
    Enqueue(PendingEntry),
    Acknowledge {
        from: NodeId,
        correlation_id: CorrelationId,
    },
    Stats(oneshot::Sender<QueueStats>),
}

/// Snapshot of the retry queue and pump counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Entries still waiting for an acknowledgment.
    pub pending: usize,
    /// Pending entries per neighbor.
    pub per_neighbor: HashMap<NodeId, usize>,
    /// RPCs issued for pending entries (including repeats).
    pub resends: u64,
    /// RPCs the transport refused to issue.
    pub failed_sends: u64,
    /// Entries removed by a matching acknowledgment.
    pub acknowledged: u64,
}

/// Cheaply cloneable handle for talking to a running pump.
#[derive(Debug, Clone)]
pub struct PumpHandle {
    commands: mpsc::UnboundedSender<PumpCommand>,
}

impl PumpHandle {
    /// Queue a fan-out entry.
    pub fn enqueue(&self, entry: PendingEntry) -> Result<()> {
        self.send(PumpCommand::Enqueue(entry))
    }

    /// Report an acknowledgment received from `from`.
    pub fn acknowledge(&self, from: impl Into<NodeId>, correlation_id: CorrelationId) -> Result<()> {
        self.send(PumpCommand::Acknowledge {
            from: from.into(),
            correlation_id,
        })
    }

    /// Current queue statistics.
    pub async fn stats(&self) -> Result<QueueStats> {
        let (tx, rx) = oneshot::channel();
        self.send(PumpCommand::Stats(tx))?;
        rx.await.map_err(|_| Error::PumpStopped)
    }

    /// Whether the pump has exited.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.commands.is_closed()
    }

    fn send(&self, command: PumpCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::PumpStopped)
    }

    /// A handle whose commands land in the returned receiver.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<PumpCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { commands: tx }, rx)
    }
}

/// Periodic resender of un-acknowledged entries.
pub struct RetryPump<T> {
    transport: T,
    queue: RetryQueue,
    commands: mpsc::UnboundedReceiver<PumpCommand>,
    handle: PumpHandle,
    tick_interval: Duration,
    cancel: CancellationToken,
    resends: u64,
    failed_sends: u64,
    acknowledged: u64,
}

impl<T: Transport> RetryPump<T> {
    /// Create a pump and the handle used to feed it.
    ///
    /// The pump does nothing until [`run`](Self::run) is awaited.
    pub fn new(transport: T, tick_interval: Duration, cancel: CancellationToken) -> (Self, PumpHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = PumpHandle { commands: tx };
        let pump = Self {
            transport,
            queue: RetryQueue::new(),
            commands: rx,
            handle: handle.clone(),
            tick_interval,
            cancel,
            resends: 0,
            failed_sends: 0,
            acknowledged: 0,
        };
        (pump, handle)
    }

    /// Run until the cancellation token fires.
    ///
    /// RPCs already issued are not aborted; their late acknowledgments are
    /// dropped along with the queue.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!(tick_interval = ?self.tick_interval, "Retry pump started");

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!(
                        pending = self.queue.len(),
                        resends = self.resends,
                        acknowledged = self.acknowledged,
                        "Retry pump shutting down"
                    );
                    break;
                }
                _ = ticker.tick() => self.resend_pending(),
                Some(command) = self.commands.recv() => self.apply(command),
            }
        }
    }

    fn apply(&mut self, command: PumpCommand) {
        match command {
            PumpCommand::Enqueue(entry) => {
                trace!(
                    target_node = %entry.target,
                    correlation_id = %entry.correlation_id,
                    "Queued fan-out entry"
                );
                self.queue.insert(entry);
            }
            PumpCommand::Acknowledge {
                from,
                correlation_id,
            } => match self.queue.acknowledge(&from, correlation_id) {
                Some(entry) => {
                    self.acknowledged += 1;
                    trace!(
                        from = %from,
                        %correlation_id,
                        age = ?entry.age(),
                        "Entry acknowledged"
                    );
                }
                None => trace!(from = %from, %correlation_id, "Ignoring duplicate or unknown acknowledgment"),
            },
            PumpCommand::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn resend_pending(&mut self) {
        if self.queue.is_empty() {
            return;
        }

        let pending = self.queue.pending();
        trace!(entries = pending.len(), "Resending pending entries");

        for entry in pending {
            let acks = self.handle.clone();
            let on_response: ResponseCallback = Box::new(move |response| on_ack(&acks, response));

            match self.transport.rpc(&entry.target, entry.payload(), on_response) {
                Ok(()) => self.resends += 1,
                Err(e) => {
                    self.failed_sends += 1;
                    debug!(
                        target_node = %entry.target,
                        correlation_id = %entry.correlation_id,
                        error = %e,
                        "Retry send failed, keeping entry"
                    );
                }
            }
        }
    }

    fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.queue.len(),
            per_neighbor: self.queue.per_neighbor(),
            resends: self.resends,
            failed_sends: self.failed_sends,
            acknowledged: self.acknowledged,
        }
    }
}

/// Completion path of a retry RPC: turn the response into an `Acknowledge`.
fn on_ack(acks: &PumpHandle, response: Message) {
    if response.body.is_error() {
        debug!(from = %response.src, code = ?response.body.error_code(), "Peer rejected retry");
        return;
    }

    let ack = match response.body.decode::<BroadcastOk>() {
        Ok(ack) => ack,
        Err(e) => {
            debug!(from = %response.src, error = %e, "Undecodable acknowledgment");
            return;
        }
    };

    match ack.correlation_id {
        Some(correlation_id) => {
            // The pump may already be gone during shutdown.
            let _ = acks.acknowledge(response.src, correlation_id);
        }
        None => trace!(from = %response.src, "Acknowledgment without correlation id"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingTransport;
    use rumor_transport::Body;
    use serde_json::json;
    use std::sync::Arc;

    const TICK: Duration = Duration::from_millis(10);

    fn start(transport: &Arc<RecordingTransport>) -> (PumpHandle, CancellationToken, tokio::task::JoinHandle<()>) {
        let cancel = CancellationToken::new();
        let (pump, handle) = RetryPump::new(Arc::clone(transport), TICK, cancel.clone());
        let task = tokio::spawn(pump.run());
        (handle, cancel, task)
    }

    fn entry(target: &str, id: u64, message: i64) -> PendingEntry {
        PendingEntry::new(target, CorrelationId(id), json!(message))
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_entries_are_resent_every_tick() {
        let transport = RecordingTransport::new("n0");
        let (handle, _cancel, _task) = start(&transport);

        handle.enqueue(entry("n1", 7, 5)).unwrap();
        tokio::time::sleep(TICK * 3 + TICK / 2).await;

        let requests = transport.rpc_requests();
        assert!(requests.len() >= 3, "expected repeated sends, got {}", requests.len());
        for request in &requests {
            assert_eq!(request.dest, "n1");
            assert_eq!(request.body.kind, "broadcast");
            assert_eq!(request.body.field("message"), Some(&json!(5)));
            assert_eq!(request.body.field("correlation_id"), Some(&json!(7)));
        }

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.resends, requests.len() as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledgment_dequeues_entry() {
        let transport = RecordingTransport::new("n0");
        let (handle, _cancel, _task) = start(&transport);

        handle.enqueue(entry("n1", 1, 5)).unwrap();
        handle.enqueue(entry("n2", 2, 5)).unwrap();
        tokio::time::sleep(TICK + TICK / 2).await;

        assert!(transport.ack_all() >= 2);
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.acknowledged, 2);

        // Nothing left to resend.
        let before = transport.rpc_requests().len();
        tokio::time::sleep(TICK * 3).await;
        assert_eq!(transport.rpc_requests().len(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_removes_only_its_own_entry() {
        let transport = RecordingTransport::new("n0");
        let (handle, _cancel, _task) = start(&transport);

        handle.enqueue(entry("n1", 1, 10)).unwrap();
        handle.enqueue(entry("n1", 2, 11)).unwrap();
        handle.enqueue(entry("n1", 3, 12)).unwrap();

        handle.acknowledge("n1", CorrelationId(2)).unwrap();
        handle.acknowledge("n2", CorrelationId(1)).unwrap();

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.per_neighbor.get("n1"), Some(&2));
        assert_eq!(stats.acknowledged, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_send_keeps_entry_for_next_tick() {
        let transport = RecordingTransport::new("n0");
        transport.set_failing(true);
        let (handle, _cancel, _task) = start(&transport);

        handle.enqueue(entry("n1", 1, 5)).unwrap();
        tokio::time::sleep(TICK * 2 + TICK / 2).await;

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert!(stats.failed_sends >= 2);
        assert!(transport.rpc_requests().is_empty());

        transport.set_failing(false);
        tokio::time::sleep(TICK).await;
        assert!(!transport.rpc_requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_and_uncorrelated_responses_do_not_dequeue() {
        let transport = RecordingTransport::new("n0");
        let (handle, _cancel, _task) = start(&transport);

        handle.enqueue(entry("n1", 1, 5)).unwrap();
        tokio::time::sleep(TICK + TICK / 2).await;

        for (request, callback) in transport.take_rpcs() {
            callback(Message {
                src: request.dest.clone(),
                dest: request.src.clone(),
                body: Body::new("error").with("code", 11),
            });
        }
        tokio::time::sleep(TICK).await;
        for (request, callback) in transport.take_rpcs() {
            callback(Message {
                src: request.dest,
                dest: request.src,
                body: Body::new("broadcast_ok"),
            });
        }

        assert_eq!(handle.stats().await.unwrap().pending, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_pump() {
        let transport = RecordingTransport::new("n0");
        let (handle, cancel, task) = start(&transport);

        handle.enqueue(entry("n1", 1, 5)).unwrap();
        cancel.cancel();
        task.await.unwrap();

        assert!(handle.is_stopped());
        assert!(matches!(handle.enqueue(entry("n1", 2, 6)), Err(Error::PumpStopped)));
        assert!(matches!(handle.stats().await, Err(Error::PumpStopped)));

        let sent = transport.rpc_requests().len();
        tokio::time::sleep(TICK * 5).await;
        assert_eq!(transport.rpc_requests().len(), sent);
    }
}
