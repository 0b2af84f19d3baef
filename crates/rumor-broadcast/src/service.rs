//! Wiring of the gossip handler, retry pump and shutdown controller.

use std::sync::Arc;
use std::time::Duration;

use rumor_transport::{Node, NodeHandle, Transport};
use tracing::info;

use crate::correlation::{default_machine_id, CorrelationIdGenerator};
use crate::error::Result;
use crate::gossip::GossipHandler;
use crate::messages::{BROADCAST, READ, TOPOLOGY};
use crate::pump::{PumpHandle, QueueStats, RetryPump};
use crate::shutdown::ShutdownController;

/// Retry pump period used when none is configured.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// How long shutdown waits for the pump by default.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for [`BroadcastService`].
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Period of the retry pump.
    pub tick_interval: Duration,
    /// Machine id embedded in correlation ids.
    pub machine_id: u16,
    /// Maximum wait for the pump to stop.
    pub shutdown_timeout: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            machine_id: default_machine_id(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl BroadcastConfig {
    /// Set the retry pump period.
    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the correlation id machine id.
    #[must_use]
    pub fn with_machine_id(mut self, machine_id: u16) -> Self {
        self.machine_id = machine_id;
        self
    }

    /// Set the shutdown timeout.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// A running broadcast node: handler plus its background retry pump.
pub struct BroadcastService<T> {
    handler: Arc<GossipHandler<T>>,
    pump: PumpHandle,
    shutdown: ShutdownController,
}

impl<T> BroadcastService<T>
where
    T: Transport + Clone,
{
    /// Start the retry pump on the current runtime.
    pub fn start(transport: T, config: BroadcastConfig) -> Self {
        let shutdown = ShutdownController::new(config.shutdown_timeout);
        let (pump, handle) = RetryPump::new(transport.clone(), config.tick_interval, shutdown.token());
        shutdown.spawn("retry-pump", pump.run());

        let ids = CorrelationIdGenerator::new(config.machine_id);
        let handler = Arc::new(GossipHandler::new(transport, ids, handle.clone()));

        info!(
            tick_interval = ?config.tick_interval,
            machine_id = config.machine_id,
            "Broadcast service started"
        );

        Self {
            handler,
            pump: handle,
            shutdown,
        }
    }

    pub fn handler(&self) -> &Arc<GossipHandler<T>> {
        &self.handler
    }

    /// Current retry queue statistics.
    pub async fn queue_stats(&self) -> Result<QueueStats> {
        self.pump.stats().await
    }

    /// Stop the retry pump. Entries still queued are dropped.
    pub async fn shutdown(self) {
        match self.pump.stats().await {
            Ok(stats) => info!(
                pending = stats.pending,
                resends = stats.resends,
                acknowledged = stats.acknowledged,
                "Stopping broadcast service"
            ),
            Err(_) => info!("Stopping broadcast service, retry pump already gone"),
        }
        self.shutdown.shutdown().await;
    }
}

impl BroadcastService<NodeHandle> {
    /// Start the service on `node` and register its request handlers.
    pub fn attach(node: &mut Node, config: BroadcastConfig) -> Self {
        let service = Self::start(node.handle(), config);

        let handler = Arc::clone(&service.handler);
        node.register(BROADCAST, move |_, request| {
            handler.handle_broadcast(&request).map_err(Into::into)
        });
        let handler = Arc::clone(&service.handler);
        node.register(READ, move |_, request| {
            handler.handle_read(&request).map_err(Into::into)
        });
        let handler = Arc::clone(&service.handler);
        node.register(TOPOLOGY, move |_, request| {
            handler.handle_topology(&request).map_err(Into::into)
        });

        service
    }
}
