//! Broadcast node binary.
//!
//! Speaks line-delimited JSON on stdin/stdout; logs go to stderr.

mod config;

use config::NodeConfig;
use rumor_broadcast::BroadcastService;
use rumor_transport::Node;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries protocol traffic
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rumor_node=info,rumor_broadcast=info,rumor_transport=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = NodeConfig::from_env()?;
    tracing::info!(?config, "Starting rumor node");

    let mut node = Node::new();
    let service = BroadcastService::attach(&mut node, config.broadcast());

    let result = node.run().await;
    service.shutdown().await;
    result?;

    tracing::info!("Input closed, node stopped");
    Ok(())
}
