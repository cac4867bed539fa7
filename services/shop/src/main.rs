//! Shop service node.
//!
//! Runs the consumers of one service role (`SERVICE=cart|product|store|notification|user`)
//! against Redpanda and Redis until Ctrl-C.

use relay_core::{MessageBroker, RendezvousStore};
use relay_redis::RedisRendezvousStore;
use relay_redpanda::RedpandaBroker;
use relay_runtime::metrics::MetricsServer;
use shop_services::{Collaborators, Config, ServiceNode};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shop_services=info,relay_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    config.validate()?;
    info!(
        role = %config.role,
        brokers = %config.kafka.brokers,
        deadline_ms = config.relay.deadline.as_millis(),
        ttl_ms = config.relay.response_ttl.as_millis(),
        "Configuration loaded"
    );

    // Metrics exporter stays alive for the whole run
    let _metrics = match config.metrics_addr {
        Some(addr) => {
            let mut server = MetricsServer::new(addr);
            server.start()?;
            info!(%addr, "Metrics exporter listening");
            Some(server)
        }
        None => None,
    };

    info!("Connecting to Redpanda...");
    let broker: Arc<dyn MessageBroker> = Arc::new(
        RedpandaBroker::builder()
            .brokers(&config.kafka.brokers)
            .producer_acks(&config.kafka.acks)
            .auto_offset_reset(&config.kafka.offset_reset)
            .build()?,
    );

    info!("Connecting to Redis...");
    let store: Arc<dyn RendezvousStore> =
        Arc::new(RedisRendezvousStore::new(&config.redis.url).await?);

    let mut node = ServiceNode::new(
        config.role,
        &config.relay,
        broker,
        store,
        Collaborators::in_memory(),
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    let handles = node.spawn(&shutdown_tx);
    info!(role = %node.role(), consumers = handles.len(), "Service node running");

    signal::ctrl_c().await?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, futures::future::join_all(handles)).await {
        Ok(_) => info!("All consumers stopped"),
        Err(_) => warn!(timeout_secs = SHUTDOWN_TIMEOUT.as_secs(), "Consumers did not stop in time"),
    }

    Ok(())
}
