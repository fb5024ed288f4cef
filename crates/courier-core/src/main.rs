// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Courier node
//!
//! Runs a node with no application services: it answers the `System`
//! interface on its system queue and relays responses. Useful as a
//! deployment probe target and for smoke-testing a queue backend.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};

use courier_core::config::Config;
use courier_core::runtime::NodeRuntime;
use courier_core::transport::{InMemoryTransport, Transport};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("courier_core=info".parse()?),
        )
        .init();

    info!("Starting courier node");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        node = %config.node_name,
        call_queue = %config.call_queue,
        response_queue = %config.response_queue,
        system_queue = %config.system_queue,
        max_attempts = config.max_attempts,
        response_wait_ms = config.response_wait().as_millis() as u64,
        staged_rollout = config.staged_rollout,
        "Configuration loaded"
    );

    let transport = connect_transport(&config).await?;

    let runtime = NodeRuntime::builder()
        .config(config)
        .transport(transport)
        .build()?;
    runtime.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let report = runtime.shutdown().await?;
    for listener in &report.listeners {
        info!(
            listener = %listener.name,
            role = ?listener.role,
            completed = listener.completed,
            "Listener stopped"
        );
    }
    if report.all_completed() {
        info!(elapsed_ms = report.elapsed.as_millis() as u64, "Courier node stopped");
    } else {
        warn!(unfinished = ?report.unfinished(), "Courier node stopped before all work finished");
    }
    Ok(())
}

#[cfg(feature = "redis")]
async fn connect_transport(config: &Config) -> Result<Arc<dyn Transport>> {
    use courier_core::transport::RedisStreamTransport;

    if let Some(url) = &config.redis_url {
        info!("Connecting to Redis...");
        let transport =
            RedisStreamTransport::connect(url, "courier", config.node_name.clone()).await?;
        info!("Redis connection established");
        return Ok(Arc::new(transport));
    }
    info!("COURIER_REDIS_URL not set, using in-memory transport");
    Ok(Arc::new(InMemoryTransport::new()))
}

#[cfg(not(feature = "redis"))]
async fn connect_transport(config: &Config) -> Result<Arc<dyn Transport>> {
    if config.redis_url.is_some() {
        warn!(
            "COURIER_REDIS_URL is set but this build has no redis feature, using in-memory transport"
        );
    }
    Ok(Arc::new(InMemoryTransport::new()))
}
