// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `hive run` - host the coordination substrate until interrupted.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

use hive_core::domain::node_config::NodeConfigManifest;
use hive_core::infrastructure::InMemoryTransport;
use hive_swarm::application::SwarmRuntime;

pub async fn execute(config: NodeConfigManifest) -> Result<()> {
    install_metrics_exporter(config.spec.observability.metrics_port)?;

    // Wire framing is out of scope; peers in this process share an in-memory transport
    let transport = Arc::new(InMemoryTransport::new());
    let runtime = SwarmRuntime::new(&config, transport).context("Failed to build swarm runtime")?;
    runtime.start()?;

    info!(
        node_id = %runtime.node_id(),
        heartbeat_interval = ?config.spec.registry.heartbeat_interval,
        coordination_interval = ?config.spec.allocator.coordination_interval,
        "HIVE node running, press Ctrl+C to stop"
    );

    shutdown_signal().await;

    runtime.shutdown().await;
    info!("{}", runtime.snapshot());
    Ok(())
}

pub fn install_metrics_exporter(port: Option<u16>) -> Result<()> {
    let Some(port) = port else {
        return Ok(());
    };
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("Failed to start Prometheus exporter on {}", addr))?;
    info!("Prometheus metrics exposed on {}", addr);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
