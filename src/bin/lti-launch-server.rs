// ABOUTME: HTTP server binary for the LTI launch core
// ABOUTME: Loads configuration, prepares the keyset, serves the router and runs background tasks
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#[cfg(not(unix))]
use std::future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tracing::{error, info};

use lti_launch::config::environment::ServerConfig;
use lti_launch::context::ServerResources;
use lti_launch::logging;
use lti_launch::routes::router;
use lti_launch::tasks::{rotate_keys, BackgroundTasks};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_from_env()?;

    let config = ServerConfig::from_env().context("Invalid configuration")?;
    let port = config.http_port;
    let resources = ServerResources::from_config(config)
        .await
        .context("Failed to initialise server resources")?;
    info!(backend = resources.database.backend_info(), "Database ready");

    // launches and LTI Advantage calls need a signing key from the first request on
    rotate_keys(&resources)
        .await
        .context("Failed to prepare the signing keyset")?;

    let tasks = BackgroundTasks::spawn(&resources);
    let app = router(Arc::new(resources));

    let address = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    info!(%address, "LTI launch server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tasks.shutdown().await;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match unix_signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to listen for SIGTERM: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}
