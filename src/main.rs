//! mirror-proxy - Search-aware mirroring reverse proxy
//!
//! Serves a configured origin site under a path prefix, rewriting links so
//! navigation stays on the proxy, and answers the site's search calls from a
//! crawled content index instead of the origin.

mod config;
mod cors;
mod emulation;
mod error;
mod fetcher;
mod handlers;
mod models;
mod rewriter;
mod router;
mod search;
mod target;
mod validation;

use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{
    config::Config,
    handlers::{app, AppState},
    search::MeiliIndex,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let config = Config::from_env();

    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.port,
        proxy_prefix = %config.proxy_prefix,
        max_concurrent = config.max_concurrent,
        origin_timeout = config.origin_timeout,
        index_url = %config.index_url,
        index_timeout = config.index_timeout,
        search_limit = config.search_limit,
        max_request_body_size = config.max_request_body_size,
        max_response_body_size = config.max_response_body_size,
        server_timeout = config.server_timeout,
        allow_private_ips = config.allow_private_ips,
        "Starting mirror-proxy"
    );

    // Log available profiles at startup
    let profiles = emulation::available_profiles();
    info!(profile_count = profiles.len(), "Loaded TLS profiles");

    let index = MeiliIndex::new(
        &config.index_url,
        config.index_api_key.clone(),
        config.index_timeout,
    )?;

    // Starts unconfigured until an operator posts a target
    let state = AppState::new(config.clone(), Arc::new(index));
    let app = app(state);

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!(address = %addr, "Server listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signals (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
