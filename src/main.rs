//! ragmem server entry point

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use ragmem::config::RagConfig;
use ragmem::engine::MemoryEngine;
use ragmem::handlers;

const SNAPSHOT_FLUSH_TIMEOUT_SECS: u64 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "ragmem=info,tower_http=warn");
    }
    tracing_subscriber::fmt::init();

    // Missing credentials are fatal at startup
    let config = match RagConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("{e:#}");
            std::process::exit(1);
        }
    };
    config.log();

    let port = config.port;
    let max_concurrent = config.max_concurrent_requests;
    let engine: handlers::AppState = Arc::new(MemoryEngine::from_config(config)?);
    let engine_for_shutdown = Arc::clone(&engine);

    let app = handlers::build_router(Arc::clone(&engine))
        .layer(tower::limit::GlobalConcurrencyLimitLayer::new(max_concurrent));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("ragmem listening on http://{addr}");

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                error!("server error: {e}");
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    // Flush in-memory containers to disk before exit
    let flush = tokio::task::spawn_blocking(move || {
        engine_for_shutdown.flush_snapshots()
    });
    match tokio::time::timeout(
        std::time::Duration::from_secs(SNAPSHOT_FLUSH_TIMEOUT_SECS),
        flush,
    )
    .await
    {
        Ok(Ok(written)) => info!("shutdown complete ({written} containers flushed)"),
        Ok(Err(e)) => error!("snapshot flush panicked: {e}"),
        Err(_) => error!("snapshot flush timed out after {SNAPSHOT_FLUSH_TIMEOUT_SECS}s"),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
