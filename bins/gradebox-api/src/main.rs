mod error;
mod handlers;
mod metrics;
mod routes;

use anyhow::Context;
use axum::Router;
use gradebox_common::config::ServiceConfig;
use gradebox_engine::catalog::RedisCatalog;
use gradebox_engine::config::RuntimeRegistry;
use gradebox_engine::engine::DockerEngine;
use gradebox_engine::executor::Executor;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub executor: Executor,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Gradebox API booting...");

    let config = ServiceConfig::from_env().context("Invalid service configuration")?;

    let runtimes = RuntimeRegistry::load_or_default(&config.runtimes_path)?;
    let engine = DockerEngine::connect(runtimes).context("Failed to create Docker client")?;
    engine.ping().await.context("Docker daemon is not reachable")?;

    match engine.reap_orphans().await {
        Ok(removed) => info!(removed, "Sandbox cleanup complete"),
        Err(e) => warn!(error = %e, "Sandbox cleanup failed"),
    }
    if let Err(e) = engine.warm_up().await {
        warn!(error = %e, "Failed to pre-pull runtime images, will pull on first use");
    }

    let catalog = RedisCatalog::connect(&config.redis_url).await?;
    info!(redis_url = %config.redis_url, "Connected to exercise catalog");

    let bind_addr = config.bind_addr.clone();
    info!(
        max_concurrent = config.max_concurrent,
        queue_timeout_ms = config.queue_timeout.as_millis() as u64,
        "Execution pool configured"
    );

    let executor = Executor::new(Arc::new(engine), Arc::new(catalog), config);
    let state = Arc::new(AppState { executor });

    // Build router
    let app = Router::new().merge(routes::routes()).with_state(state);

    // Start server
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;

    info!("HTTP server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Gradebox API stopped");
    Ok(())
}
