//! Catalog server - HTTP API and data aging scheduler for the backup
//! catalog engine.

mod config;
mod error;
mod routes;
mod services;
mod state;

use crate::config::{AppConfig, Args};
use crate::services::data_aging::DataAgingScheduler;
use crate::state::AppState;
use catalog_core::{utils, CatalogEngine};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = AppConfig::from_env(&args)?;

    utils::logger::init(&config.log_level)?;
    tracing::info!(
        "Starting catalog-server v{} on port {} (data dir {})",
        env!("CARGO_PKG_VERSION"),
        config.port,
        config.engine.data_dir.display()
    );

    std::fs::create_dir_all(&config.restores_dir)?;
    let engine_config = config.engine.clone();
    let engine = tokio::task::spawn_blocking(move || CatalogEngine::open(engine_config)).await??;
    let engine = Arc::new(engine);

    let state = Arc::new(AppState::new(engine.clone(), config.clone()));

    // Data aging schedule
    let scheduler = match DataAgingScheduler::new(state.clone()).await {
        Ok(s) => {
            if let Err(e) = s.schedule(&config.engine.retention.data_aging_cron).await {
                tracing::warn!("Failed to schedule data aging: {}", e);
            }
            if let Err(e) = s.start().await {
                tracing::warn!("Failed to start scheduler: {}", e);
            }
            Some(s)
        }
        Err(e) => {
            tracing::warn!("Failed to create scheduler: {}", e);
            None
        }
    };

    let app = routes::create_router(state.clone());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    let cancel = CancellationToken::new();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    tracing::info!("Shutting down...");

    // In-flight browses stop at their next step
    for entry in state.browse_requests.iter() {
        entry.value().cancel();
    }

    if let Some(s) = scheduler {
        if let Err(e) = s.shutdown().await {
            tracing::warn!("Scheduler shutdown error: {}", e);
        }
    }

    engine.close();
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
        _ = cancel.cancelled() => {}
    }

    cancel.cancel();
}
