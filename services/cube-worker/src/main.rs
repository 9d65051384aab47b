//! Cube Worker Server
//!
//! Computes chunks of registered cube graphs for the swarm backend.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::get, Extension};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use cube_worker::config::WorkerArgs;
use cube_worker::handlers;
use cube_worker::state::AppState;

fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = WorkerArgs::parse();

    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();
    if let Some(threads) = args.worker_threads {
        runtime_builder.worker_threads(threads);
    }
    let runtime = runtime_builder
        .build()
        .context("failed to create Tokio runtime")?;

    runtime.block_on(run_server(args))
}

async fn run_server(args: WorkerArgs) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .json()
        .init();

    let prometheus_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;

    let config = args.engine_config();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid engine configuration: {}", e))?;
    info!(
        cache_mb = config.chunk_cache_size_mb,
        "Starting cube worker"
    );

    // Without --collections only graphs without source leaves can be served.
    let registry = args
        .source_registry()
        .map_err(|e| anyhow::anyhow!("failed to load image collections: {}", e))?;
    info!(collections = ?registry.names(), "Loaded image collections");
    let state = Arc::new(AppState::new(&config, registry));

    let app = cube_worker::router(state)
        .route("/metrics", get(handlers::metrics_handler))
        .layer(Extension(prometheus_handle));

    let addr: SocketAddr = args
        .listen
        .parse()
        .with_context(|| format!("invalid listen address {}", args.listen))?;
    info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app).await.context("server failed")?;
    Ok(())
}
