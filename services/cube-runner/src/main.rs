//! Cube Runner
//!
//! Evaluates a cube description on the single, multithread or swarm backend.

use anyhow::{bail, Result};
use clap::Parser;
use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

use cube_engine::RunControl;
use cube_runner::{execute, RunnerArgs};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = RunnerArgs::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .json()
        .init();

    let control = RunControl::new();
    let interrupt = control.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            interrupt.cancel();
        }
    });

    let registry = args.source_registry()?;
    let outcome = execute(&args, registry, control).await?;
    if outcome.cancelled {
        bail!(
            "run cancelled after {} of {} chunks",
            outcome.completed.len(),
            outcome.total
        );
    }
    if outcome.failed_count() > 0 {
        bail!(
            "{} of {} chunks failed, first: {}",
            outcome.failed_count(),
            outcome.total,
            outcome.failed_indices()[0]
        );
    }
    Ok(())
}
