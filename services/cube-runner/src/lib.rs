//! Cube Runner Library
//!
//! Loads a cube description, builds the operator graph and evaluates every
//! chunk on the selected backend, optionally exporting the result to Zarr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::info;

use cube_engine::{
    BackendKind, ChunkCallback, ChunkData, ChunkIndex, ChunkProcessor, Cube, CubeFactory,
    CubeSpec, EngineConfig, HttpWorkerEndpoint, LogProgress, MultiThreadProcessor, RunControl,
    RunOutcome, SingleThreadProcessor, SourceRegistry, SwarmProcessor, WorkerEndpoint, ZarrExport,
};

/// Cube graph runner
#[derive(Parser, Debug, Clone)]
#[command(name = "cube-runner")]
#[command(about = "Evaluate a cube graph chunk by chunk on a chosen backend")]
pub struct RunnerArgs {
    /// Cube description (JSON, or YAML with a .yaml/.yml extension)
    #[arg(short, long)]
    pub spec: PathBuf,

    /// Execution backend: single, multithread or swarm
    #[arg(
        short,
        long,
        default_value = "multithread",
        value_parser = parse_backend,
        env = "CUBE_BACKEND"
    )]
    pub backend: BackendKind,

    /// Threads of the multithreaded backend (overrides CUBE_THREADS)
    #[arg(long)]
    pub threads: Option<usize>,

    /// Text file with one worker URL per line (swarm backend)
    #[arg(long)]
    pub workers: Option<PathBuf>,

    /// Write the result to this Zarr directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Image collections file (YAML or JSON) for source leaves
    #[arg(long, env = "CUBE_COLLECTIONS")]
    pub collections: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,
}

fn parse_backend(s: &str) -> std::result::Result<BackendKind, String> {
    BackendKind::parse(s)
        .ok_or_else(|| format!("unknown backend '{}', expected single, multithread or swarm", s))
}

impl RunnerArgs {
    /// Engine configuration from the environment with command line overrides.
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::from_env();
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        config
    }

    /// Collections named by `--collections`, or none.
    pub fn source_registry(&self) -> Result<SourceRegistry> {
        match &self.collections {
            Some(path) => SourceRegistry::from_file(path)
                .with_context(|| format!("failed to load collections from {}", path.display())),
            None => Ok(SourceRegistry::new()),
        }
    }
}

/// Read a cube description; YAML is chosen by file extension.
pub fn load_spec(path: &Path) -> Result<CubeSpec> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    );
    let spec = if yaml {
        serde_yaml::from_str(&text)
            .with_context(|| format!("invalid cube description in {}", path.display()))?
    } else {
        serde_json::from_str(&text)
            .with_context(|| format!("invalid cube description in {}", path.display()))?
    };
    Ok(spec)
}

/// Instantiate the backend selected on the command line.
pub fn processor(args: &RunnerArgs, config: &EngineConfig) -> Result<Box<dyn ChunkProcessor>> {
    let processor: Box<dyn ChunkProcessor> = match args.backend {
        BackendKind::Single => Box::new(SingleThreadProcessor),
        BackendKind::Multithread => Box::new(MultiThreadProcessor::from_config(config)),
        BackendKind::Swarm => {
            let path = args
                .workers
                .as_ref()
                .context("the swarm backend needs --workers")?;
            let workers: Vec<Arc<dyn WorkerEndpoint>> =
                HttpWorkerEndpoint::from_txtfile(path, config.swarm_request_timeout())?
                    .into_iter()
                    .map(|w| Arc::new(w) as Arc<dyn WorkerEndpoint>)
                    .collect();
            Box::new(SwarmProcessor::new(workers).with_config(config))
        }
    };
    Ok(processor)
}

/// Build the graph described by `args.spec` and evaluate all of its chunks.
pub async fn execute(
    args: &RunnerArgs,
    registry: SourceRegistry,
    control: RunControl,
) -> Result<RunOutcome> {
    let config = args.engine_config();
    config
        .validate()
        .map_err(|e| anyhow!("invalid engine configuration: {}", e))?;

    let spec = load_spec(&args.spec)?;
    let cube = CubeFactory::new(registry)
        .with_config(&config)
        .build(&spec)
        .context("failed to build cube graph")?;
    info!(
        kind = spec.kind(),
        cube_id = %cube.id(),
        bands = ?cube.bands().names(),
        chunks = cube.total_chunks(),
        "Cube graph built"
    );

    let callback: Arc<dyn ChunkCallback> = match &args.output {
        Some(path) => Arc::new(ZarrExport::create(path, cube.as_ref())?),
        None => Arc::new(|_: ChunkIndex, _: ChunkData| -> cube_engine::Result<()> { Ok(()) }),
    };

    let processor = processor(args, &config)?;
    let outcome = processor
        .run(
            Arc::clone(&cube),
            cube.reference().all_chunks(),
            callback,
            Arc::new(LogProgress::default()),
            control,
        )
        .await?;

    info!(
        run_id = %outcome.run_id,
        backend = processor.name(),
        completed = outcome.completed.len(),
        failed = outcome.failed_count(),
        cancelled = outcome.cancelled,
        elapsed_ms = outcome.elapsed.as_millis() as u64,
        "Run finished"
    );
    Ok(outcome)
}
