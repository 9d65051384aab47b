//! Command line and environment configuration of the worker.

use std::path::PathBuf;

use clap::Parser;
use cube_engine::{EngineConfig, Result, SourceRegistry};

/// Swarm worker computing cube chunks over HTTP
#[derive(Parser, Debug, Clone)]
#[command(name = "cube-worker")]
#[command(about = "Chunk computation worker for the cube-engine swarm backend")]
pub struct WorkerArgs {
    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:8090", env = "CUBE_WORKER_LISTEN")]
    pub listen: String,

    /// Chunk cache budget in megabytes (overrides CUBE_CHUNK_CACHE_SIZE_MB)
    #[arg(long, env = "CUBE_WORKER_CACHE_SIZE_MB")]
    pub cache_size_mb: Option<usize>,

    /// Log level
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Number of runtime worker threads
    #[arg(long, env = "CUBE_WORKER_THREADS")]
    pub worker_threads: Option<usize>,

    /// Image collections file (YAML or JSON) for source leaves
    #[arg(long, env = "CUBE_COLLECTIONS")]
    pub collections: Option<PathBuf>,
}

impl WorkerArgs {
    /// Engine configuration from the environment with command line overrides.
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::from_env();
        if let Some(mb) = self.cache_size_mb {
            config.chunk_cache_size_mb = mb;
        }
        config
    }

    /// Collections named by `--collections`, or none.
    pub fn source_registry(&self) -> Result<SourceRegistry> {
        match &self.collections {
            Some(path) => SourceRegistry::from_file(path),
            None => Ok(SourceRegistry::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_size_override() {
        let args = WorkerArgs::try_parse_from([
            "cube-worker",
            "--listen",
            "127.0.0.1:9000",
            "--cache-size-mb",
            "64",
        ])
        .unwrap();
        assert_eq!(args.listen, "127.0.0.1:9000");
        assert_eq!(args.engine_config().chunk_cache_size_mb, 64);
    }

    #[test]
    fn test_collections_are_optional() {
        let args = WorkerArgs::try_parse_from(["cube-worker"]).unwrap();
        assert!(args.source_registry().unwrap().names().is_empty());

        let args =
            WorkerArgs::try_parse_from(["cube-worker", "--collections", "/nonexistent.yaml"])
                .unwrap();
        assert!(args.source_registry().is_err());
    }

    #[test]
    fn test_rejects_bad_cache_size() {
        assert!(WorkerArgs::try_parse_from(["cube-worker", "--cache-size-mb", "lots"]).is_err());
    }
}
