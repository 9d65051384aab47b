//! Configuration for the cube engine.

use serde::{Deserialize, Serialize};

use crate::reference::ChunkShape;

/// Engine-wide defaults shared by the runner, the worker and the backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Chunk shape used when a cube description does not specify one.
    pub default_chunk_shape: ChunkShape,

    /// Worker count of the multithreaded backend.
    pub threads: usize,

    /// Memory budget for the chunk cache in megabytes.
    pub chunk_cache_size_mb: usize,

    /// Per-request timeout for swarm workers, in seconds.
    pub swarm_request_timeout_secs: u64,

    /// How many times a chunk is reassigned after a worker became unreachable.
    pub swarm_retry_budget: u32,

    /// Default edge policy of window-time operators.
    pub window_edge_policy: EdgePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_chunk_shape: ChunkShape::new(16, 256, 256),
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            chunk_cache_size_mb: 1024,
            swarm_request_timeout_secs: 60,
            swarm_retry_budget: 3,
            window_edge_policy: EdgePolicy::Shrink,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("CUBE_CHUNK_SHAPE") {
            if let Some(shape) = parse_chunk_shape(&val) {
                config.default_chunk_shape = shape;
            }
        }

        if let Ok(val) = std::env::var("CUBE_THREADS") {
            if let Ok(n) = val.parse() {
                config.threads = n;
            }
        }

        if let Ok(val) = std::env::var("CUBE_CHUNK_CACHE_SIZE_MB") {
            if let Ok(size) = val.parse() {
                config.chunk_cache_size_mb = size;
            }
        }

        if let Ok(val) = std::env::var("CUBE_SWARM_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.swarm_request_timeout_secs = secs;
            }
        }

        if let Ok(val) = std::env::var("CUBE_SWARM_RETRY_BUDGET") {
            if let Ok(budget) = val.parse() {
                config.swarm_retry_budget = budget;
            }
        }

        if let Ok(val) = std::env::var("CUBE_WINDOW_EDGE_POLICY") {
            config.window_edge_policy = EdgePolicy::from_str(&val);
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        let shape = &self.default_chunk_shape;
        if shape.t == 0 || shape.y == 0 || shape.x == 0 {
            return Err("default_chunk_shape dimensions must be > 0".to_string());
        }

        if self.threads == 0 {
            return Err("threads must be > 0".to_string());
        }

        if self.chunk_cache_size_mb == 0 {
            return Err("chunk_cache_size_mb must be > 0".to_string());
        }

        if self.swarm_request_timeout_secs == 0 {
            return Err("swarm_request_timeout_secs must be > 0".to_string());
        }

        Ok(())
    }

    /// Get the chunk cache size in bytes.
    pub fn chunk_cache_size_bytes(&self) -> usize {
        self.chunk_cache_size_mb * 1024 * 1024
    }

    /// Swarm request timeout as a `Duration`.
    pub fn swarm_request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.swarm_request_timeout_secs)
    }
}

/// Parse a "t,y,x" chunk shape.
fn parse_chunk_shape(s: &str) -> Option<ChunkShape> {
    let parts: Vec<usize> = s
        .split(',')
        .map(|p| p.trim().parse().ok())
        .collect::<Option<Vec<_>>>()?;
    match parts.as_slice() {
        [t, y, x] => Some(ChunkShape::new(*t, *y, *x)),
        _ => None,
    }
}

/// How window-time operators treat slices near the ends of the series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgePolicy {
    /// Aggregate over the neighbours that exist.
    Shrink,
    /// Emit nodata when the window is incomplete.
    Nodata,
}

impl Default for EdgePolicy {
    fn default() -> Self {
        Self::Shrink
    }
}

impl EdgePolicy {
    /// Parse from string (case-insensitive).
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "nodata" | "nan" | "propagate" => Self::Nodata,
            _ => Self::Shrink,
        }
    }

    /// Get the policy name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shrink => "shrink",
            Self::Nodata => "nodata",
        }
    }
}

impl std::fmt::Display for EdgePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Execution backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Ascending order on the calling thread.
    Single,
    /// Bounded pool of blocking tasks.
    Multithread,
    /// Remote worker processes.
    Swarm,
}

impl BackendKind {
    /// Parse from string (case-insensitive). Returns `None` for unknown names.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "single" | "sequential" => Some(Self::Single),
            "multithread" | "threads" | "parallel" => Some(Self::Multithread),
            "swarm" | "distributed" => Some(Self::Swarm),
            _ => None,
        }
    }

    /// Get the backend name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Multithread => "multithread",
            Self::Swarm => "swarm",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
