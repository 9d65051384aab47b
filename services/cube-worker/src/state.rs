//! Application state for the worker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::RwLock;
use tracing::info;

use cube_engine::cube::CachedCube;
use cube_engine::{
    ChunkCache, ChunkIndex, Cube, CubeError, CubeFactory, CubeId, CubeSpec, EngineConfig,
    Result, SourceRegistry,
};

/// Shared application state.
pub struct AppState {
    /// Registered graphs, each routed through the shared cache.
    cubes: RwLock<HashMap<CubeId, Arc<CachedCube>>>,

    /// Chunks computed by this worker, shared by all registered graphs.
    pub cache: Arc<ChunkCache>,

    /// Errors of chunks started in the background, kept until the next
    /// download or start of the same chunk.
    failures: Mutex<HashMap<(CubeId, ChunkIndex), CubeError>>,

    factory: CubeFactory,

    pub started: Instant,
}

impl AppState {
    pub fn new(config: &EngineConfig, registry: SourceRegistry) -> Self {
        Self {
            cubes: RwLock::new(HashMap::new()),
            cache: Arc::new(ChunkCache::new(config.chunk_cache_size_bytes())),
            failures: Mutex::new(HashMap::new()),
            factory: CubeFactory::new(registry).with_config(config),
            started: Instant::now(),
        }
    }

    /// Build and remember a graph. Registering the same description twice
    /// returns the same id and keeps the first graph.
    pub async fn register(&self, spec: &CubeSpec) -> Result<CubeId> {
        let cube = self.factory.build(spec)?;
        let id = cube.id();
        let mut cubes = self.cubes.write().await;
        if !cubes.contains_key(&id) {
            info!(cube_id = %id, kind = spec.kind(), chunks = cube.total_chunks(), "Registered cube");
            cubes.insert(id, Arc::new(CachedCube::new(cube, Arc::clone(&self.cache))));
        }
        Ok(id)
    }

    pub async fn cube(&self, id: CubeId) -> Option<Arc<CachedCube>> {
        self.cubes.read().await.get(&id).cloned()
    }

    pub async fn cube_count(&self) -> usize {
        self.cubes.read().await.len()
    }

    pub fn record_failure(&self, id: CubeId, idx: ChunkIndex, error: CubeError) {
        self.failures.lock().insert((id, idx), error);
    }

    /// Remove and return the recorded failure of a chunk.
    pub fn take_failure(&self, id: CubeId, idx: ChunkIndex) -> Option<CubeError> {
        self.failures.lock().remove(&(id, idx))
    }

    pub fn failure_count(&self) -> usize {
        self.failures.lock().len()
    }
}
