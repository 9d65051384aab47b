//! Route chunk computation of any cube through a shared [`ChunkCache`].

use std::sync::Arc;

use crate::cache::ChunkCache;
use crate::chunk::ChunkData;
use crate::error::Result;
use crate::reference::{ChunkIndex, CubeReference};

use super::{BandList, Cube, CubeId, CubeRef, CubeSpec};

/// Transparent caching wrapper: same reference, bands, description and id
/// as the wrapped cube.
pub struct CachedCube {
    input: CubeRef,
    cache: Arc<ChunkCache>,
    id: CubeId,
}

impl CachedCube {
    pub fn new(input: CubeRef, cache: Arc<ChunkCache>) -> Self {
        let id = input.id();
        Self { input, cache, id }
    }

    /// The shared chunk without copying it.
    pub fn shared_chunk(&self, idx: ChunkIndex) -> Result<Arc<ChunkData>> {
        self.cache
            .get_or_compute(self.id, idx, || self.input.compute_chunk(idx))
    }
}

impl Cube for CachedCube {
    fn reference(&self) -> &CubeReference {
        self.input.reference()
    }

    fn bands(&self) -> &BandList {
        self.input.bands()
    }

    fn compute_chunk(&self, idx: ChunkIndex) -> Result<ChunkData> {
        Ok(self.shared_chunk(idx)?.as_ref().clone())
    }

    fn spec(&self) -> CubeSpec {
        self.input.spec()
    }

    fn id(&self) -> CubeId {
        self.id
    }
}
