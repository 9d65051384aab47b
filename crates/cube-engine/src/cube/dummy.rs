//! Constant-valued cube, used for tests and load generation.

use crate::chunk::ChunkData;
use crate::error::Result;
use crate::reference::{ChunkIndex, CubeReference};

use super::{BandList, Cube, CubeSpec};

pub struct DummyCube {
    reference: CubeReference,
    bands: BandList,
    fill: f64,
}

impl DummyCube {
    pub fn new<S: AsRef<str>>(reference: CubeReference, bands: &[S], fill: f64) -> Result<Self> {
        reference.validate()?;
        Ok(Self {
            reference,
            bands: BandList::from_names(bands)?,
            fill,
        })
    }
}

impl Cube for DummyCube {
    fn reference(&self) -> &CubeReference {
        &self.reference
    }

    fn bands(&self) -> &BandList {
        &self.bands
    }

    fn compute_chunk(&self, idx: ChunkIndex) -> Result<ChunkData> {
        Ok(ChunkData::filled(self.chunk_shape(idx)?, self.fill))
    }

    fn spec(&self) -> CubeSpec {
        CubeSpec::Dummy {
            reference: self.reference.clone(),
            bands: self.bands.names(),
            fill: self.fill,
        }
    }
}
