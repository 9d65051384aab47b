//! Band renaming; values pass through untouched.

use crate::chunk::ChunkData;
use crate::error::Result;
use crate::reference::{ChunkIndex, CubeReference};

use super::{Band, BandList, Cube, CubeRef, CubeSpec};

pub struct RenameBandsCube {
    input: CubeRef,
    bands: BandList,
    names: Vec<(String, String)>,
}

impl RenameBandsCube {
    pub fn new(input: CubeRef, names: Vec<(String, String)>) -> Result<Self> {
        let mut bands: Vec<Band> = input.bands().iter().cloned().collect();
        for (old, new) in &names {
            let i = input.bands().require(old)?;
            bands[i].name = new.clone();
        }
        Ok(Self {
            bands: BandList::new(bands)?,
            input,
            names,
        })
    }
}

impl Cube for RenameBandsCube {
    fn reference(&self) -> &CubeReference {
        self.input.reference()
    }

    fn bands(&self) -> &BandList {
        &self.bands
    }

    fn compute_chunk(&self, idx: ChunkIndex) -> Result<ChunkData> {
        self.input.compute_chunk(idx)
    }

    fn spec(&self) -> CubeSpec {
        CubeSpec::RenameBands {
            input: Box::new(self.input.spec()),
            names: self.names.clone(),
        }
    }
}
