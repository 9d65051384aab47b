//! Band subset / reorder.

use crate::chunk::ChunkData;
use crate::error::Result;
use crate::reference::{ChunkIndex, CubeReference};

use super::{BandList, Cube, CubeRef, CubeSpec};

pub struct SelectBandsCube {
    input: CubeRef,
    bands: BandList,
    /// Input band index of every output band.
    source_index: Vec<usize>,
}

impl SelectBandsCube {
    pub fn new<S: AsRef<str>>(input: CubeRef, bands: &[S]) -> Result<Self> {
        let mut picked = Vec::with_capacity(bands.len());
        let mut source_index = Vec::with_capacity(bands.len());
        for name in bands {
            let i = input.bands().require(name.as_ref())?;
            source_index.push(i);
            if let Some(b) = input.bands().get(i) {
                picked.push(b.clone());
            }
        }
        Ok(Self {
            bands: BandList::new(picked)?,
            input,
            source_index,
        })
    }
}

impl Cube for SelectBandsCube {
    fn reference(&self) -> &CubeReference {
        self.input.reference()
    }

    fn bands(&self) -> &BandList {
        &self.bands
    }

    fn compute_chunk(&self, idx: ChunkIndex) -> Result<ChunkData> {
        let input = self.input.compute_chunk(idx)?;
        let [_, nt, ny, nx] = input.shape();
        let mut out = ChunkData::nodata([self.bands.len(), nt, ny, nx]);
        for (o, &i) in self.source_index.iter().enumerate() {
            out.band_mut(o).copy_from_slice(input.band(i));
        }
        Ok(out)
    }

    fn spec(&self) -> CubeSpec {
        CubeSpec::SelectBands {
            input: Box::new(self.input.spec()),
            bands: self.bands.names(),
        }
    }
}
