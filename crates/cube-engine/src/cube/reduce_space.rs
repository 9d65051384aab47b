//! Reduce every time slice over the whole spatial extent.

use crate::aggregate::PixelAccumulator;
use crate::chunk::ChunkData;
use crate::error::{CubeError, Result};
use crate::reference::{ChunkIndex, CubeReference};

use super::{Band, BandList, Cube, CubeRef, CubeSpec, ReducerSpec};

/// The output covers the input extent with a single pixel and keeps the
/// input's time axis; output chunk `(t, 0, 0)` folds every spatial chunk of
/// input time chunk `t`.
pub struct ReduceSpaceCube {
    input: CubeRef,
    reference: CubeReference,
    bands: BandList,
    reducers: Vec<ReducerSpec>,
    band_index: Vec<usize>,
}

impl ReduceSpaceCube {
    pub fn new(input: CubeRef, reducers: Vec<ReducerSpec>) -> Result<Self> {
        if reducers.is_empty() {
            return Err(CubeError::config("reduce_space needs at least one reducer"));
        }
        if let Some(r) = reducers.iter().find(|r| r.reducer.is_positional()) {
            return Err(CubeError::config(format!(
                "reducer '{}' is not supported by reduce_space",
                r.reducer
            )));
        }
        let band_index = reducers
            .iter()
            .map(|r| input.bands().require(&r.band))
            .collect::<Result<Vec<_>>>()?;
        let bands = BandList::new(
            reducers
                .iter()
                .map(|r| Band::new(r.output_name()))
                .collect(),
        )?;
        Ok(Self {
            reference: input.reference().derive_single_pixel(),
            input,
            bands,
            reducers,
            band_index,
        })
    }
}

impl Cube for ReduceSpaceCube {
    fn reference(&self) -> &CubeReference {
        &self.reference
    }

    fn bands(&self) -> &BandList {
        &self.bands
    }

    fn compute_chunk(&self, idx: ChunkIndex) -> Result<ChunkData> {
        let [nb, nt, _, _] = self.chunk_shape(idx)?;
        let mut accs: Vec<PixelAccumulator> = self
            .reducers
            .iter()
            .map(|r| PixelAccumulator::new(r.reducer, nt))
            .collect();

        let (_, cy, cx) = self.input.reference().chunk_counts();
        for y in 0..cy {
            for x in 0..cx {
                let chunk = self.input.compute_chunk(ChunkIndex::new(idx.t, y, x))?;
                for t in 0..nt {
                    for (acc, &b) in accs.iter_mut().zip(&self.band_index) {
                        for (i, v) in chunk.plane(b, t).iter().enumerate() {
                            acc.fold_at(t, *v, i);
                        }
                    }
                }
            }
        }

        let mut out = ChunkData::nodata([nb, nt, 1, 1]);
        for (b, acc) in accs.into_iter().enumerate() {
            out.band_mut(b).copy_from_slice(&acc.finalize());
        }
        Ok(out)
    }

    fn spec(&self) -> CubeSpec {
        CubeSpec::ReduceSpace {
            input: Box::new(self.input.spec()),
            reducers: self.reducers.clone(),
        }
    }
}
