//! Reduce the whole time series of every pixel to a single slice.

use crate::aggregate::PixelAccumulator;
use crate::chunk::ChunkData;
use crate::error::{CubeError, Result};
use crate::reference::{ChunkIndex, CubeReference};

use super::{Band, BandList, Cube, CubeRef, CubeSpec, ReducerSpec};

/// Output bands are named `{band}_{reducer}`. Input time chunks are folded
/// one at a time in ascending order, so peak memory is one input chunk plus
/// the aggregation state (except for median, which keeps the series).
pub struct ReduceTimeCube {
    input: CubeRef,
    reference: CubeReference,
    bands: BandList,
    reducers: Vec<ReducerSpec>,
    band_index: Vec<usize>,
}

impl ReduceTimeCube {
    pub fn new(input: CubeRef, reducers: Vec<ReducerSpec>) -> Result<Self> {
        if reducers.is_empty() {
            return Err(CubeError::config("reduce_time needs at least one reducer"));
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
            reference: input.reference().derive_single_slice(),
            input,
            bands,
            reducers,
            band_index,
        })
    }
}

impl Cube for ReduceTimeCube {
    fn reference(&self) -> &CubeReference {
        &self.reference
    }

    fn bands(&self) -> &BandList {
        &self.bands
    }

    fn compute_chunk(&self, idx: ChunkIndex) -> Result<ChunkData> {
        let [nb, _, ny, nx] = self.chunk_shape(idx)?;
        let plane = ny * nx;
        let mut accs: Vec<PixelAccumulator> = self
            .reducers
            .iter()
            .map(|r| PixelAccumulator::new(r.reducer, plane))
            .collect();

        let input_ref = self.input.reference();
        let (input_time_chunks, _, _) = input_ref.chunk_counts();
        for ct in 0..input_time_chunks {
            let input_idx = ChunkIndex::new(ct, idx.y, idx.x);
            let t0 = input_ref.chunk_window(input_idx)?.t0;
            let chunk = self.input.compute_chunk(input_idx)?;
            for t in 0..chunk.nt() {
                for (acc, &b) in accs.iter_mut().zip(&self.band_index) {
                    acc.fold(chunk.plane(b, t), t0 + t);
                }
            }
        }

        let mut out = ChunkData::nodata([nb, 1, ny, nx]);
        for (b, acc) in accs.into_iter().enumerate() {
            out.plane_mut(b, 0).copy_from_slice(&acc.finalize());
        }
        Ok(out)
    }

    fn spec(&self) -> CubeSpec {
        CubeSpec::ReduceTime {
            input: Box::new(self.input.spec()),
            reducers: self.reducers.clone(),
        }
    }
}
