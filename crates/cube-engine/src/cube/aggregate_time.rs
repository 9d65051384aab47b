//! Change the temporal granularity of a cube.

use chrono::NaiveDateTime;

use crate::aggregate::{AggregatorKind, PixelAccumulator};
use crate::chunk::ChunkData;
use crate::datetime::TimeStep;
use crate::error::Result;
use crate::reference::{ChunkIndex, CubeReference};

use super::{BandList, Cube, CubeRef, CubeSpec};

/// Every coarse slice folds the input slices that start inside it. Band
/// names are kept. Input time chunks are folded one at a time, so a chunk
/// never holds more than one input chunk besides the aggregation state.
pub struct AggregateTimeCube {
    input: CubeRef,
    reference: CubeReference,
    method: AggregatorKind,
}

impl AggregateTimeCube {
    pub fn new(input: CubeRef, dt: TimeStep, method: AggregatorKind) -> Result<Self> {
        let reference = input.reference().derive_coarser_time(dt)?;
        Ok(Self {
            input,
            reference,
            method,
        })
    }

    /// First input slice starting at or after `t`, capped at `nt`.
    fn first_input_slice_from(&self, t: NaiveDateTime) -> usize {
        let input = self.input.reference();
        let mut k = input.slice_position(t).max(0) as usize;
        if k < input.nt && input.datetime_at(k) < t {
            k += 1;
        }
        k.min(input.nt)
    }
}

impl Cube for AggregateTimeCube {
    fn reference(&self) -> &CubeReference {
        &self.reference
    }

    fn bands(&self) -> &BandList {
        self.input.bands()
    }

    fn compute_chunk(&self, idx: ChunkIndex) -> Result<ChunkData> {
        let w = self.reference.chunk_window(idx)?;
        let k0 = self.first_input_slice_from(self.reference.datetime_at(w.t0));
        let k1 = self.first_input_slice_from(self.reference.datetime_at(w.t1));

        let nb = self.bands().len();
        let plane = w.ny() * w.nx();
        let mut accs: Vec<PixelAccumulator> = (0..nb * w.nt())
            .map(|_| PixelAccumulator::new(self.method, plane))
            .collect();

        let input_ref = self.input.reference();
        if k1 > k0 {
            let ct = input_ref.chunk.t;
            for tc in k0 / ct..=(k1 - 1) / ct {
                let input_idx = ChunkIndex::new(tc, idx.y, idx.x);
                let t0 = input_ref.chunk_window(input_idx)?.t0;
                let chunk = self.input.compute_chunk(input_idx)?;
                for t in 0..chunk.nt() {
                    let k = t0 + t;
                    if k < k0 || k >= k1 {
                        continue;
                    }
                    let j = match self.reference.slice_index_of(input_ref.datetime_at(k)) {
                        Some(j) if j >= w.t0 && j < w.t1 => j - w.t0,
                        _ => continue,
                    };
                    for b in 0..nb {
                        accs[b * w.nt() + j].fold(chunk.plane(b, t), k);
                    }
                }
            }
        }

        let mut out = ChunkData::nodata([nb, w.nt(), w.ny(), w.nx()]);
        for (slot, acc) in accs.into_iter().enumerate() {
            out.plane_mut(slot / w.nt(), slot % w.nt())
                .copy_from_slice(&acc.finalize());
        }
        Ok(out)
    }

    fn spec(&self) -> CubeSpec {
        CubeSpec::AggregateTime {
            input: Box::new(self.input.spec()),
            dt: self.reference.dt,
            method: self.method,
        }
    }
}
