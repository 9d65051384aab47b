//! Keep only the slices starting at given instants.

use chrono::NaiveDateTime;

use crate::chunk::ChunkData;
use crate::error::Result;
use crate::reference::{ChunkIndex, CubeReference};

use super::{BandList, Cube, CubeRef, CubeSpec};

/// The output has a labeled time axis listing the selected slice starts in
/// ascending order. Instants that do not start an input slice are ignored.
pub struct SelectTimeCube {
    input: CubeRef,
    reference: CubeReference,
    instants: Vec<NaiveDateTime>,
    /// Input slice of every output slice.
    slices: Vec<usize>,
}

impl SelectTimeCube {
    pub fn new(input: CubeRef, instants: Vec<NaiveDateTime>) -> Result<Self> {
        let (reference, slices) = input.reference().derive_time_selection(&instants)?;
        Ok(Self {
            input,
            reference,
            instants,
            slices,
        })
    }
}

impl Cube for SelectTimeCube {
    fn reference(&self) -> &CubeReference {
        &self.reference
    }

    fn bands(&self) -> &BandList {
        self.input.bands()
    }

    fn compute_chunk(&self, idx: ChunkIndex) -> Result<ChunkData> {
        let w = self.reference.chunk_window(idx)?;
        let nb = self.bands().len();
        let mut out = ChunkData::nodata([nb, w.nt(), w.ny(), w.nx()]);

        let input_ref = self.input.reference();
        // Selected slices ascend, so each input time chunk is computed once.
        let mut current: Option<(usize, usize, ChunkData)> = None;
        for j in w.t0..w.t1 {
            let k = self.slices[j];
            let tc = k / input_ref.chunk.t;
            if current.as_ref().map(|(c, _, _)| *c) != Some(tc) {
                let input_idx = ChunkIndex::new(tc, idx.y, idx.x);
                let t0 = input_ref.chunk_window(input_idx)?.t0;
                current = Some((tc, t0, self.input.compute_chunk(input_idx)?));
            }
            if let Some((_, t0, chunk)) = &current {
                for b in 0..nb {
                    out.plane_mut(b, j - w.t0)
                        .copy_from_slice(chunk.plane(b, k - t0));
                }
            }
        }
        Ok(out)
    }

    fn spec(&self) -> CubeSpec {
        CubeSpec::SelectTime {
            input: Box::new(self.input.spec()),
            instants: self.instants.clone(),
        }
    }
}
