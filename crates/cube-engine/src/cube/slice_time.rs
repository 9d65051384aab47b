//! Extract a single time slice.

use chrono::NaiveDateTime;

use crate::chunk::ChunkData;
use crate::error::{CubeError, Result};
use crate::reference::{ChunkIndex, ChunkShape, CubeReference};

use super::{BandList, Cube, CubeRef, CubeSpec};

/// The slice is addressed by index or by any instant inside it; the output
/// keeps the input grid with a time axis of length one.
pub struct SliceTimeCube {
    input: CubeRef,
    reference: CubeReference,
    index: Option<usize>,
    datetime: Option<NaiveDateTime>,
    slice: usize,
}

impl SliceTimeCube {
    /// Exactly one of `index` and `datetime` must be given.
    pub fn new(
        input: CubeRef,
        index: Option<usize>,
        datetime: Option<NaiveDateTime>,
    ) -> Result<Self> {
        let parent = input.reference();
        let slice = match (index, datetime) {
            (Some(k), None) if k < parent.nt => k,
            (Some(k), None) => {
                return Err(CubeError::out_of_bounds(
                    format!("time slice {}", k),
                    format!("{} slices", parent.nt),
                ))
            }
            (None, Some(t)) => parent.slice_index_of(t).ok_or_else(|| {
                CubeError::out_of_bounds(
                    t.to_string(),
                    format!("[{}, {})", parent.start(), parent.end()),
                )
            })?,
            _ => {
                return Err(CubeError::config(
                    "slice_time needs exactly one of index or datetime",
                ))
            }
        };
        let at = parent.datetime_at(slice);
        let mut reference = parent.derive_time_subset(at, at)?;
        reference.chunk = ChunkShape::new(1, parent.chunk.y, parent.chunk.x);
        Ok(Self {
            input,
            reference,
            index,
            datetime,
            slice,
        })
    }
}

impl Cube for SliceTimeCube {
    fn reference(&self) -> &CubeReference {
        &self.reference
    }

    fn bands(&self) -> &BandList {
        self.input.bands()
    }

    fn compute_chunk(&self, idx: ChunkIndex) -> Result<ChunkData> {
        let [nb, _, ny, nx] = self.chunk_shape(idx)?;
        let input_ref = self.input.reference();
        let input_idx = ChunkIndex::new(self.slice / input_ref.chunk.t, idx.y, idx.x);
        let t = self.slice - input_ref.chunk_window(input_idx)?.t0;
        let chunk = self.input.compute_chunk(input_idx)?;
        let mut out = ChunkData::nodata([nb, 1, ny, nx]);
        for b in 0..nb {
            out.plane_mut(b, 0).copy_from_slice(chunk.plane(b, t));
        }
        Ok(out)
    }

    fn spec(&self) -> CubeSpec {
        CubeSpec::SliceTime {
            input: Box::new(self.input.spec()),
            index: self.index,
            datetime: self.datetime,
        }
    }
}
