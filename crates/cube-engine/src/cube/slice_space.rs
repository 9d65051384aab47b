//! Extract the time series of a single pixel.

use crate::chunk::ChunkData;
use crate::error::{CubeError, Result};
use crate::reference::{ChunkIndex, CubeReference};

use super::{BandList, Cube, CubeRef, CubeSpec};

/// The pixel is addressed by `[column, row]` (rows count from the bottom) or
/// by a coordinate inside it. The output is a 1 x 1 grid covering that pixel
/// and keeps the input's time axis and time chunking.
pub struct SliceSpaceCube {
    input: CubeRef,
    reference: CubeReference,
    pixel: Option<[usize; 2]>,
    point: Option<[f64; 2]>,
    column: usize,
    row: usize,
}

impl SliceSpaceCube {
    /// Exactly one of `pixel` and `point` must be given.
    pub fn new(input: CubeRef, pixel: Option<[usize; 2]>, point: Option<[f64; 2]>) -> Result<Self> {
        let parent = input.reference();
        let (column, row) = match (pixel, point) {
            (Some([ix, iy]), None) => (ix, iy),
            (None, Some([x, y])) => parent.pixel_of(x, y)?,
            _ => {
                return Err(CubeError::config(
                    "slice_space needs exactly one of pixel or point",
                ))
            }
        };
        let reference = parent.derive_pixel(column, row)?;
        Ok(Self {
            input,
            reference,
            pixel,
            point,
            column,
            row,
        })
    }
}

impl Cube for SliceSpaceCube {
    fn reference(&self) -> &CubeReference {
        &self.reference
    }

    fn bands(&self) -> &BandList {
        self.input.bands()
    }

    fn compute_chunk(&self, idx: ChunkIndex) -> Result<ChunkData> {
        let [nb, nt, _, _] = self.chunk_shape(idx)?;
        let input_ref = self.input.reference();
        let input_idx = ChunkIndex::new(
            idx.t,
            self.row / input_ref.chunk.y,
            self.column / input_ref.chunk.x,
        );
        let w = input_ref.chunk_window(input_idx)?;
        let chunk = self.input.compute_chunk(input_idx)?;
        let (y, x) = (self.row - w.y0, self.column - w.x0);
        let mut out = ChunkData::nodata([nb, nt, 1, 1]);
        for b in 0..nb {
            for t in 0..nt {
                out.set(b, t, 0, 0, chunk.get(b, t, y, x));
            }
        }
        Ok(out)
    }

    fn spec(&self) -> CubeSpec {
        CubeSpec::SliceSpace {
            input: Box::new(self.input.spec()),
            pixel: self.pixel,
            point: self.point,
        }
    }
}
