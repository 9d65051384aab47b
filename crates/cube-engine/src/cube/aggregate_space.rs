//! Reduce blocks of neighbouring pixels to one coarser pixel.

use crate::aggregate::{AggregatorKind, PixelAccumulator};
use crate::chunk::ChunkData;
use crate::error::{CubeError, Result};
use crate::reference::{ChunkIndex, CubeReference, PixelWindow};

use super::{read_window, BandList, Cube, CubeRef, CubeSpec};

/// Output pixel `(x, y)` folds input pixels `[x*fx, (x+1)*fx) x [y*fy, (y+1)*fy)`
/// of every band and time slice. Blocks at the right and top edges may be
/// partial; the output extent is widened to whole blocks.
pub struct AggregateSpaceCube {
    input: CubeRef,
    reference: CubeReference,
    factor: [usize; 2],
    method: AggregatorKind,
}

impl AggregateSpaceCube {
    /// `factor` is `[fx, fy]` in input pixels.
    pub fn new(input: CubeRef, factor: [usize; 2], method: AggregatorKind) -> Result<Self> {
        if method.is_order_sensitive() || method.is_positional() {
            return Err(CubeError::config(format!(
                "reducer '{}' is not supported by aggregate_space",
                method
            )));
        }
        let reference = input.reference().derive_coarser_space(factor[0], factor[1])?;
        Ok(Self {
            input,
            reference,
            factor,
            method,
        })
    }
}

impl Cube for AggregateSpaceCube {
    fn reference(&self) -> &CubeReference {
        &self.reference
    }

    fn bands(&self) -> &BandList {
        self.input.bands()
    }

    fn compute_chunk(&self, idx: ChunkIndex) -> Result<ChunkData> {
        let w = self.reference.chunk_window(idx)?;
        let [fx, fy] = self.factor;
        let input_ref = self.input.reference();
        let read = PixelWindow {
            t0: w.t0,
            t1: w.t1,
            y0: w.y0 * fy,
            y1: (w.y1 * fy).min(input_ref.ny),
            x0: w.x0 * fx,
            x1: (w.x1 * fx).min(input_ref.nx),
        };
        let input = read_window(self.input.as_ref(), &read)?;

        let nb = self.bands().len();
        let plane = w.ny() * w.nx();
        let mut out = ChunkData::nodata([nb, w.nt(), w.ny(), w.nx()]);
        for b in 0..nb {
            let mut acc = PixelAccumulator::new(self.method, w.nt() * plane);
            for t in 0..read.nt() {
                for y in 0..read.ny() {
                    let row = t * plane + (y / fy) * w.nx();
                    for x in 0..read.nx() {
                        acc.fold_at(row + x / fx, input.get(b, t, y, x), 0);
                    }
                }
            }
            out.band_mut(b).copy_from_slice(&acc.finalize());
        }
        Ok(out)
    }

    fn spec(&self) -> CubeSpec {
        CubeSpec::AggregateSpace {
            input: Box::new(self.input.spec()),
            factor: self.factor,
            method: self.method,
        }
    }
}
