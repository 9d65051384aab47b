//! Mask pixels that fail a predicate.

use crate::chunk::ChunkData;
use crate::error::Result;
use crate::expr::PixelExpr;
use crate::reference::{ChunkIndex, CubeReference};

use super::{BandList, Cube, CubeRef, CubeSpec};

/// Sets every band of a pixel to nodata where the predicate is false or
/// nodata.
pub struct FilterPixelCube {
    input: CubeRef,
    predicate: PixelExpr,
}

impl FilterPixelCube {
    pub fn new(input: CubeRef, predicate: &str) -> Result<Self> {
        let predicate = PixelExpr::compile(predicate, &input.bands().names())?;
        Ok(Self { input, predicate })
    }
}

impl Cube for FilterPixelCube {
    fn reference(&self) -> &CubeReference {
        self.input.reference()
    }

    fn bands(&self) -> &BandList {
        self.input.bands()
    }

    fn compute_chunk(&self, idx: ChunkIndex) -> Result<ChunkData> {
        let mut chunk = self.input.compute_chunk(idx)?;
        let nb = chunk.nbands();
        let band_len = chunk.band_len();
        let mut pixel = vec![0.0; nb];
        for i in 0..band_len {
            for (b, v) in pixel.iter_mut().enumerate() {
                *v = chunk.values()[b * band_len + i];
            }
            if !self.predicate.test(&pixel) {
                for b in 0..nb {
                    chunk.values_mut()[b * band_len + i] = f64::NAN;
                }
            }
        }
        Ok(chunk)
    }

    fn spec(&self) -> CubeSpec {
        CubeSpec::FilterPixel {
            input: Box::new(self.input.spec()),
            predicate: self.predicate.source().to_string(),
        }
    }
}
