//! Mask pixels whose centre lies outside a polygon.

use crate::chunk::ChunkData;
use crate::error::Result;
use crate::geometry::Polygon;
use crate::reference::{ChunkIndex, CubeReference};

use super::{BandList, Cube, CubeRef, CubeSpec};

pub struct FilterGeomCube {
    input: CubeRef,
    polygon: Polygon,
}

impl FilterGeomCube {
    /// `rings` are closed or open polygon rings in the cube's coordinates;
    /// inside-ness follows the even-odd rule, so inner rings act as holes.
    pub fn new(input: CubeRef, rings: Vec<Vec<[f64; 2]>>) -> Result<Self> {
        let polygon = Polygon::new(rings)?;
        Ok(Self { input, polygon })
    }
}

impl Cube for FilterGeomCube {
    fn reference(&self) -> &CubeReference {
        self.input.reference()
    }

    fn bands(&self) -> &BandList {
        self.input.bands()
    }

    fn compute_chunk(&self, idx: ChunkIndex) -> Result<ChunkData> {
        let reference = self.input.reference();
        let bounds = reference.bounds_of(idx)?;
        // Chunks entirely outside the polygon's bounding box never touch the input.
        if !self.polygon.bbox_touches(&bounds.extent) {
            return Ok(ChunkData::nodata(self.chunk_shape(idx)?));
        }

        let mut chunk = self.input.compute_chunk(idx)?;
        let w = bounds.window;
        let (dx, dy) = (reference.dx(), reference.dy());
        let (nb, nt, ny, nx) = (chunk.nbands(), chunk.nt(), chunk.ny(), chunk.nx());
        for y in 0..ny {
            let cy = reference.extent.bottom + ((w.y0 + y) as f64 + 0.5) * dy;
            for x in 0..nx {
                let cx = reference.extent.left + ((w.x0 + x) as f64 + 0.5) * dx;
                if self.polygon.contains(cx, cy) {
                    continue;
                }
                for b in 0..nb {
                    for t in 0..nt {
                        chunk.set(b, t, y, x, f64::NAN);
                    }
                }
            }
        }
        Ok(chunk)
    }

    fn spec(&self) -> CubeSpec {
        CubeSpec::FilterGeom {
            input: Box::new(self.input.spec()),
            rings: self.polygon.rings().to_vec(),
        }
    }
}
