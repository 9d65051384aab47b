//! Spatial and temporal subsetting.

use chrono::NaiveDateTime;

use crate::chunk::ChunkData;
use crate::error::Result;
use crate::reference::{ChunkIndex, CubeReference, PixelWindow, SpatialExtent};

use super::{read_window, BandList, Cube, CubeRef, CubeSpec};

/// The output grid is the input grid restricted to the pixels overlapping
/// `extent` and the slices overlapping `[start, end]`, rechunked from the
/// new origin. Chunks therefore read input windows across chunk borders.
pub struct CropCube {
    input: CubeRef,
    reference: CubeReference,
    extent: Option<SpatialExtent>,
    start: Option<NaiveDateTime>,
    end: Option<NaiveDateTime>,
    offset: (usize, usize, usize),
}

impl CropCube {
    pub fn new(
        input: CubeRef,
        extent: Option<SpatialExtent>,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Self> {
        let parent = input.reference();
        let mut reference = parent.clone();
        if let Some(rect) = &extent {
            reference = reference.derive_spatial_subset(rect)?;
        }
        if start.is_some() || end.is_some() {
            let from = start.unwrap_or_else(|| parent.start());
            let to = end.unwrap_or_else(|| parent.datetime_at(parent.nt - 1));
            reference = reference.derive_time_subset(from, to)?;
        }

        let offset_t = parent.slice_position(reference.start()).max(0) as usize;
        let offset_y = ((reference.extent.bottom - parent.extent.bottom) / parent.dy()).round() as usize;
        let offset_x = ((reference.extent.left - parent.extent.left) / parent.dx()).round() as usize;

        Ok(Self {
            input,
            reference,
            extent,
            start,
            end,
            offset: (offset_t, offset_y, offset_x),
        })
    }
}

impl Cube for CropCube {
    fn reference(&self) -> &CubeReference {
        &self.reference
    }

    fn bands(&self) -> &BandList {
        self.input.bands()
    }

    fn compute_chunk(&self, idx: ChunkIndex) -> Result<ChunkData> {
        let w = self.reference.chunk_window(idx)?;
        let (ot, oy, ox) = self.offset;
        let shifted = PixelWindow {
            t0: w.t0 + ot,
            t1: w.t1 + ot,
            y0: w.y0 + oy,
            y1: w.y1 + oy,
            x0: w.x0 + ox,
            x1: w.x1 + ox,
        };
        read_window(self.input.as_ref(), &shifted)
    }

    fn spec(&self) -> CubeSpec {
        CubeSpec::Crop {
            input: Box::new(self.input.spec()),
            extent: self.extent,
            start: self.start,
            end: self.end,
        }
    }
}
