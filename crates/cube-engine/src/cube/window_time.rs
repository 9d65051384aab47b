//! Moving-window aggregation along the time axis.

use crate::aggregate::PixelAccumulator;
use crate::chunk::ChunkData;
use crate::config::EdgePolicy;
use crate::error::{CubeError, Result};
use crate::reference::{ChunkIndex, CubeReference, PixelWindow};

use super::{read_window, Band, BandList, Cube, CubeRef, CubeSpec, WindowOp};

/// For output slice `s` the window covers input slices `s-left ..= s+right`.
///
/// With [`EdgePolicy::Shrink`] incomplete windows at the series ends use the
/// neighbours that exist; with [`EdgePolicy::Nodata`] they produce nodata.
/// Kernels skip nodata inputs and do not renormalise their weights.
pub struct WindowTimeCube {
    input: CubeRef,
    bands: BandList,
    left: usize,
    right: usize,
    op: WindowOp,
    edge_policy: EdgePolicy,
    band_index: Vec<usize>,
}

impl WindowTimeCube {
    pub fn new(
        input: CubeRef,
        left: usize,
        right: usize,
        op: WindowOp,
        edge_policy: EdgePolicy,
    ) -> Result<Self> {
        let (bands, band_index) = match &op {
            WindowOp::Reduce { reducers } => {
                if reducers.is_empty() {
                    return Err(CubeError::config("window_time needs at least one reducer"));
                }
                let index = reducers
                    .iter()
                    .map(|r| input.bands().require(&r.band))
                    .collect::<Result<Vec<_>>>()?;
                let bands = BandList::new(
                    reducers
                        .iter()
                        .map(|r| Band::new(r.output_name()))
                        .collect(),
                )?;
                (bands, index)
            }
            WindowOp::Kernel { weights } => {
                if weights.len() != left + right + 1 {
                    return Err(CubeError::config(format!(
                        "kernel of size {} does not match window {}+1+{}",
                        weights.len(),
                        left,
                        right
                    )));
                }
                (input.bands().clone(), (0..input.bands().len()).collect())
            }
        };
        Ok(Self {
            input,
            bands,
            left,
            right,
            op,
            edge_policy,
            band_index,
        })
    }
}

impl Cube for WindowTimeCube {
    fn reference(&self) -> &CubeReference {
        self.input.reference()
    }

    fn bands(&self) -> &BandList {
        &self.bands
    }

    fn compute_chunk(&self, idx: ChunkIndex) -> Result<ChunkData> {
        let reference = self.input.reference();
        let w = reference.chunk_window(idx)?;
        let read = PixelWindow {
            t0: w.t0.saturating_sub(self.left),
            t1: (w.t1 + self.right).min(reference.nt),
            ..w
        };
        let input = read_window(self.input.as_ref(), &read)?;
        let plane = w.ny() * w.nx();
        let mut out = ChunkData::nodata([self.bands.len(), w.nt(), w.ny(), w.nx()]);

        for s in w.t0..w.t1 {
            let complete = s >= self.left && s + self.right < reference.nt;
            if !complete && self.edge_policy == EdgePolicy::Nodata {
                continue;
            }
            let lo = s.saturating_sub(self.left);
            let hi = (s + self.right).min(reference.nt - 1);
            match &self.op {
                WindowOp::Reduce { reducers } => {
                    for (o, (r, &b)) in reducers.iter().zip(&self.band_index).enumerate() {
                        let mut acc = PixelAccumulator::new(r.reducer, plane);
                        for k in lo..=hi {
                            acc.fold(input.plane(b, k - read.t0), k);
                        }
                        out.plane_mut(o, s - w.t0).copy_from_slice(&acc.finalize());
                    }
                }
                WindowOp::Kernel { weights } => {
                    for &b in &self.band_index {
                        let mut sum = vec![0.0; plane];
                        let mut seen = vec![false; plane];
                        for k in lo..=hi {
                            let weight = weights[k + self.left - s];
                            for (i, v) in input.plane(b, k - read.t0).iter().enumerate() {
                                if !v.is_nan() {
                                    sum[i] += weight * v;
                                    seen[i] = true;
                                }
                            }
                        }
                        let dst = out.plane_mut(b, s - w.t0);
                        for i in 0..plane {
                            dst[i] = if seen[i] { sum[i] } else { f64::NAN };
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    fn spec(&self) -> CubeSpec {
        CubeSpec::WindowTime {
            input: Box::new(self.input.spec()),
            left: self.left,
            right: self.right,
            op: self.op.clone(),
            edge_policy: Some(self.edge_policy),
        }
    }
}
