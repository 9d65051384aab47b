//! Fill nodata gaps along the time axis.

use serde::{Deserialize, Serialize};

use crate::chunk::ChunkData;
use crate::error::{CubeError, Result};
use crate::reference::{ChunkIndex, CubeReference, PixelWindow};

use super::{read_window, BandList, Cube, CubeRef, CubeSpec};

/// Gap filling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillMethod {
    /// Nearest valid slice; ties go to the earlier slice.
    Near,
    /// Linear interpolation between the surrounding valid slices.
    Linear,
    /// Last observation carried forward.
    Locf,
    /// Next observation carried backward.
    Nocb,
}

impl FillMethod {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "near" | "nearest" => Ok(Self::Near),
            "linear" => Ok(Self::Linear),
            "locf" => Ok(Self::Locf),
            "nocb" => Ok(Self::Nocb),
            other => Err(CubeError::config(format!("unknown fill method '{}'", other))),
        }
    }
}

/// Fill the gaps of one series in place. Leading or trailing gaps that the
/// method cannot reach stay nodata.
pub fn fill_series(series: &mut [f64], method: FillMethod) {
    let n = series.len();
    let mut prev: Vec<Option<usize>> = vec![None; n];
    let mut next: Vec<Option<usize>> = vec![None; n];
    let mut last = None;
    for i in 0..n {
        if !series[i].is_nan() {
            last = Some(i);
        }
        prev[i] = last;
    }
    last = None;
    for i in (0..n).rev() {
        if !series[i].is_nan() {
            last = Some(i);
        }
        next[i] = last;
    }

    let original = series.to_vec();
    for i in 0..n {
        if !original[i].is_nan() {
            continue;
        }
        series[i] = match (method, prev[i], next[i]) {
            (FillMethod::Locf, Some(p), _) => original[p],
            (FillMethod::Nocb, _, Some(q)) => original[q],
            (FillMethod::Linear, Some(p), Some(q)) => {
                let f = (i - p) as f64 / (q - p) as f64;
                original[p] + f * (original[q] - original[p])
            }
            (FillMethod::Near, Some(p), Some(q)) => {
                if i - p <= q - i {
                    original[p]
                } else {
                    original[q]
                }
            }
            (FillMethod::Near, Some(p), None) => original[p],
            (FillMethod::Near, None, Some(q)) => original[q],
            _ => f64::NAN,
        };
    }
}

/// Needs the full series of a spatial chunk, so every output chunk reads all
/// input time chunks at its spatial position.
pub struct FillTimeCube {
    input: CubeRef,
    method: FillMethod,
}

impl FillTimeCube {
    pub fn new(input: CubeRef, method: FillMethod) -> Self {
        Self { input, method }
    }
}

impl Cube for FillTimeCube {
    fn reference(&self) -> &CubeReference {
        self.input.reference()
    }

    fn bands(&self) -> &BandList {
        self.input.bands()
    }

    fn compute_chunk(&self, idx: ChunkIndex) -> Result<ChunkData> {
        let reference = self.input.reference();
        let w = reference.chunk_window(idx)?;
        let full = PixelWindow {
            t0: 0,
            t1: reference.nt,
            ..w
        };
        let series = read_window(self.input.as_ref(), &full)?;
        let (nb, nt_all, ny, nx) = (series.nbands(), series.nt(), series.ny(), series.nx());

        let mut out = ChunkData::nodata([nb, w.nt(), ny, nx]);
        let mut buf = vec![0.0; nt_all];
        for b in 0..nb {
            for y in 0..ny {
                for x in 0..nx {
                    for (t, v) in buf.iter_mut().enumerate() {
                        *v = series.get(b, t, y, x);
                    }
                    fill_series(&mut buf, self.method);
                    for t in w.t0..w.t1 {
                        out.set(b, t - w.t0, y, x, buf[t]);
                    }
                }
            }
        }
        Ok(out)
    }

    fn spec(&self) -> CubeSpec {
        CubeSpec::FillTime {
            input: Box::new(self.input.spec()),
            method: self.method,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAN: f64 = f64::NAN;

    fn filled(series: &[f64], method: FillMethod) -> Vec<f64> {
        let mut s = series.to_vec();
        fill_series(&mut s, method);
        s
    }

    fn same(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len()
            && a.iter()
                .zip(b)
                .all(|(x, y)| (x.is_nan() && y.is_nan()) || x == y)
    }

    #[test]
    fn test_fill_methods() {
        let s = [NAN, 1.0, NAN, NAN, 4.0, NAN];
        assert!(same(&filled(&s, FillMethod::Locf), &[NAN, 1.0, 1.0, 1.0, 4.0, 4.0]));
        assert!(same(&filled(&s, FillMethod::Nocb), &[1.0, 1.0, 4.0, 4.0, 4.0, NAN]));
        assert!(same(&filled(&s, FillMethod::Linear), &[NAN, 1.0, 2.0, 3.0, 4.0, NAN]));
        assert!(same(&filled(&s, FillMethod::Near), &[1.0, 1.0, 1.0, 4.0, 4.0, 4.0]));
    }

    #[test]
    fn test_all_nodata_series_stays_nodata() {
        let s = [NAN, NAN];
        for m in [FillMethod::Near, FillMethod::Linear, FillMethod::Locf, FillMethod::Nocb] {
            assert!(filled(&s, m).iter().all(|v| v.is_nan()));
        }
    }
}
