//! Synthetic cubes with predictable, verifiable values.
//!
//! These generators create cubes whose every pixel can be recomputed from
//! its coordinates, so tests can check results without golden files.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cube_engine::{
    BandList, ChunkData, ChunkIndex, Cube, CubeReference, CubeSpec, Result,
};

/// Value of the default test pattern at global coordinates.
///
/// Each value is calculated as `b * 1e6 + t * 1e4 + y * 100 + x`, which
/// keeps every coordinate readable in the decimal digits for grids up to
/// 100 pixels wide.
///
/// # Example
///
/// ```
/// use test_utils::pattern_value;
///
/// assert_eq!(pattern_value(0, 2, 3, 4), 20304.0);
/// assert_eq!(pattern_value(1, 0, 0, 0), 1_000_000.0);
/// ```
pub fn pattern_value(b: usize, t: usize, y: usize, x: usize) -> f64 {
    (b * 1_000_000 + t * 10_000 + y * 100 + x) as f64
}

type ValueFn = dyn Fn(usize, usize, usize, usize) -> f64 + Send + Sync;

/// A cube defined by a function of global `(band, t, y, x)` coordinates.
///
/// Its description is a dummy spec carrying `seed` as the fill value, so
/// two `FnCube`s over the same reference get different ids only when their
/// seeds differ.
pub struct FnCube {
    reference: CubeReference,
    bands: BandList,
    seed: f64,
    value: Arc<ValueFn>,
}

impl FnCube {
    pub fn new<F>(reference: CubeReference, bands: &[&str], seed: f64, value: F) -> Self
    where
        F: Fn(usize, usize, usize, usize) -> f64 + Send + Sync + 'static,
    {
        Self {
            reference,
            bands: BandList::from_names(bands).expect("valid band names"),
            seed,
            value: Arc::new(value),
        }
    }

    /// Cube filled with [`pattern_value`].
    pub fn pattern(reference: CubeReference, bands: &[&str]) -> Self {
        Self::new(reference, bands, 0.0, pattern_value)
    }

    /// Single-band cube whose pixels all follow `series[t]`.
    pub fn series(reference: CubeReference, series: Vec<f64>) -> Self {
        assert_eq!(series.len(), reference.nt, "one value per time slice");
        let seed = series.iter().filter(|v| !v.is_nan()).sum::<f64>() + series.len() as f64;
        Self::new(reference, &["value"], seed, move |_, t, _, _| series[t])
    }
}

impl Cube for FnCube {
    fn reference(&self) -> &CubeReference {
        &self.reference
    }

    fn bands(&self) -> &BandList {
        &self.bands
    }

    fn compute_chunk(&self, idx: ChunkIndex) -> Result<ChunkData> {
        let w = self.reference.chunk_window(idx)?;
        let mut out = ChunkData::nodata([self.bands.len(), w.nt(), w.ny(), w.nx()]);
        for b in 0..self.bands.len() {
            for t in w.t0..w.t1 {
                for y in w.y0..w.y1 {
                    for x in w.x0..w.x1 {
                        out.set(b, t - w.t0, y - w.y0, x - w.x0, (self.value)(b, t, y, x));
                    }
                }
            }
        }
        Ok(out)
    }

    fn spec(&self) -> CubeSpec {
        CubeSpec::Dummy {
            reference: self.reference.clone(),
            bands: self.bands.names(),
            fill: self.seed,
        }
    }
}

/// Wraps a cube and records how its chunks are computed.
///
/// Tracks the total number of computations, the number running right now
/// and the highest concurrency seen; an optional delay widens race windows.
pub struct CountingCube {
    inner: Arc<dyn Cube>,
    delay: Duration,
    calls: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl CountingCube {
    pub fn new(inner: Arc<dyn Cube>) -> Self {
        Self::with_delay(inner, Duration::ZERO)
    }

    pub fn with_delay(inner: Arc<dyn Cube>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    /// Total number of `compute_chunk` calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously running computations.
    pub fn max_concurrent(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

impl Cube for CountingCube {
    fn reference(&self) -> &CubeReference {
        self.inner.reference()
    }

    fn bands(&self) -> &BandList {
        self.inner.bands()
    }

    fn compute_chunk(&self, idx: ChunkIndex) -> Result<ChunkData> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let result = self.inner.compute_chunk(idx);
        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn spec(&self) -> CubeSpec {
        self.inner.spec()
    }
}
