//! Common test fixtures for cube-engine tests.
//!
//! This module provides pre-defined references plus in-memory stand-ins
//! for the external collaborators (image catalog, raster reader, swarm
//! workers).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use cube_engine::cube::{BandMapping, Catalog, ImageRecord, RasterReader, ResamplingMethod};
use cube_engine::{
    BandList, ChunkData, ChunkShape, CubeError, CubeRef, CubeReference, CubeSpec, Result,
    SpatialExtent, TargetGrid, TimeStep, WorkerEndpoint,
};
use parking_lot::Mutex;

/// Midnight of the given day.
pub fn datetime(year: i32, month: u32, day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .expect("valid date")
}

/// Daily reference starting 2020-01-01 with 10x10 unit pixels.
pub fn daily_reference(nx: usize, ny: usize, nt: usize, chunk: ChunkShape) -> CubeReference {
    let t0 = datetime(2020, 1, 1);
    let dt = TimeStep::days(1);
    CubeReference::new(
        "EPSG:3857",
        SpatialExtent::new(0.0, nx as f64 * 10.0, 0.0, ny as f64 * 10.0),
        nx,
        ny,
        t0,
        dt.advance(t0, nt as i64 - 1),
        dt,
        chunk,
    )
    .expect("valid reference")
}

/// 100x100 pixels, 50x50 chunks, a single time instant.
pub fn four_chunk_reference() -> CubeReference {
    daily_reference(100, 100, 1, ChunkShape::new(1, 50, 50))
}

/// In-memory image catalog.
///
/// Every image offers all catalog bands, band `i` at file index `i`.
pub struct SyntheticCatalog {
    bands: BandList,
    images: Vec<ImageRecord>,
}

impl SyntheticCatalog {
    pub fn new(bands: &[&str]) -> Self {
        Self {
            bands: BandList::from_names(bands).expect("valid band names"),
            images: Vec::new(),
        }
    }

    /// Add an image; images are returned in insertion order.
    pub fn with_image(
        mut self,
        uri: &str,
        datetime: NaiveDateTime,
        extent: SpatialExtent,
    ) -> Self {
        let bands = self
            .bands
            .iter()
            .enumerate()
            .map(|(index, b)| BandMapping {
                band: b.name.clone(),
                index,
            })
            .collect();
        self.images.push(ImageRecord {
            uri: uri.to_string(),
            datetime,
            bands,
            srs: "EPSG:3857".to_string(),
            extent,
        });
        self
    }
}

impl Catalog for SyntheticCatalog {
    fn bands(&self) -> BandList {
        self.bands.clone()
    }

    fn images_overlapping(
        &self,
        extent: &SpatialExtent,
        _srs: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<ImageRecord>> {
        Ok(self
            .images
            .iter()
            .filter(|i| i.extent.intersects(extent) && i.datetime >= start && i.datetime < end)
            .cloned()
            .collect())
    }
}

/// Raster reader producing constant planes per image and band.
///
/// The value of band `index` of image `uri` is `base(uri) + 1000 * index`.
/// URIs marked as failing return a `SourceRead` error.
#[derive(Default)]
pub struct SyntheticReader {
    base: HashMap<String, f64>,
    failing: HashSet<String>,
    reads: AtomicUsize,
}

impl SyntheticReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, uri: &str, base: f64) -> Self {
        self.base.insert(uri.to_string(), base);
        self
    }

    pub fn with_failure(mut self, uri: &str) -> Self {
        self.failing.insert(uri.to_string());
        self
    }

    /// Number of successful reads so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl RasterReader for SyntheticReader {
    fn read_resampled(
        &self,
        uri: &str,
        band_index: usize,
        grid: &TargetGrid,
        _method: ResamplingMethod,
    ) -> Result<Vec<f64>> {
        if self.failing.contains(uri) {
            return Err(CubeError::source_read(uri, "synthetic read failure"));
        }
        let base = self.base.get(uri).copied().unwrap_or(0.0);
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(vec![base + 1000.0 * band_index as f64; grid.nx * grid.ny])
    }
}

/// In-process swarm worker computing chunks of a fixed cube.
///
/// With `fail_after(n)` the worker answers the first `n` chunk requests
/// and is unreachable from then on.
pub struct MockWorker {
    name: String,
    cube: CubeRef,
    fail_after: Option<usize>,
    delay: Duration,
    answered: AtomicUsize,
    dead: AtomicBool,
    computed: Mutex<Vec<u64>>,
}

impl MockWorker {
    pub fn new(name: &str, cube: CubeRef) -> Self {
        Self {
            name: name.to_string(),
            cube,
            fail_after: None,
            delay: Duration::from_millis(2),
            answered: AtomicUsize::new(0),
            dead: AtomicBool::new(false),
            computed: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Unreachable from the start, registration included.
    pub fn offline(self) -> Self {
        self.dead.store(true, Ordering::SeqCst);
        self
    }

    /// Linear ids of the chunks this worker returned.
    pub fn computed(&self) -> Vec<u64> {
        self.computed.lock().clone()
    }

    fn unreachable(&self) -> CubeError {
        CubeError::worker_unreachable(&self.name, "connection refused")
    }
}

#[async_trait]
impl WorkerEndpoint for MockWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn register(&self, _spec: &CubeSpec) -> Result<u64> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(self.unreachable());
        }
        Ok(self.cube.id().0)
    }

    async fn compute(&self, _cube_id: u64, chunk_id: u64) -> Result<ChunkData> {
        tokio::time::sleep(self.delay).await;
        if self.dead.load(Ordering::SeqCst) {
            return Err(self.unreachable());
        }
        let n = self.answered.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| n >= limit) {
            self.dead.store(true, Ordering::SeqCst);
            return Err(self.unreachable());
        }
        let idx = self.cube.reference().from_linear(chunk_id)?;
        let chunk = self.cube.compute_chunk(idx)?;
        self.computed.lock().push(chunk_id);
        Ok(chunk)
    }
}

/// Wrap workers for [`cube_engine::SwarmProcessor::new`].
pub fn endpoints(workers: &[Arc<MockWorker>]) -> Vec<Arc<dyn WorkerEndpoint>> {
    workers
        .iter()
        .map(|w| Arc::clone(w) as Arc<dyn WorkerEndpoint>)
        .collect()
}
