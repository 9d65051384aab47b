//! Leaf operator reading source imagery through external collaborators.
//!
//! The image catalog and the raster I/O library are consumed through the
//! narrow [`Catalog`] and [`RasterReader`] traits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::NaiveDateTime;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::aggregate::{AggregatorKind, PixelAccumulator};
use crate::chunk::ChunkData;
use crate::error::{CubeError, Result};
use crate::reference::{ChunkIndex, CubeReference, SpatialExtent, TargetGrid};

use super::{BandList, Cube, CubeSpec};

/// Which band of a source file feeds which cube band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandMapping {
    /// Cube band name.
    pub band: String,
    /// Band index inside the source file.
    pub index: usize,
}

/// One source image known to the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub uri: String,
    pub datetime: NaiveDateTime,
    pub bands: Vec<BandMapping>,
    /// Native reference system and footprint of the image.
    pub srs: String,
    pub extent: SpatialExtent,
}

/// Image index of a collection.
pub trait Catalog: Send + Sync {
    /// All bands the collection offers.
    fn bands(&self) -> BandList;

    /// Images intersecting `extent` (in `srs`) with acquisition time in
    /// `[start, end)`, in the order they should be merged.
    fn images_overlapping(
        &self,
        extent: &SpatialExtent,
        srs: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<ImageRecord>>;
}

/// Native raster I/O: read one band of one image resampled onto a grid.
pub trait RasterReader: Send + Sync {
    /// Returns `grid.ny * grid.nx` values, rows bottom-to-top, NaN for nodata.
    fn read_resampled(
        &self,
        uri: &str,
        band_index: usize,
        grid: &TargetGrid,
        method: ResamplingMethod,
    ) -> Result<Vec<f64>>;
}

/// Resampling methods understood by the raster reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResamplingMethod {
    Nearest,
    Bilinear,
    Cubic,
    Average,
    Mode,
    Min,
    Max,
    Median,
}

impl Default for ResamplingMethod {
    fn default() -> Self {
        Self::Nearest
    }
}

impl ResamplingMethod {
    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "near" | "nearest" => Ok(Self::Nearest),
            "bilinear" => Ok(Self::Bilinear),
            "cubic" => Ok(Self::Cubic),
            "average" => Ok(Self::Average),
            "mode" => Ok(Self::Mode),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "med" | "median" => Ok(Self::Median),
            other => Err(CubeError::config(format!(
                "unknown resampling method '{}'",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nearest => "nearest",
            Self::Bilinear => "bilinear",
            Self::Cubic => "cubic",
            Self::Average => "average",
            Self::Mode => "mode",
            Self::Min => "min",
            Self::Max => "max",
            Self::Median => "median",
        }
    }
}

/// How several images falling into the same time slice are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SliceAggregation {
    First,
    Last,
    Mean,
    Min,
    Max,
    Median,
}

impl Default for SliceAggregation {
    fn default() -> Self {
        Self::First
    }
}

impl SliceAggregation {
    fn aggregator(&self) -> AggregatorKind {
        match self {
            Self::First => AggregatorKind::First,
            Self::Last => AggregatorKind::Last,
            Self::Mean => AggregatorKind::Mean,
            Self::Min => AggregatorKind::Min,
            Self::Max => AggregatorKind::Max,
            Self::Median => AggregatorKind::Median,
        }
    }
}

/// Leaf cube over an image collection.
pub struct SourceCube {
    collection: String,
    reference: CubeReference,
    bands: BandList,
    band_selection: Option<Vec<String>>,
    catalog: Arc<dyn Catalog>,
    reader: Arc<dyn RasterReader>,
    resampling: ResamplingMethod,
    aggregation: SliceAggregation,
    warnings: AtomicU64,
}

impl SourceCube {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        collection: impl Into<String>,
        reference: CubeReference,
        bands: Option<Vec<String>>,
        catalog: Arc<dyn Catalog>,
        reader: Arc<dyn RasterReader>,
        resampling: ResamplingMethod,
        aggregation: SliceAggregation,
    ) -> Result<Self> {
        reference.validate()?;
        let available = catalog.bands();
        let selected = match &bands {
            Some(names) => {
                let mut picked = Vec::with_capacity(names.len());
                for name in names {
                    let i = available.require(name)?;
                    picked.push(available.get(i).cloned().ok_or_else(|| {
                        CubeError::Internal(format!("band index {} vanished", i))
                    })?);
                }
                BandList::new(picked)?
            }
            None => available,
        };
        Ok(Self {
            collection: collection.into(),
            reference,
            bands: selected,
            band_selection: bands,
            catalog,
            reader,
            resampling,
            aggregation,
            warnings: AtomicU64::new(0),
        })
    }

    /// Number of source reads that failed and were replaced by nodata.
    pub fn warnings(&self) -> u64 {
        self.warnings.load(Ordering::Relaxed)
    }
}

impl Cube for SourceCube {
    fn reference(&self) -> &CubeReference {
        &self.reference
    }

    fn bands(&self) -> &BandList {
        &self.bands
    }

    fn compute_chunk(&self, idx: ChunkIndex) -> Result<ChunkData> {
        let bounds = self.reference.bounds_of(idx)?;
        let w = bounds.window;
        let grid = self.reference.target_grid(&w);
        let plane = w.ny() * w.nx();
        let nb = self.bands.len();
        let nt = w.nt();

        let images = self.catalog.images_overlapping(
            &bounds.extent,
            &self.reference.srs,
            bounds.start,
            bounds.end,
        )?;
        debug!(
            collection = %self.collection,
            chunk = %idx,
            images = images.len(),
            "Reading source chunk"
        );

        let kind = self.aggregation.aggregator();
        let mut slots: Vec<Option<PixelAccumulator>> = vec![None; nb * nt];
        for (order, image) in images.iter().enumerate() {
            let k = match self.reference.slice_index_of(image.datetime) {
                Some(k) if k >= w.t0 && k < w.t1 => k - w.t0,
                _ => continue,
            };
            for mapping in &image.bands {
                let b = match self.bands.index_of(&mapping.band) {
                    Some(b) => b,
                    None => continue,
                };
                let read = self
                    .reader
                    .read_resampled(&image.uri, mapping.index, &grid, self.resampling)
                    .and_then(|values| {
                        if values.len() == plane {
                            Ok(values)
                        } else {
                            Err(CubeError::source_read(
                                &image.uri,
                                format!("expected {} values, got {}", plane, values.len()),
                            ))
                        }
                    });
                match read {
                    Ok(values) => slots[b * nt + k]
                        .get_or_insert_with(|| PixelAccumulator::new(kind, plane))
                        .fold(&values, order),
                    Err(e) => {
                        self.warnings.fetch_add(1, Ordering::Relaxed);
                        counter!("cube_source_read_warnings_total").increment(1);
                        warn!(
                            uri = %image.uri,
                            band = %mapping.band,
                            chunk = %idx,
                            error = %e,
                            "Source read failed, treating region as nodata"
                        );
                    }
                }
            }
        }

        let mut out = ChunkData::nodata([nb, nt, w.ny(), w.nx()]);
        for (slot, acc) in slots.into_iter().enumerate() {
            if let Some(acc) = acc {
                out.plane_mut(slot / nt, slot % nt)
                    .copy_from_slice(&acc.finalize());
            }
        }
        Ok(out)
    }

    fn spec(&self) -> CubeSpec {
        CubeSpec::Source {
            collection: self.collection.clone(),
            reference: self.reference.clone(),
            bands: self.band_selection.clone(),
            resampling: self.resampling,
            aggregation: self.aggregation,
        }
    }
}
