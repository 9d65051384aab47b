//! File-backed image collections.
//!
//! A collections file lists named collections, their bands and every image
//! with its acquisition time and footprint. Images are Zarr V3 arrays of
//! shape `[bands, y, x]` (or `[bands, 1, y, x]`, as written by a
//! single-slice export) with rows stored bottom-up and `srs` and `extent`
//! attributes.
//!
//! ```yaml
//! collections:
//!   - name: s2
//!     bands: [B04, B08]
//!     images:
//!       - uri: /data/s2/2020-06-01.zarr
//!         datetime: 2020-06-01T10:30:00
//!         srs: EPSG:32632
//!         extent: {left: 300000, right: 310000, bottom: 5000000, top: 5010000}
//!         bands: [{band: B04, index: 0}, {band: B08, index: 1}]
//! ```

use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zarrs::array::Array;
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

use crate::aggregate::{reduce_series, AggregatorKind};
use crate::cube::{BandList, Catalog, ImageRecord, RasterReader, ResamplingMethod, SourceRegistry};
use crate::error::{CubeError, Result};
use crate::reference::{SpatialExtent, TargetGrid};

/// Top level of a collections file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionsFile {
    pub collections: Vec<CollectionEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionEntry {
    pub name: String,
    pub bands: Vec<String>,
    #[serde(default)]
    pub images: Vec<ImageRecord>,
}

impl CollectionsFile {
    /// Read a collections file; YAML is chosen by file extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml")
        );
        if yaml {
            serde_yaml::from_str(&text).map_err(|e| {
                CubeError::config(format!("invalid collections file {}: {}", path.display(), e))
            })
        } else {
            Ok(serde_json::from_str(&text)?)
        }
    }

    /// Registry serving every collection from its image list through
    /// [`ZarrImageReader`].
    pub fn into_registry(self) -> Result<SourceRegistry> {
        let reader: Arc<dyn RasterReader> = Arc::new(ZarrImageReader);
        let mut registry = SourceRegistry::new();
        for entry in self.collections {
            let catalog = StaticCatalog::new(BandList::from_names(&entry.bands)?, entry.images)?;
            info!(
                collection = %entry.name,
                images = catalog.len(),
                "Registered image collection"
            );
            registry.register(entry.name, Arc::new(catalog), Arc::clone(&reader));
        }
        Ok(registry)
    }
}

impl SourceRegistry {
    /// Registry of the collections listed in a collections file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        CollectionsFile::load(path)?.into_registry()
    }
}

/// Catalog over a fixed list of images.
#[derive(Debug, Clone)]
pub struct StaticCatalog {
    bands: BandList,
    images: Vec<ImageRecord>,
}

impl StaticCatalog {
    /// Every image band must map onto a collection band.
    pub fn new(bands: BandList, images: Vec<ImageRecord>) -> Result<Self> {
        for image in &images {
            for mapping in &image.bands {
                bands.require(&mapping.band)?;
            }
        }
        Ok(Self { bands, images })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl Catalog for StaticCatalog {
    fn bands(&self) -> BandList {
        self.bands.clone()
    }

    /// Images are not reprojected, so only images in `srs` are returned.
    fn images_overlapping(
        &self,
        extent: &SpatialExtent,
        srs: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<ImageRecord>> {
        Ok(self
            .images
            .iter()
            .filter(|i| {
                i.srs == srs && i.extent.intersects(extent) && i.datetime >= start && i.datetime < end
            })
            .cloned()
            .collect())
    }
}

/// Reads bands of Zarr images and resamples them onto the target grid.
///
/// Supports nearest, bilinear and the block methods average, min, max and
/// median. Block methods fall back to nearest where a target pixel holds no
/// source pixel centre.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZarrImageReader;

/// One band of an image in memory.
struct ImageBand {
    extent: SpatialExtent,
    nx: usize,
    ny: usize,
    values: Vec<f64>,
}

impl ImageBand {
    fn read(uri: &str, band_index: usize, srs: &str) -> Result<Self> {
        let fail = |e: &dyn std::fmt::Display| CubeError::source_read(uri, e.to_string());
        let store = Arc::new(FilesystemStore::new(uri).map_err(|e| fail(&e))?);
        let array = Array::open(store, "/").map_err(|e| fail(&e))?;

        let attrs = array.attributes();
        let image_srs = attrs.get("srs").and_then(|v| v.as_str()).unwrap_or_default();
        if image_srs != srs {
            return Err(fail(&format!(
                "image is in '{}', grid is in '{}'",
                image_srs, srs
            )));
        }
        let extent = match attrs.get("extent").and_then(|v| v.as_array()) {
            Some(e) if e.len() == 4 => {
                let c: Vec<f64> = e.iter().filter_map(|v| v.as_f64()).collect();
                if c.len() != 4 {
                    return Err(fail(&"non-numeric extent attribute"));
                }
                SpatialExtent::new(c[0], c[1], c[2], c[3])
            }
            _ => return Err(fail(&"missing extent attribute [left, right, bottom, top]")),
        };

        let shape = array.shape().to_vec();
        let (nb, ny, nx, start, size) = match shape.as_slice() {
            [nb, ny, nx] => (*nb, *ny, *nx, vec![band_index as u64, 0, 0], vec![1, *ny, *nx]),
            [nb, 1, ny, nx] => (
                *nb,
                *ny,
                *nx,
                vec![band_index as u64, 0, 0, 0],
                vec![1, 1, *ny, *nx],
            ),
            other => return Err(fail(&format!("unsupported image shape {:?}", other))),
        };
        if band_index as u64 >= nb {
            return Err(fail(&format!("band {} of {}", band_index, nb)));
        }
        let subset = ArraySubset::new_with_start_shape(start, size).map_err(|e| fail(&e))?;
        let values: Vec<f64> = array
            .retrieve_array_subset_elements(&subset)
            .map_err(|e| fail(&e))?;
        Ok(Self {
            extent,
            nx: nx as usize,
            ny: ny as usize,
            values,
        })
    }

    fn dx(&self) -> f64 {
        self.extent.width() / self.nx as f64
    }

    fn dy(&self) -> f64 {
        self.extent.height() / self.ny as f64
    }

    fn get(&self, col: usize, row: usize) -> f64 {
        self.values[row * self.nx + col]
    }

    fn nearest(&self, x: f64, y: f64) -> f64 {
        if !self.extent.contains(x, y) {
            return f64::NAN;
        }
        let col = (((x - self.extent.left) / self.dx()) as usize).min(self.nx - 1);
        let row = (((y - self.extent.bottom) / self.dy()) as usize).min(self.ny - 1);
        self.get(col, row)
    }

    /// Weighted mean of the four surrounding pixel centres, skipping nodata.
    fn bilinear(&self, x: f64, y: f64) -> f64 {
        if !self.extent.contains(x, y) {
            return f64::NAN;
        }
        let fx = ((x - self.extent.left) / self.dx() - 0.5).clamp(0.0, (self.nx - 1) as f64);
        let fy = ((y - self.extent.bottom) / self.dy() - 0.5).clamp(0.0, (self.ny - 1) as f64);
        let (c0, r0) = (fx.floor() as usize, fy.floor() as usize);
        let (c1, r1) = ((c0 + 1).min(self.nx - 1), (r0 + 1).min(self.ny - 1));
        let (wx, wy) = (fx - c0 as f64, fy - r0 as f64);
        let mut sum = 0.0;
        let mut weight = 0.0;
        for (col, row, w) in [
            (c0, r0, (1.0 - wx) * (1.0 - wy)),
            (c1, r0, wx * (1.0 - wy)),
            (c0, r1, (1.0 - wx) * wy),
            (c1, r1, wx * wy),
        ] {
            let v = self.get(col, row);
            if !v.is_nan() && w > 0.0 {
                sum += v * w;
                weight += w;
            }
        }
        if weight > 0.0 {
            sum / weight
        } else {
            self.nearest(x, y)
        }
    }

    /// Source pixels whose centre lies in `cell`.
    fn block(&self, cell: &SpatialExtent) -> Vec<f64> {
        let (dx, dy) = (self.dx(), self.dy());
        let first = |lo: f64, origin: f64, d: f64| ((lo - origin) / d - 0.5).ceil().max(0.0) as usize;
        let c0 = first(cell.left, self.extent.left, dx);
        let r0 = first(cell.bottom, self.extent.bottom, dy);
        let mut values = Vec::new();
        for row in r0..self.ny {
            let cy = self.extent.bottom + (row as f64 + 0.5) * dy;
            if cy >= cell.top {
                break;
            }
            for col in c0..self.nx {
                let cx = self.extent.left + (col as f64 + 0.5) * dx;
                if cx >= cell.right {
                    break;
                }
                values.push(self.get(col, row));
            }
        }
        values
    }
}

impl RasterReader for ZarrImageReader {
    fn read_resampled(
        &self,
        uri: &str,
        band_index: usize,
        grid: &TargetGrid,
        method: ResamplingMethod,
    ) -> Result<Vec<f64>> {
        let block_kind = match method {
            ResamplingMethod::Nearest | ResamplingMethod::Bilinear => None,
            ResamplingMethod::Average => Some(AggregatorKind::Mean),
            ResamplingMethod::Min => Some(AggregatorKind::Min),
            ResamplingMethod::Max => Some(AggregatorKind::Max),
            ResamplingMethod::Median => Some(AggregatorKind::Median),
            ResamplingMethod::Cubic | ResamplingMethod::Mode => {
                return Err(CubeError::source_read(
                    uri,
                    format!("resampling '{}' is not supported for zarr images", method.as_str()),
                ))
            }
        };
        let image = ImageBand::read(uri, band_index, &grid.srs)?;
        debug!(uri, band = band_index, nx = grid.nx, ny = grid.ny, "Resampling image band");

        let dx = grid.extent.width() / grid.nx as f64;
        let dy = grid.extent.height() / grid.ny as f64;
        let mut out = Vec::with_capacity(grid.nx * grid.ny);
        for row in 0..grid.ny {
            let bottom = grid.extent.bottom + row as f64 * dy;
            for col in 0..grid.nx {
                let left = grid.extent.left + col as f64 * dx;
                let (cx, cy) = (left + 0.5 * dx, bottom + 0.5 * dy);
                let value = match (method, block_kind) {
                    (ResamplingMethod::Bilinear, _) => image.bilinear(cx, cy),
                    (_, Some(kind)) => {
                        let cell = SpatialExtent::new(left, left + dx, bottom, bottom + dy);
                        let values = image.block(&cell);
                        if values.is_empty() {
                            image.nearest(cx, cy)
                        } else {
                            reduce_series(kind, &values)
                        }
                    }
                    _ => image.nearest(cx, cy),
                };
                out.push(value);
            }
        }
        Ok(out)
    }
}
