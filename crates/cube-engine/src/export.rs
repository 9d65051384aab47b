//! Chunk sinks: Zarr V3 export and in-memory collection.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

use crate::chunk::ChunkData;
use crate::cube::Cube;
use crate::error::{CubeError, Result};
use crate::exec::ChunkCallback;
use crate::reference::{ChunkIndex, CubeReference, PixelWindow};

fn export_err(e: impl std::fmt::Display) -> CubeError {
    CubeError::Export(e.to_string())
}

/// Writes chunks into a Zarr V3 array of shape `[bands, t, y, x]`.
///
/// The Zarr chunk grid equals the cube chunk shape (all bands in one
/// chunk), so every cube chunk maps onto exactly one Zarr chunk and writes
/// are addressed by chunk index regardless of completion order. Rows are
/// stored bottom-up like the cube buffers (`y_origin = "bottom"`).
pub struct ZarrExport {
    path: PathBuf,
    array: Array<FilesystemStore>,
    reference: CubeReference,
    nbands: usize,
}

impl ZarrExport {
    /// Create the store at `path` and write the array metadata for `cube`.
    pub fn create(path: impl AsRef<Path>, cube: &dyn Cube) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;
        let store = Arc::new(FilesystemStore::new(&path).map_err(export_err)?);

        let reference = cube.reference().clone();
        let nbands = cube.bands().len();
        let chunk = reference.chunk;

        let mut attrs = serde_json::Map::new();
        attrs.insert("bands".to_string(), serde_json::json!(cube.bands().names()));
        attrs.insert("srs".to_string(), serde_json::json!(reference.srs));
        attrs.insert(
            "extent".to_string(),
            serde_json::json!([
                reference.extent.left,
                reference.extent.right,
                reference.extent.bottom,
                reference.extent.top
            ]),
        );
        attrs.insert(
            "t0".to_string(),
            serde_json::json!(reference.start().format("%Y-%m-%dT%H:%M:%S").to_string()),
        );
        attrs.insert("dt".to_string(), serde_json::json!(reference.dt.to_string()));
        if let Some(labels) = &reference.time_labels {
            let labels: Vec<String> = labels
                .iter()
                .map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string())
                .collect();
            attrs.insert("time_labels".to_string(), serde_json::json!(labels));
        }
        attrs.insert("y_origin".to_string(), serde_json::json!("bottom"));
        attrs.insert(
            "dimensions".to_string(),
            serde_json::json!(["band", "t", "y", "x"]),
        );

        let chunk_grid: zarrs::array::ChunkGrid = vec![
            nbands as u64,
            chunk.t as u64,
            chunk.y as u64,
            chunk.x as u64,
        ]
        .try_into()
        .map_err(|e| CubeError::config(format!("invalid chunk grid: {:?}", e)))?;

        let mut binding = ArrayBuilder::new(
            vec![
                nbands as u64,
                reference.nt as u64,
                reference.ny as u64,
                reference.nx as u64,
            ],
            DataType::Float64,
            chunk_grid,
            FillValue::from(f64::NAN),
        );
        let array = binding
            .attributes(attrs)
            .build(store, "/")
            .map_err(export_err)?;
        array.store_metadata().map_err(export_err)?;

        info!(
            path = %path.display(),
            bands = nbands,
            nt = reference.nt,
            ny = reference.ny,
            nx = reference.nx,
            "Created Zarr export"
        );
        Ok(Self {
            path,
            array,
            reference,
            nbands,
        })
    }

    /// Open an existing export of `cube`, e.g. to read results back or to
    /// fill in chunks that failed in an earlier run.
    pub fn open(path: impl AsRef<Path>, cube: &dyn Cube) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let store = Arc::new(FilesystemStore::new(&path).map_err(export_err)?);
        let array = Array::open(store, "/").map_err(export_err)?;

        let reference = cube.reference().clone();
        let nbands = cube.bands().len();
        let expected = [
            nbands as u64,
            reference.nt as u64,
            reference.ny as u64,
            reference.nx as u64,
        ];
        if array.shape() != expected.as_slice() {
            return Err(CubeError::Export(format!(
                "{} has shape {:?}, cube needs {:?}",
                path.display(),
                array.shape(),
                expected
            )));
        }
        Ok(Self {
            path,
            array,
            reference,
            nbands,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn subset(&self, w: &PixelWindow) -> Result<ArraySubset> {
        ArraySubset::new_with_start_shape(
            vec![0, w.t0 as u64, w.y0 as u64, w.x0 as u64],
            vec![
                self.nbands as u64,
                w.nt() as u64,
                w.ny() as u64,
                w.nx() as u64,
            ],
        )
        .map_err(export_err)
    }

    /// Write one chunk at its position in the array.
    pub fn write_chunk(&self, idx: ChunkIndex, chunk: &ChunkData) -> Result<()> {
        let w = self.reference.chunk_window(idx)?;
        let expected = [self.nbands, w.nt(), w.ny(), w.nx()];
        if chunk.shape() != expected {
            return Err(CubeError::Export(format!(
                "chunk {} has shape {:?}, expected {:?}",
                idx,
                chunk.shape(),
                expected
            )));
        }
        let subset = self.subset(&w)?;
        self.array
            .store_array_subset_elements(&subset, chunk.values())
            .map_err(export_err)?;
        debug!(chunk = %idx, "Exported chunk");
        Ok(())
    }

    /// Read back the region of one chunk.
    pub fn read_chunk(&self, idx: ChunkIndex) -> Result<ChunkData> {
        let w = self.reference.chunk_window(idx)?;
        let subset = self.subset(&w)?;
        let values: Vec<f64> = self
            .array
            .retrieve_array_subset_elements(&subset)
            .map_err(export_err)?;
        ChunkData::from_values([self.nbands, w.nt(), w.ny(), w.nx()], values)
    }

    /// Attributes of an existing export.
    pub fn read_attributes(path: impl AsRef<Path>) -> Result<serde_json::Map<String, serde_json::Value>> {
        let store = Arc::new(FilesystemStore::new(path.as_ref()).map_err(export_err)?);
        let array = Array::open(store, "/").map_err(export_err)?;
        Ok(array.attributes().clone())
    }
}

impl ChunkCallback for ZarrExport {
    fn on_chunk(&self, idx: ChunkIndex, chunk: ChunkData) -> Result<()> {
        self.write_chunk(idx, &chunk)
    }
}

/// Keeps every delivered chunk in memory, keyed by index.
#[derive(Default)]
pub struct CollectChunks {
    chunks: Mutex<BTreeMap<ChunkIndex, ChunkData>>,
}

impl CollectChunks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chunks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.lock().is_empty()
    }

    pub fn get(&self, idx: ChunkIndex) -> Option<ChunkData> {
        self.chunks.lock().get(&idx).cloned()
    }

    /// Copy of everything collected so far.
    pub fn snapshot(&self) -> BTreeMap<ChunkIndex, ChunkData> {
        self.chunks.lock().clone()
    }
}

impl ChunkCallback for CollectChunks {
    fn on_chunk(&self, idx: ChunkIndex, chunk: ChunkData) -> Result<()> {
        self.chunks.lock().insert(idx, chunk);
        Ok(())
    }
}
