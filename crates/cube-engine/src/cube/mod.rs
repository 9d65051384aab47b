//! Cube operator graph.
//!
//! Every operator implements [`Cube`]. Children are held as [`CubeRef`]
//! (`Arc<dyn Cube>`), so one child can feed several parents; graphs are
//! built bottom-up and never mutated, which keeps them acyclic.

mod aggregate_space;
mod aggregate_time;
mod apply_pixel;
mod cached;
mod crop;
mod dummy;
mod factory;
mod fill_time;
mod filter_geom;
mod filter_pixel;
mod join_bands;
mod reduce_space;
mod reduce_time;
mod rename_bands;
mod select_bands;
mod select_time;
mod slice_space;
mod slice_time;
pub mod source;
mod spec;
mod stream;
mod window_time;

pub use aggregate_space::AggregateSpaceCube;
pub use aggregate_time::AggregateTimeCube;
pub use apply_pixel::ApplyPixelCube;
pub use cached::CachedCube;
pub use crop::CropCube;
pub use dummy::DummyCube;
pub use factory::{CubeFactory, SourceRegistry};
pub use fill_time::{FillMethod, FillTimeCube};
pub use filter_geom::FilterGeomCube;
pub use filter_pixel::FilterPixelCube;
pub use join_bands::JoinBandsCube;
pub use reduce_space::ReduceSpaceCube;
pub use reduce_time::ReduceTimeCube;
pub use rename_bands::RenameBandsCube;
pub use select_bands::SelectBandsCube;
pub use select_time::SelectTimeCube;
pub use slice_space::SliceSpaceCube;
pub use slice_time::SliceTimeCube;
pub use source::{
    BandMapping, Catalog, ImageRecord, RasterReader, ResamplingMethod, SliceAggregation,
    SourceCube,
};
pub use spec::{CubeSpec, ReducerSpec, WindowOp};
pub use stream::StreamCube;
pub use window_time::WindowTimeCube;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::chunk::ChunkData;
use crate::error::{CubeError, Result};
use crate::reference::{ChunkIndex, CubeReference, PixelWindow};

/// Shared handle to a cube node.
pub type CubeRef = Arc<dyn Cube>;

/// The contract every operator implements.
pub trait Cube: Send + Sync {
    /// Spatiotemporal reference of the output.
    fn reference(&self) -> &CubeReference;

    /// Output bands.
    fn bands(&self) -> &BandList;

    /// Compute one chunk. The buffer has shape
    /// `[bands, nt, ny, nx]` of the (clipped) chunk window.
    fn compute_chunk(&self, idx: ChunkIndex) -> Result<ChunkData>;

    /// Serializable description of the graph rooted here.
    fn spec(&self) -> CubeSpec;

    fn total_chunks(&self) -> usize {
        self.reference().chunk_count()
    }

    /// Identity token: structurally equal graphs share an id.
    fn id(&self) -> CubeId {
        CubeId::of_spec(&self.spec())
    }

    /// Output buffer shape of a chunk.
    fn chunk_shape(&self, idx: ChunkIndex) -> Result<[usize; 4]> {
        let w = self.reference().chunk_window(idx)?;
        Ok([self.bands().len(), w.nt(), w.ny(), w.nx()])
    }
}

/// Stable identity of a cube graph, derived from its description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CubeId(pub u64);

impl CubeId {
    /// Hash the canonical JSON of a cube description.
    pub fn of_spec(spec: &CubeSpec) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let canonical = serde_json::to_string(spec).unwrap_or_default();
        let mut hasher = DefaultHasher::new();
        canonical.hash(&mut hasher);
        Self(hasher.finish())
    }
}

impl std::fmt::Display for CubeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One output band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Band {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub unit: String,
}

impl Band {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit: String::new(),
        }
    }
}

/// Ordered list of uniquely named bands.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BandList(Vec<Band>);

impl BandList {
    /// Build a band list, rejecting empty lists and duplicate names.
    pub fn new(bands: Vec<Band>) -> Result<Self> {
        if bands.is_empty() {
            return Err(CubeError::config("a cube needs at least one band"));
        }
        for (i, b) in bands.iter().enumerate() {
            if bands[..i].iter().any(|o| o.name == b.name) {
                return Err(CubeError::config(format!("duplicate band name '{}'", b.name)));
            }
        }
        Ok(Self(bands))
    }

    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        Self::new(names.iter().map(|n| Band::new(n.as_ref())).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&Band> {
        self.0.get(i)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Band> {
        self.0.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|b| b.name.clone()).collect()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|b| b.name == name)
    }

    /// Index of a band that must exist.
    pub fn require(&self, name: &str) -> Result<usize> {
        self.index_of(name).ok_or_else(|| {
            CubeError::config(format!(
                "unknown band '{}' (available: {})",
                name,
                self.names().join(", ")
            ))
        })
    }
}

/// Assemble an arbitrary pixel window of `cube` from the chunks it overlaps.
///
/// Parts of the window outside the cube are nodata.
pub fn read_window(cube: &dyn Cube, window: &PixelWindow) -> Result<ChunkData> {
    let nb = cube.bands().len();
    let mut out = ChunkData::nodata([nb, window.nt(), window.ny(), window.nx()]);
    let reference = cube.reference();
    for idx in reference.chunks_intersecting(window) {
        let cw = reference.chunk_window(idx)?;
        let chunk = cube.compute_chunk(idx)?;
        let iw = cw.intersect(window);
        if iw.is_empty() {
            continue;
        }
        let n = iw.nx();
        for b in 0..nb {
            for t in iw.t0..iw.t1 {
                for y in iw.y0..iw.y1 {
                    let src = chunk.offset(b, t - cw.t0, y - cw.y0, iw.x0 - cw.x0);
                    let dst = out.offset(b, t - window.t0, y - window.y0, iw.x0 - window.x0);
                    out.values_mut()[dst..dst + n]
                        .copy_from_slice(&chunk.values()[src..src + n]);
                }
            }
        }
    }
    Ok(out)
}

/// Copy the bands of `src` into `dst` starting at band `offset`.
pub(crate) fn copy_bands(dst: &mut ChunkData, offset: usize, src: &ChunkData) {
    let n = src.values().len();
    let start = offset * dst.band_len();
    dst.values_mut()[start..start + n].copy_from_slice(src.values());
}
