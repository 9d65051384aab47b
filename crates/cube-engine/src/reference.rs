//! Spatiotemporal reference: extent, resolution and chunking of a cube.
//!
//! Conventions:
//! - spatial extents are half-open, `[left, right) x [bottom, top)`
//! - row `y` counts from the bottom edge upward, so chunk row 0 is the
//!   southernmost chunk row and buffers store rows bottom-to-top
//! - time slice `k` covers `[t0 + k*dt, t0 + (k+1)*dt)`
//! - the last chunk along each axis may be partial; its window is clipped
//!   to the global extent

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::datetime::{TimeStep, TimeUnit};
use crate::error::{CubeError, Result};

/// Spatial rectangle in the coordinates of the reference system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpatialExtent {
    pub left: f64,
    pub right: f64,
    pub bottom: f64,
    pub top: f64,
}

impl SpatialExtent {
    pub fn new(left: f64, right: f64, bottom: f64, top: f64) -> Self {
        Self { left, right, bottom, top }
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.top - self.bottom
    }

    /// Check if a point lies inside (half-open).
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.left && x < self.right && y >= self.bottom && y < self.top
    }

    /// Check if two extents share any area.
    pub fn intersects(&self, other: &SpatialExtent) -> bool {
        self.left < other.right
            && self.right > other.left
            && self.bottom < other.top
            && self.top > other.bottom
    }

    /// Intersection of two extents, `None` if they do not overlap.
    pub fn intersection(&self, other: &SpatialExtent) -> Option<SpatialExtent> {
        if !self.intersects(other) {
            return None;
        }
        Some(SpatialExtent {
            left: self.left.max(other.left),
            right: self.right.min(other.right),
            bottom: self.bottom.max(other.bottom),
            top: self.top.min(other.top),
        })
    }
}

impl std::fmt::Display for SpatialExtent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {}) x [{}, {})",
            self.left, self.right, self.bottom, self.top
        )
    }
}

/// Chunk size in (time slices, rows, columns).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkShape {
    pub t: usize,
    pub y: usize,
    pub x: usize,
}

impl ChunkShape {
    pub fn new(t: usize, y: usize, x: usize) -> Self {
        Self { t, y, x }
    }
}

/// Chunk coordinates (time-slice chunk, row chunk, column chunk).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ChunkIndex {
    pub t: usize,
    pub y: usize,
    pub x: usize,
}

impl ChunkIndex {
    pub fn new(t: usize, y: usize, x: usize) -> Self {
        Self { t, y, x }
    }
}

impl std::fmt::Display for ChunkIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{},{})", self.t, self.y, self.x)
    }
}

/// Half-open window in slice/pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelWindow {
    pub t0: usize,
    pub t1: usize,
    pub y0: usize,
    pub y1: usize,
    pub x0: usize,
    pub x1: usize,
}

impl PixelWindow {
    pub fn nt(&self) -> usize {
        self.t1 - self.t0
    }

    pub fn ny(&self) -> usize {
        self.y1 - self.y0
    }

    pub fn nx(&self) -> usize {
        self.x1 - self.x0
    }

    pub fn is_empty(&self) -> bool {
        self.t0 >= self.t1 || self.y0 >= self.y1 || self.x0 >= self.x1
    }

    /// Intersection of two windows (possibly empty).
    pub fn intersect(&self, other: &PixelWindow) -> PixelWindow {
        PixelWindow {
            t0: self.t0.max(other.t0),
            t1: self.t1.min(other.t1).max(self.t0.max(other.t0)),
            y0: self.y0.max(other.y0),
            y1: self.y1.min(other.y1).max(self.y0.max(other.y0)),
            x0: self.x0.max(other.x0),
            x1: self.x1.min(other.x1).max(self.x0.max(other.x0)),
        }
    }
}

/// A location in space and time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpaceTimePoint {
    pub x: f64,
    pub y: f64,
    pub t: NaiveDateTime,
}

/// Pixel window of a chunk together with its physical bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkBounds {
    pub window: PixelWindow,
    pub extent: SpatialExtent,
    /// Start of the first slice (inclusive).
    pub start: NaiveDateTime,
    /// End of the last slice (exclusive).
    pub end: NaiveDateTime,
}

/// Target raster for reading source imagery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetGrid {
    pub srs: String,
    pub extent: SpatialExtent,
    pub nx: usize,
    pub ny: usize,
}

/// The spatiotemporal reference of a cube.
///
/// Immutable once built; derived cubes construct new references through the
/// `derive_*` methods.
///
/// Slice `k` starts at `t0 + (t_offset + k) * dt`. Temporal subsets keep the
/// origin of their parent and only move `t_offset`, so calendar steps that
/// clamp to the end of a month label every slice exactly like the parent.
///
/// A labeled time axis (`time_labels`) lists the start of every slice
/// explicitly; each labeled slice still spans one `dt`. Labeled axes come from
/// selecting individual slices and cannot be coarsened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubeReference {
    pub srs: String,
    pub extent: SpatialExtent,
    pub nx: usize,
    pub ny: usize,
    pub t0: NaiveDateTime,
    pub dt: TimeStep,
    pub nt: usize,
    pub chunk: ChunkShape,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub t_offset: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_labels: Option<Vec<NaiveDateTime>>,
}

fn is_zero(v: &usize) -> bool {
    *v == 0
}

impl CubeReference {
    /// Build a reference whose last slice contains `t1`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        srs: impl Into<String>,
        extent: SpatialExtent,
        nx: usize,
        ny: usize,
        t0: NaiveDateTime,
        t1: NaiveDateTime,
        dt: TimeStep,
        chunk: ChunkShape,
    ) -> Result<Self> {
        if t1 < t0 {
            return Err(CubeError::config(format!(
                "temporal extent end {} is before start {}",
                t1, t0
            )));
        }
        let nt = dt.index_of(t0, t1) as usize + 1;
        let reference = Self {
            srs: srs.into(),
            extent,
            nx,
            ny,
            t0,
            dt,
            nt,
            chunk,
            t_offset: 0,
            time_labels: None,
        };
        reference.validate()?;
        Ok(reference)
    }

    /// Check structural invariants (also used after deserialization).
    pub fn validate(&self) -> Result<()> {
        if self.nx == 0 || self.ny == 0 || self.nt == 0 {
            return Err(CubeError::config(format!(
                "cube size must be > 0 (nt={}, ny={}, nx={})",
                self.nt, self.ny, self.nx
            )));
        }
        if self.chunk.t == 0 || self.chunk.y == 0 || self.chunk.x == 0 {
            return Err(CubeError::config("chunk shape dimensions must be > 0"));
        }
        if !(self.extent.width() > 0.0 && self.extent.height() > 0.0) {
            return Err(CubeError::config(format!(
                "spatial extent {} is empty",
                self.extent
            )));
        }
        if self.dt.interval == 0 {
            return Err(CubeError::config("time step interval must be > 0"));
        }
        if let Some(labels) = &self.time_labels {
            if labels.len() != self.nt {
                return Err(CubeError::config(format!(
                    "{} time labels for {} slices",
                    labels.len(),
                    self.nt
                )));
            }
            if labels.windows(2).any(|w| w[0] >= w[1]) {
                return Err(CubeError::config("time labels must be strictly increasing"));
            }
        }
        Ok(())
    }

    /// Pixel width.
    pub fn dx(&self) -> f64 {
        self.extent.width() / self.nx as f64
    }

    /// Pixel height.
    pub fn dy(&self) -> f64 {
        self.extent.height() / self.ny as f64
    }

    /// Number of chunks along (t, y, x).
    pub fn chunk_counts(&self) -> (usize, usize, usize) {
        (
            div_ceil(self.nt, self.chunk.t),
            div_ceil(self.ny, self.chunk.y),
            div_ceil(self.nx, self.chunk.x),
        )
    }

    /// Total number of chunks.
    pub fn chunk_count(&self) -> usize {
        let (ct, cy, cx) = self.chunk_counts();
        ct * cy * cx
    }

    /// Whether a chunk index addresses an existing chunk.
    pub fn contains_chunk(&self, idx: ChunkIndex) -> bool {
        let (ct, cy, cx) = self.chunk_counts();
        idx.t < ct && idx.y < cy && idx.x < cx
    }

    fn check_chunk(&self, idx: ChunkIndex) -> Result<()> {
        if self.contains_chunk(idx) {
            Ok(())
        } else {
            let (ct, cy, cx) = self.chunk_counts();
            Err(CubeError::out_of_bounds(
                format!("chunk {}", idx),
                format!("{}x{}x{} chunks", ct, cy, cx),
            ))
        }
    }

    /// Linear chunk id: `x + nx_chunks * (y + ny_chunks * t)`.
    pub fn to_linear(&self, idx: ChunkIndex) -> u64 {
        let (_, cy, cx) = self.chunk_counts();
        (idx.x + cx * (idx.y + cy * idx.t)) as u64
    }

    /// Inverse of [`to_linear`](Self::to_linear).
    pub fn from_linear(&self, id: u64) -> Result<ChunkIndex> {
        let (_, cy, cx) = self.chunk_counts();
        let id = id as usize;
        let idx = ChunkIndex::new(id / (cx * cy), (id / cx) % cy, id % cx);
        self.check_chunk(idx)?;
        Ok(idx)
    }

    /// All chunk indices in ascending linear order.
    pub fn all_chunks(&self) -> Vec<ChunkIndex> {
        let (ct, cy, cx) = self.chunk_counts();
        let mut out = Vec::with_capacity(ct * cy * cx);
        for t in 0..ct {
            for y in 0..cy {
                for x in 0..cx {
                    out.push(ChunkIndex::new(t, y, x));
                }
            }
        }
        out
    }

    /// The whole cube as a pixel window.
    pub fn full_window(&self) -> PixelWindow {
        PixelWindow {
            t0: 0,
            t1: self.nt,
            y0: 0,
            y1: self.ny,
            x0: 0,
            x1: self.nx,
        }
    }

    /// Pixel window of a chunk, clipped to the extent.
    pub fn chunk_window(&self, idx: ChunkIndex) -> Result<PixelWindow> {
        self.check_chunk(idx)?;
        let c = self.chunk;
        Ok(PixelWindow {
            t0: idx.t * c.t,
            t1: ((idx.t + 1) * c.t).min(self.nt),
            y0: idx.y * c.y,
            y1: ((idx.y + 1) * c.y).min(self.ny),
            x0: idx.x * c.x,
            x1: ((idx.x + 1) * c.x).min(self.nx),
        })
    }

    /// Chunks whose windows intersect `window`, in ascending order.
    pub fn chunks_intersecting(&self, window: &PixelWindow) -> Vec<ChunkIndex> {
        let clipped = window.intersect(&self.full_window());
        if clipped.is_empty() {
            return Vec::new();
        }
        let c = self.chunk;
        let mut out = Vec::new();
        for t in clipped.t0 / c.t..=(clipped.t1 - 1) / c.t {
            for y in clipped.y0 / c.y..=(clipped.y1 - 1) / c.y {
                for x in clipped.x0 / c.x..=(clipped.x1 - 1) / c.x {
                    out.push(ChunkIndex::new(t, y, x));
                }
            }
        }
        out
    }

    /// Start of slice `k` (may be called with `k == nt` for the end instant).
    pub fn datetime_at(&self, k: usize) -> NaiveDateTime {
        match &self.time_labels {
            Some(labels) if k < labels.len() => labels[k],
            Some(labels) => match labels.last() {
                Some(last) => self.dt.advance(*last, (k + 1 - labels.len()) as i64),
                None => self.t0,
            },
            None => self.dt.advance(self.t0, (self.t_offset + k) as i64),
        }
    }

    pub fn is_labeled(&self) -> bool {
        self.time_labels.is_some()
    }

    /// Start of the temporal extent.
    pub fn start(&self) -> NaiveDateTime {
        self.datetime_at(0)
    }

    /// Exclusive end of the temporal extent.
    pub fn end(&self) -> NaiveDateTime {
        self.datetime_at(self.nt)
    }

    /// Slice containing `t`, `None` outside the temporal extent.
    pub fn slice_index_of(&self, t: NaiveDateTime) -> Option<usize> {
        if let Some(labels) = &self.time_labels {
            let k = labels.partition_point(|l| *l <= t).checked_sub(1)?;
            return (t < self.dt.advance(labels[k], 1)).then_some(k);
        }
        let k = self.slice_position(t);
        if k < 0 || k as usize >= self.nt {
            None
        } else {
            Some(k as usize)
        }
    }

    /// Slice position of `t` relative to the first slice, unclamped. On a
    /// labeled axis this is the last slice starting at or before `t`.
    pub fn slice_position(&self, t: NaiveDateTime) -> i64 {
        match &self.time_labels {
            Some(labels) => labels.partition_point(|l| *l <= t) as i64 - 1,
            None => self.dt.index_of(self.t0, t) - self.t_offset as i64,
        }
    }

    /// Physical bounds of a chunk: clipped pixel window, spatial rectangle and
    /// time range.
    pub fn bounds_of(&self, idx: ChunkIndex) -> Result<ChunkBounds> {
        let window = self.chunk_window(idx)?;
        Ok(ChunkBounds {
            extent: self.window_extent(&window),
            start: self.datetime_at(window.t0),
            end: self.datetime_at(window.t1),
            window,
        })
    }

    /// Spatial rectangle covered by a pixel window.
    pub fn window_extent(&self, window: &PixelWindow) -> SpatialExtent {
        let (dx, dy) = (self.dx(), self.dy());
        SpatialExtent {
            left: self.extent.left + window.x0 as f64 * dx,
            right: if window.x1 == self.nx {
                self.extent.right
            } else {
                self.extent.left + window.x1 as f64 * dx
            },
            bottom: self.extent.bottom + window.y0 as f64 * dy,
            top: if window.y1 == self.ny {
                self.extent.top
            } else {
                self.extent.bottom + window.y1 as f64 * dy
            },
        }
    }

    /// Target grid of a chunk for reading source imagery.
    pub fn target_grid(&self, window: &PixelWindow) -> TargetGrid {
        TargetGrid {
            srs: self.srs.clone(),
            extent: self.window_extent(window),
            nx: window.nx(),
            ny: window.ny(),
        }
    }

    /// Column of a coordinate; a coordinate exactly on a pixel boundary
    /// belongs to the pixel starting there.
    fn column_of(&self, x: f64) -> usize {
        let dx = self.dx();
        let mut col = ((x - self.extent.left) / dx).floor().max(0.0) as usize;
        if col > 0 && self.extent.left + col as f64 * dx > x {
            col -= 1;
        }
        if col + 1 < self.nx && self.extent.left + (col + 1) as f64 * dx <= x {
            col += 1;
        }
        col.min(self.nx - 1)
    }

    /// Row (counted from the bottom) of a coordinate.
    fn row_of(&self, y: f64) -> usize {
        let dy = self.dy();
        let mut row = ((y - self.extent.bottom) / dy).floor().max(0.0) as usize;
        if row > 0 && self.extent.bottom + row as f64 * dy > y {
            row -= 1;
        }
        if row + 1 < self.ny && self.extent.bottom + (row + 1) as f64 * dy <= y {
            row += 1;
        }
        row.min(self.ny - 1)
    }

    /// Chunk containing a space-time point.
    pub fn chunk_index_of(&self, p: SpaceTimePoint) -> Result<ChunkIndex> {
        let slice = self.slice_index_of(p.t);
        let slice = match slice {
            Some(k) if self.extent.contains(p.x, p.y) => k,
            _ => {
                return Err(CubeError::out_of_bounds(
                    format!("point ({}, {}, {})", p.x, p.y, p.t),
                    format!("{} x [{}, {})", self.extent, self.start(), self.end()),
                ))
            }
        };
        Ok(ChunkIndex::new(
            slice / self.chunk.t,
            self.row_of(p.y) / self.chunk.y,
            self.column_of(p.x) / self.chunk.x,
        ))
    }

    /// Same grid with a coarser temporal step starting at the same `t0`.
    ///
    /// The new step must be a multiple of the current one, so every coarse
    /// slice is an exact union of fine slices.
    pub fn derive_coarser_time(&self, dt: TimeStep) -> Result<CubeReference> {
        if self.is_labeled() {
            return Err(CubeError::config(
                "a labeled time axis cannot be coarsened",
            ));
        }
        if !dt.is_multiple_of(&self.dt) {
            return Err(CubeError::config(format!(
                "time step {} is not a coarser multiple of {}",
                dt, self.dt
            )));
        }
        let start = self.start();
        let last = self.datetime_at(self.nt - 1);
        let nt = dt.index_of(start, last) as usize + 1;
        let derived = CubeReference {
            t0: start,
            dt,
            nt,
            t_offset: 0,
            ..self.clone()
        };
        derived.validate()?;
        Ok(derived)
    }

    /// Spatial subset snapped outward to this grid's pixel boundaries.
    pub fn derive_spatial_subset(&self, rect: &SpatialExtent) -> Result<CubeReference> {
        let clipped = self.extent.intersection(rect).ok_or_else(|| {
            CubeError::config(format!(
                "subset {} does not overlap extent {}",
                rect, self.extent
            ))
        })?;
        let (dx, dy) = (self.dx(), self.dy());
        let x0 = self.column_of(clipped.left);
        let y0 = self.row_of(clipped.bottom);
        let x1 = (((clipped.right - self.extent.left) / dx).ceil() as usize).clamp(x0 + 1, self.nx);
        let y1 = (((clipped.top - self.extent.bottom) / dy).ceil() as usize).clamp(y0 + 1, self.ny);
        let window = PixelWindow {
            t0: 0,
            t1: self.nt,
            y0,
            y1,
            x0,
            x1,
        };
        Ok(CubeReference {
            extent: self.window_extent(&window),
            nx: x1 - x0,
            ny: y1 - y0,
            ..self.clone()
        })
    }

    /// Temporal subset covering the slices that contain `start..=end`.
    pub fn derive_time_subset(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<CubeReference> {
        if end < start {
            return Err(CubeError::config(format!(
                "time subset end {} is before start {}",
                end, start
            )));
        }
        if let Some(labels) = &self.time_labels {
            let kept: Vec<NaiveDateTime> = labels
                .iter()
                .copied()
                .filter(|l| *l <= end && self.dt.advance(*l, 1) > start)
                .collect();
            if kept.is_empty() {
                return Err(CubeError::config(format!(
                    "time subset [{}, {}] does not overlap any labeled slice",
                    start, end
                )));
            }
            return Ok(CubeReference {
                t0: kept[0],
                nt: kept.len(),
                time_labels: Some(kept),
                ..self.clone()
            });
        }
        let k0 = self.slice_position(start).max(0);
        let k1 = self.slice_position(end).min(self.nt as i64 - 1);
        if k1 < k0 || k0 as usize >= self.nt {
            return Err(CubeError::config(format!(
                "time subset [{}, {}] does not overlap [{}, {})",
                start,
                end,
                self.start(),
                self.end()
            )));
        }
        Ok(CubeReference {
            nt: (k1 - k0) as usize + 1,
            t_offset: self.t_offset + k0 as usize,
            ..self.clone()
        })
    }

    /// A single slice spanning the whole temporal extent.
    pub fn derive_single_slice(&self) -> CubeReference {
        let dt = if self.is_labeled() {
            let secs = (self.end() - self.start()).num_seconds().max(1);
            match u32::try_from(secs) {
                Ok(n) => TimeStep {
                    interval: n,
                    unit: TimeUnit::Second,
                },
                Err(_) => TimeStep {
                    interval: u32::try_from((secs + 86_399) / 86_400).unwrap_or(u32::MAX),
                    unit: TimeUnit::Day,
                },
            }
        } else {
            TimeStep {
                interval: self.dt.interval * self.nt as u32,
                unit: self.dt.unit,
            }
        };
        CubeReference {
            t0: self.start(),
            t_offset: 0,
            time_labels: None,
            dt,
            nt: 1,
            chunk: ChunkShape::new(1, self.chunk.y, self.chunk.x),
            ..self.clone()
        }
    }

    /// Labeled axis holding the slices that start exactly at `instants`.
    ///
    /// Returns the new reference and, per output slice, the slice index in
    /// `self`. Instants that do not start a slice are skipped; an empty
    /// selection is a configuration error.
    pub fn derive_time_selection(
        &self,
        instants: &[NaiveDateTime],
    ) -> Result<(CubeReference, Vec<usize>)> {
        let mut picked: Vec<usize> = instants
            .iter()
            .filter_map(|t| {
                self.slice_index_of(*t)
                    .filter(|k| self.datetime_at(*k) == *t)
            })
            .collect();
        picked.sort_unstable();
        picked.dedup();
        if picked.is_empty() {
            return Err(CubeError::config(format!(
                "none of the {} selected instants starts a slice of [{}, {})",
                instants.len(),
                self.start(),
                self.end()
            )));
        }
        let labels: Vec<NaiveDateTime> = picked.iter().map(|k| self.datetime_at(*k)).collect();
        let derived = CubeReference {
            t0: labels[0],
            nt: labels.len(),
            t_offset: 0,
            time_labels: Some(labels),
            ..self.clone()
        };
        derived.validate()?;
        Ok((derived, picked))
    }

    /// Single pixel `(ix, iy)` of this grid, one chunk per time chunk.
    pub fn derive_pixel(&self, ix: usize, iy: usize) -> Result<CubeReference> {
        if ix >= self.nx || iy >= self.ny {
            return Err(CubeError::out_of_bounds(
                format!("pixel ({}, {})", ix, iy),
                format!("{} x {} pixels", self.nx, self.ny),
            ));
        }
        let window = PixelWindow {
            t0: 0,
            t1: self.nt,
            y0: iy,
            y1: iy + 1,
            x0: ix,
            x1: ix + 1,
        };
        Ok(CubeReference {
            extent: self.window_extent(&window),
            nx: 1,
            ny: 1,
            chunk: ChunkShape::new(self.chunk.t, 1, 1),
            ..self.clone()
        })
    }

    /// Pixel column and row containing a coordinate.
    pub fn pixel_of(&self, x: f64, y: f64) -> Result<(usize, usize)> {
        if !self.extent.contains(x, y) {
            return Err(CubeError::out_of_bounds(
                format!("coordinate ({}, {})", x, y),
                self.extent.to_string(),
            ));
        }
        Ok((self.column_of(x), self.row_of(y)))
    }

    /// Grid of `fx` by `fy` pixel blocks. The extent grows to whole blocks
    /// at the right and top edges.
    pub fn derive_coarser_space(&self, fx: usize, fy: usize) -> Result<CubeReference> {
        if fx == 0 || fy == 0 {
            return Err(CubeError::config("aggregation factors must be > 0"));
        }
        let nx = div_ceil(self.nx, fx);
        let ny = div_ceil(self.ny, fy);
        let derived = CubeReference {
            extent: SpatialExtent {
                left: self.extent.left,
                right: self.extent.left + (nx * fx) as f64 * self.dx(),
                bottom: self.extent.bottom,
                top: self.extent.bottom + (ny * fy) as f64 * self.dy(),
            },
            nx,
            ny,
            chunk: ChunkShape::new(self.chunk.t, self.chunk.y.min(ny), self.chunk.x.min(nx)),
            ..self.clone()
        };
        derived.validate()?;
        Ok(derived)
    }

    /// The whole extent collapsed to a single pixel, one chunk per time
    /// chunk.
    pub fn derive_single_pixel(&self) -> CubeReference {
        CubeReference {
            nx: 1,
            ny: 1,
            chunk: ChunkShape::new(self.chunk.t, 1, 1),
            ..self.clone()
        }
    }
}

fn div_ceil(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}
