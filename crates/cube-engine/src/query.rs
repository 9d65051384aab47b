//! Point, time series and zonal queries against a cube.
//!
//! Queries group their targets by chunk, so every chunk a query touches is
//! computed once no matter how many targets fall inside it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregate::PixelAccumulator;
use crate::cube::{Cube, ReducerSpec};
use crate::error::{CubeError, Result};
use crate::geometry::Polygon;
use crate::reference::{ChunkIndex, SpaceTimePoint};

/// Values of every band at a set of space-time points.
///
/// Row `i` holds one value per band for `points[i]`; points outside the
/// cube are nodata in every band.
pub fn query_points(cube: &dyn Cube, points: &[SpaceTimePoint]) -> Result<Vec<Vec<f64>>> {
    let reference = cube.reference();
    let nb = cube.bands().len();
    let mut rows = vec![vec![f64::NAN; nb]; points.len()];

    let mut by_chunk: BTreeMap<ChunkIndex, Vec<usize>> = BTreeMap::new();
    for (i, p) in points.iter().enumerate() {
        if let Ok(idx) = reference.chunk_index_of(*p) {
            by_chunk.entry(idx).or_default().push(i);
        }
    }
    debug!(points = points.len(), chunks = by_chunk.len(), "Querying points");

    for (idx, members) in by_chunk {
        let w = reference.chunk_window(idx)?;
        let chunk = cube.compute_chunk(idx)?;
        for i in members {
            let p = points[i];
            let (column, row) = reference.pixel_of(p.x, p.y)?;
            let slice = reference
                .slice_index_of(p.t)
                .ok_or_else(|| CubeError::Internal(format!("point {} left its chunk", i)))?;
            for (b, value) in rows[i].iter_mut().enumerate() {
                *value = chunk.get(b, slice - w.t0, row - w.y0, column - w.x0);
            }
        }
    }
    Ok(rows)
}

/// Full time series of every band at a spatial location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointSeries {
    pub x: f64,
    pub y: f64,
    /// `values[band][t]`; nodata everywhere when the location is outside.
    pub values: Vec<Vec<f64>>,
}

/// Time series of every band at each `[x, y]` location.
pub fn query_timeseries(cube: &dyn Cube, locations: &[[f64; 2]]) -> Result<Vec<PointSeries>> {
    let reference = cube.reference();
    let nb = cube.bands().len();
    let mut series: Vec<PointSeries> = locations
        .iter()
        .map(|&[x, y]| PointSeries {
            x,
            y,
            values: vec![vec![f64::NAN; reference.nt]; nb],
        })
        .collect();

    // Locations by spatial chunk, with their pixel.
    let mut by_chunk: BTreeMap<(usize, usize), Vec<(usize, usize, usize)>> = BTreeMap::new();
    for (i, &[x, y]) in locations.iter().enumerate() {
        if let Ok((column, row)) = reference.pixel_of(x, y) {
            by_chunk
                .entry((row / reference.chunk.y, column / reference.chunk.x))
                .or_default()
                .push((i, column, row));
        }
    }
    debug!(locations = locations.len(), chunks = by_chunk.len(), "Querying time series");

    let (time_chunks, _, _) = reference.chunk_counts();
    for ((cy, cx), members) in by_chunk {
        for ct in 0..time_chunks {
            let idx = ChunkIndex::new(ct, cy, cx);
            let w = reference.chunk_window(idx)?;
            let chunk = cube.compute_chunk(idx)?;
            for &(i, column, row) in &members {
                for (b, band) in series[i].values.iter_mut().enumerate() {
                    for t in 0..w.nt() {
                        band[w.t0 + t] = chunk.get(b, t, row - w.y0, column - w.x0);
                    }
                }
            }
        }
    }
    Ok(series)
}

/// Statistics of one zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneStatistics {
    /// Output names, e.g. `B04_mean`, one per reducer.
    pub names: Vec<String>,
    /// `values[reducer][t]`.
    pub values: Vec<Vec<f64>>,
}

/// Aggregate the pixels whose centre lies inside each zone, per time slice.
///
/// Zones may overlap; a pixel counts towards every zone containing it. Chunks
/// outside all zone bounding boxes are never computed.
pub fn zonal_statistics(
    cube: &dyn Cube,
    zones: &[Polygon],
    reducers: &[ReducerSpec],
) -> Result<Vec<ZoneStatistics>> {
    if reducers.is_empty() {
        return Err(CubeError::config("zonal statistics need at least one reducer"));
    }
    if let Some(r) = reducers.iter().find(|r| r.reducer.is_positional()) {
        return Err(CubeError::config(format!(
            "reducer '{}' is not supported by zonal statistics",
            r.reducer
        )));
    }
    let band_index = reducers
        .iter()
        .map(|r| cube.bands().require(&r.band))
        .collect::<Result<Vec<_>>>()?;

    let reference = cube.reference();
    let mut accs: Vec<Vec<PixelAccumulator>> = zones
        .iter()
        .map(|_| {
            reducers
                .iter()
                .map(|r| PixelAccumulator::new(r.reducer, reference.nt))
                .collect()
        })
        .collect();

    let (dx, dy) = (reference.dx(), reference.dy());
    let (time_chunks, cy, cx) = reference.chunk_counts();
    for y in 0..cy {
        for x in 0..cx {
            let spatial = ChunkIndex::new(0, y, x);
            let bounds = reference.bounds_of(spatial)?;
            let w = bounds.window;
            // In-chunk pixel offsets inside each zone.
            let masks: Vec<Vec<usize>> = zones
                .iter()
                .map(|zone| {
                    if !zone.bbox_touches(&bounds.extent) {
                        return Vec::new();
                    }
                    let mut inside = Vec::new();
                    for row in 0..w.ny() {
                        let py = reference.extent.bottom + ((w.y0 + row) as f64 + 0.5) * dy;
                        for col in 0..w.nx() {
                            let px = reference.extent.left + ((w.x0 + col) as f64 + 0.5) * dx;
                            if zone.contains(px, py) {
                                inside.push(row * w.nx() + col);
                            }
                        }
                    }
                    inside
                })
                .collect();
            if masks.iter().all(Vec::is_empty) {
                continue;
            }
            debug!(chunk_y = y, chunk_x = x, "Folding zonal chunk");

            for ct in 0..time_chunks {
                let idx = ChunkIndex::new(ct, y, x);
                let t0 = reference.chunk_window(idx)?.t0;
                let chunk = cube.compute_chunk(idx)?;
                for (zone_accs, mask) in accs.iter_mut().zip(&masks) {
                    for (acc, &b) in zone_accs.iter_mut().zip(&band_index) {
                        for t in 0..chunk.nt() {
                            let plane = chunk.plane(b, t);
                            for &offset in mask {
                                acc.fold_at(t0 + t, plane[offset], 0);
                            }
                        }
                    }
                }
            }
        }
    }

    let names: Vec<String> = reducers.iter().map(ReducerSpec::output_name).collect();
    Ok(accs
        .into_iter()
        .map(|zone_accs| ZoneStatistics {
            names: names.clone(),
            values: zone_accs.into_iter().map(PixelAccumulator::finalize).collect(),
        })
        .collect())
}
