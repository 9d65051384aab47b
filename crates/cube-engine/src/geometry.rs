//! Polygons in reference coordinates.

use crate::error::{CubeError, Result};
use crate::reference::SpatialExtent;

/// Polygon given as closed or open rings. Inside-ness follows the even-odd
/// rule, so inner rings act as holes.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    rings: Vec<Vec<[f64; 2]>>,
    bbox: SpatialExtent,
}

impl Polygon {
    pub fn new(rings: Vec<Vec<[f64; 2]>>) -> Result<Self> {
        if rings.is_empty() || rings.iter().any(|r| r.len() < 3) {
            return Err(CubeError::config(
                "a polygon needs at least one ring with 3 or more vertices",
            ));
        }
        let mut bbox = SpatialExtent::new(
            f64::INFINITY,
            f64::NEG_INFINITY,
            f64::INFINITY,
            f64::NEG_INFINITY,
        );
        for [x, y] in rings.iter().flatten() {
            if !x.is_finite() || !y.is_finite() {
                return Err(CubeError::config("polygon has non-finite vertices"));
            }
            bbox.left = bbox.left.min(*x);
            bbox.right = bbox.right.max(*x);
            bbox.bottom = bbox.bottom.min(*y);
            bbox.top = bbox.top.max(*y);
        }
        Ok(Self { rings, bbox })
    }

    pub fn rings(&self) -> &[Vec<[f64; 2]>] {
        &self.rings
    }

    /// Closed bounding box of all vertices.
    pub fn bbox(&self) -> SpatialExtent {
        self.bbox
    }

    /// Whether the bounding box touches `extent`.
    pub fn bbox_touches(&self, extent: &SpatialExtent) -> bool {
        extent.left <= self.bbox.right
            && extent.right >= self.bbox.left
            && extent.bottom <= self.bbox.top
            && extent.top >= self.bbox.bottom
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        if x < self.bbox.left || x > self.bbox.right || y < self.bbox.bottom || y > self.bbox.top {
            return false;
        }
        let mut inside = false;
        for ring in &self.rings {
            let n = ring.len();
            let mut j = n - 1;
            for i in 0..n {
                let [xi, yi] = ring[i];
                let [xj, yj] = ring[j];
                if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                    inside = !inside;
                }
                j = i;
            }
        }
        inside
    }
}
