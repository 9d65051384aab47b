//! Serializable cube graph descriptions.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::aggregate::AggregatorKind;
use crate::config::EdgePolicy;
use crate::datetime::TimeStep;
use crate::error::{CubeError, Result};
use crate::reference::{CubeReference, SpatialExtent};

use super::fill_time::FillMethod;
use super::source::{ResamplingMethod, SliceAggregation};

/// An aggregation applied to one input band, written `mean(B04)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReducerSpec {
    pub reducer: AggregatorKind,
    pub band: String,
}

impl ReducerSpec {
    pub fn new(reducer: AggregatorKind, band: impl Into<String>) -> Self {
        Self {
            reducer,
            band: band.into(),
        }
    }

    /// Parse the `reducer(band)` shorthand.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let open = s.find('(');
        let close = s.rfind(')');
        match (open, close) {
            (Some(o), Some(c)) if c == s.len() - 1 && o > 0 && c > o + 1 => Ok(Self {
                reducer: AggregatorKind::parse(s[..o].trim())?,
                band: s[o + 1..c].trim().to_string(),
            }),
            _ => Err(CubeError::config(format!(
                "invalid reducer '{}', expected reducer(band)",
                s
            ))),
        }
    }

    /// Output band name, e.g. `B04_mean`.
    pub fn output_name(&self) -> String {
        format!("{}_{}", self.band, self.reducer)
    }
}

/// What a window-time operator computes over each window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WindowOp {
    /// Aggregate each listed band over the window.
    Reduce { reducers: Vec<ReducerSpec> },
    /// Weighted sum over the window, applied to every band.
    Kernel { weights: Vec<f64> },
}

/// Description of a cube graph, tagged by operator type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CubeSpec {
    Source {
        collection: String,
        reference: CubeReference,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bands: Option<Vec<String>>,
        #[serde(default)]
        resampling: ResamplingMethod,
        #[serde(default)]
        aggregation: SliceAggregation,
    },
    Dummy {
        reference: CubeReference,
        bands: Vec<String>,
        fill: f64,
    },
    SelectBands {
        input: Box<CubeSpec>,
        bands: Vec<String>,
    },
    RenameBands {
        input: Box<CubeSpec>,
        /// (old, new) pairs.
        names: Vec<(String, String)>,
    },
    FilterPixel {
        input: Box<CubeSpec>,
        predicate: String,
    },
    FilterGeom {
        input: Box<CubeSpec>,
        /// Polygon rings in reference coordinates; holes by even-odd rule.
        rings: Vec<Vec<[f64; 2]>>,
    },
    ApplyPixel {
        input: Box<CubeSpec>,
        expressions: Vec<String>,
        names: Vec<String>,
        #[serde(default)]
        keep_bands: bool,
    },
    ReduceTime {
        input: Box<CubeSpec>,
        reducers: Vec<ReducerSpec>,
    },
    ReduceSpace {
        input: Box<CubeSpec>,
        reducers: Vec<ReducerSpec>,
    },
    WindowTime {
        input: Box<CubeSpec>,
        left: usize,
        right: usize,
        op: WindowOp,
        /// Falls back to the engine's configured default when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        edge_policy: Option<EdgePolicy>,
    },
    JoinBands {
        inputs: Vec<CubeSpec>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefixes: Option<Vec<String>>,
    },
    FillTime {
        input: Box<CubeSpec>,
        method: FillMethod,
    },
    Stream {
        input: Box<CubeSpec>,
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Crop {
        input: Box<CubeSpec>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        extent: Option<SpatialExtent>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start: Option<NaiveDateTime>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end: Option<NaiveDateTime>,
    },
    AggregateTime {
        input: Box<CubeSpec>,
        dt: TimeStep,
        method: AggregatorKind,
    },
    AggregateSpace {
        input: Box<CubeSpec>,
        /// Block size `[fx, fy]` in input pixels.
        factor: [usize; 2],
        method: AggregatorKind,
    },
    SelectTime {
        input: Box<CubeSpec>,
        instants: Vec<NaiveDateTime>,
    },
    SliceTime {
        input: Box<CubeSpec>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        datetime: Option<NaiveDateTime>,
    },
    SliceSpace {
        input: Box<CubeSpec>,
        /// `[column, row]`, rows counted from the bottom.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pixel: Option<[usize; 2]>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        point: Option<[f64; 2]>,
    },
}

impl CubeSpec {
    /// Operator name, as used in the `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Source { .. } => "source",
            Self::Dummy { .. } => "dummy",
            Self::SelectBands { .. } => "select_bands",
            Self::RenameBands { .. } => "rename_bands",
            Self::FilterPixel { .. } => "filter_pixel",
            Self::FilterGeom { .. } => "filter_geom",
            Self::ApplyPixel { .. } => "apply_pixel",
            Self::ReduceTime { .. } => "reduce_time",
            Self::ReduceSpace { .. } => "reduce_space",
            Self::WindowTime { .. } => "window_time",
            Self::JoinBands { .. } => "join_bands",
            Self::FillTime { .. } => "fill_time",
            Self::Stream { .. } => "stream",
            Self::Crop { .. } => "crop",
            Self::AggregateTime { .. } => "aggregate_time",
            Self::AggregateSpace { .. } => "aggregate_space",
            Self::SelectTime { .. } => "select_time",
            Self::SliceTime { .. } => "slice_time",
            Self::SliceSpace { .. } => "slice_space",
        }
    }

    /// Parse from JSON text.
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
