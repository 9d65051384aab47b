//! Incremental aggregators used by the reduce, window and aggregate operators.
//!
//! A [`PixelAccumulator`] holds per-pixel state for one band and folds one
//! slice of values at a time, so reducing a time series only needs the current
//! chunk in memory. Nodata (NaN) inputs are skipped.
//!
//! `median` is the exception: it has to retain every valid value per pixel
//! until [`PixelAccumulator::finalize`], so its memory grows with the length
//! of the series.

use serde::{Deserialize, Serialize};

use crate::error::{CubeError, Result};

/// Available aggregation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregatorKind {
    Min,
    Max,
    Mean,
    Median,
    Var,
    Sd,
    Count,
    Sum,
    Prod,
    First,
    Last,
    WhichMin,
    WhichMax,
}

impl AggregatorKind {
    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "mean" => Ok(Self::Mean),
            "median" => Ok(Self::Median),
            "var" => Ok(Self::Var),
            "sd" => Ok(Self::Sd),
            "count" => Ok(Self::Count),
            "sum" => Ok(Self::Sum),
            "prod" => Ok(Self::Prod),
            "first" => Ok(Self::First),
            "last" => Ok(Self::Last),
            "which_min" => Ok(Self::WhichMin),
            "which_max" => Ok(Self::WhichMax),
            other => Err(CubeError::config(format!("unknown aggregator '{}'", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
            Self::Mean => "mean",
            Self::Median => "median",
            Self::Var => "var",
            Self::Sd => "sd",
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Prod => "prod",
            Self::First => "first",
            Self::Last => "last",
            Self::WhichMin => "which_min",
            Self::WhichMax => "which_max",
        }
    }

    /// Whether the aggregator keeps the whole series per pixel.
    pub fn retains_series(&self) -> bool {
        matches!(self, Self::Median)
    }

    /// Whether the result depends on the order inputs arrive in.
    pub fn is_order_sensitive(&self) -> bool {
        matches!(
            self,
            Self::First | Self::Last | Self::WhichMin | Self::WhichMax
        )
    }

    /// Whether the result is a position rather than a value.
    pub fn is_positional(&self) -> bool {
        matches!(self, Self::WhichMin | Self::WhichMax)
    }
}

impl std::fmt::Display for AggregatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-pixel aggregation state for one band.
///
/// The meaning of the `a`, `b` and `c` arrays depends on the kind:
///
/// | kind | a | b | c |
/// |---|---|---|---|
/// | min, max, first, last | value | | |
/// | sum, prod | value | count | |
/// | mean | sum | count | |
/// | var, sd | running mean | count | sum of squared deviations |
/// | count | count | | |
/// | which_min, which_max | best value | best position | |
#[derive(Debug, Clone)]
pub struct PixelAccumulator {
    kind: AggregatorKind,
    a: Vec<f64>,
    b: Vec<f64>,
    c: Vec<f64>,
    series: Vec<Vec<f64>>,
}

impl PixelAccumulator {
    /// Fresh state for `len` pixels.
    pub fn new(kind: AggregatorKind, len: usize) -> Self {
        let init_a = match kind {
            AggregatorKind::Count | AggregatorKind::Mean | AggregatorKind::Var | AggregatorKind::Sd => 0.0,
            AggregatorKind::Sum => 0.0,
            AggregatorKind::Prod => 1.0,
            _ => f64::NAN,
        };
        let needs_b = !matches!(
            kind,
            AggregatorKind::Min
                | AggregatorKind::Max
                | AggregatorKind::First
                | AggregatorKind::Last
                | AggregatorKind::Count
                | AggregatorKind::Median
        );
        let init_b = if kind.is_positional() { f64::NAN } else { 0.0 };
        Self {
            kind,
            a: vec![init_a; len],
            b: if needs_b { vec![init_b; len] } else { Vec::new() },
            c: if matches!(kind, AggregatorKind::Var | AggregatorKind::Sd) {
                vec![0.0; len]
            } else {
                Vec::new()
            },
            series: if kind.retains_series() {
                vec![Vec::new(); len]
            } else {
                Vec::new()
            },
        }
    }

    pub fn kind(&self) -> AggregatorKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
    }

    /// Fold one value into pixel `i`. `position` is reported by
    /// which_min/which_max and ignored otherwise.
    #[inline]
    pub fn fold_at(&mut self, i: usize, v: f64, position: usize) {
        if v.is_nan() {
            return;
        }
        let a = &mut self.a[i];
        match self.kind {
            AggregatorKind::Min => {
                if a.is_nan() || v < *a {
                    *a = v;
                }
            }
            AggregatorKind::Max => {
                if a.is_nan() || v > *a {
                    *a = v;
                }
            }
            AggregatorKind::First => {
                if a.is_nan() {
                    *a = v;
                }
            }
            AggregatorKind::Last => *a = v,
            AggregatorKind::Count => *a += 1.0,
            AggregatorKind::Sum | AggregatorKind::Mean => {
                *a += v;
                self.b[i] += 1.0;
            }
            AggregatorKind::Prod => {
                *a *= v;
                self.b[i] += 1.0;
            }
            AggregatorKind::Var | AggregatorKind::Sd => {
                // Welford
                self.b[i] += 1.0;
                let delta = v - *a;
                *a += delta / self.b[i];
                self.c[i] += delta * (v - *a);
            }
            AggregatorKind::WhichMin => {
                if a.is_nan() || v < *a {
                    *a = v;
                    self.b[i] = position as f64;
                }
            }
            AggregatorKind::WhichMax => {
                if a.is_nan() || v > *a {
                    *a = v;
                    self.b[i] = position as f64;
                }
            }
            AggregatorKind::Median => self.series[i].push(v),
        }
    }

    /// Fold a whole slice (one value per pixel) observed at `position`.
    pub fn fold(&mut self, values: &[f64], position: usize) {
        debug_assert_eq!(values.len(), self.len());
        for (i, v) in values.iter().enumerate() {
            self.fold_at(i, *v, position);
        }
    }

    /// Final per-pixel results. Pixels without valid input are nodata,
    /// except `count` which reports zero.
    pub fn finalize(self) -> Vec<f64> {
        let Self {
            kind,
            a,
            b,
            c,
            series,
        } = self;
        match kind {
            AggregatorKind::Min
            | AggregatorKind::Max
            | AggregatorKind::First
            | AggregatorKind::Last
            | AggregatorKind::Count => a,
            AggregatorKind::Sum | AggregatorKind::Prod => a
                .into_iter()
                .zip(b)
                .map(|(v, n)| if n > 0.0 { v } else { f64::NAN })
                .collect(),
            AggregatorKind::Mean => a
                .into_iter()
                .zip(b)
                .map(|(s, n)| if n > 0.0 { s / n } else { f64::NAN })
                .collect(),
            AggregatorKind::Var | AggregatorKind::Sd => b
                .into_iter()
                .zip(c)
                .map(|(n, m2)| {
                    if n < 2.0 {
                        f64::NAN
                    } else if kind == AggregatorKind::Sd {
                        (m2 / (n - 1.0)).sqrt()
                    } else {
                        m2 / (n - 1.0)
                    }
                })
                .collect(),
            AggregatorKind::WhichMin | AggregatorKind::WhichMax => b,
            AggregatorKind::Median => series.into_iter().map(median_of).collect(),
        }
    }
}

fn median_of(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|x, y| x.total_cmp(y));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// Reduce a fully materialised series in one pass over all of its values.
///
/// Positions reported by which_min/which_max are indices into `series`.
pub fn reduce_series(kind: AggregatorKind, series: &[f64]) -> f64 {
    let valid: Vec<(usize, f64)> = series
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .collect();
    let n = valid.len() as f64;
    if valid.is_empty() {
        return if kind == AggregatorKind::Count { 0.0 } else { f64::NAN };
    }
    match kind {
        AggregatorKind::Min => valid.iter().map(|p| p.1).fold(f64::INFINITY, f64::min),
        AggregatorKind::Max => valid.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max),
        AggregatorKind::Sum => valid.iter().map(|p| p.1).sum(),
        AggregatorKind::Prod => valid.iter().map(|p| p.1).product(),
        AggregatorKind::Mean => valid.iter().map(|p| p.1).sum::<f64>() / n,
        AggregatorKind::Count => n,
        AggregatorKind::First => valid[0].1,
        AggregatorKind::Last => valid[valid.len() - 1].1,
        AggregatorKind::Var | AggregatorKind::Sd => {
            if valid.len() < 2 {
                return f64::NAN;
            }
            let mean = valid.iter().map(|p| p.1).sum::<f64>() / n;
            let var = valid.iter().map(|p| (p.1 - mean).powi(2)).sum::<f64>() / (n - 1.0);
            if kind == AggregatorKind::Sd {
                var.sqrt()
            } else {
                var
            }
        }
        AggregatorKind::Median => median_of(valid.iter().map(|p| p.1).collect()),
        AggregatorKind::WhichMin => {
            let mut best = valid[0];
            for p in &valid[1..] {
                if p.1 < best.1 {
                    best = *p;
                }
            }
            best.0 as f64
        }
        AggregatorKind::WhichMax => {
            let mut best = valid[0];
            for p in &valid[1..] {
                if p.1 > best.1 {
                    best = *p;
                }
            }
            best.0 as f64
        }
    }
}
