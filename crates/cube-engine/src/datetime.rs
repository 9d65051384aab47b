//! Temporal granularity and calendar arithmetic.
//!
//! Fixed units (second to week) advance by a constant number of seconds.
//! Calendar units (month, quarter, year) advance by whole months and clamp
//! the day of month to the end of shorter months, so slice `k` always starts
//! at `t0 + k * dt` computed directly from `t0` (no drift from repeated
//! clamping).

use chrono::{Datelike, Duration, Months, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{CubeError, Result};

/// Temporal unit of a cube's time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeUnit {
    /// Length in seconds for fixed units, `None` for calendar units.
    pub fn fixed_seconds(&self) -> Option<i64> {
        match self {
            Self::Second => Some(1),
            Self::Minute => Some(60),
            Self::Hour => Some(3_600),
            Self::Day => Some(86_400),
            Self::Week => Some(7 * 86_400),
            Self::Month | Self::Quarter | Self::Year => None,
        }
    }

    /// Length in months for calendar units, `None` for fixed units.
    pub fn months(&self) -> Option<i64> {
        match self {
            Self::Month => Some(1),
            Self::Quarter => Some(3),
            Self::Year => Some(12),
            _ => None,
        }
    }

    /// Get the unit name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Quarter => "quarter",
            Self::Year => "year",
        }
    }
}

/// A temporal step: `interval` repetitions of `unit`.
///
/// Serialized as its ISO 8601 duration, e.g. `"P1D"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeStep {
    pub interval: u32,
    pub unit: TimeUnit,
}

impl TimeStep {
    /// Create a step, rejecting a zero interval.
    pub fn new(interval: u32, unit: TimeUnit) -> Result<Self> {
        if interval == 0 {
            return Err(CubeError::config("time step interval must be > 0"));
        }
        Ok(Self { interval, unit })
    }

    pub fn days(n: u32) -> Self {
        Self { interval: n, unit: TimeUnit::Day }
    }

    pub fn months(n: u32) -> Self {
        Self { interval: n, unit: TimeUnit::Month }
    }

    /// Parse an ISO 8601 duration with a single component, e.g. `P1D`,
    /// `PT6H`, `P1M`, `P2W`, `P1Y`. `P1Q` is accepted for quarters.
    pub fn parse(s: &str) -> Result<Self> {
        let upper = s.trim().to_uppercase();
        let body = upper
            .strip_prefix('P')
            .ok_or_else(|| CubeError::config(format!("invalid time step '{}'", s)))?;
        let (time_part, body) = match body.strip_prefix('T') {
            Some(rest) => (true, rest),
            None => (false, body),
        };
        if body.len() < 2 {
            return Err(CubeError::config(format!("invalid time step '{}'", s)));
        }
        let (digits, designator) = body.split_at(body.len() - 1);
        let interval: u32 = digits
            .parse()
            .map_err(|_| CubeError::config(format!("invalid time step '{}'", s)))?;
        let unit = match (time_part, designator) {
            (true, "H") => TimeUnit::Hour,
            (true, "M") => TimeUnit::Minute,
            (true, "S") => TimeUnit::Second,
            (false, "D") => TimeUnit::Day,
            (false, "W") => TimeUnit::Week,
            (false, "M") => TimeUnit::Month,
            (false, "Q") => TimeUnit::Quarter,
            (false, "Y") => TimeUnit::Year,
            _ => return Err(CubeError::config(format!("invalid time step '{}'", s))),
        };
        Self::new(interval, unit)
    }

    /// Whether this step follows the calendar (month, quarter, year).
    pub fn is_calendar(&self) -> bool {
        self.unit.months().is_some()
    }

    /// Total step length in months for calendar steps.
    fn total_months(&self) -> Option<i64> {
        self.unit.months().map(|m| m * self.interval as i64)
    }

    /// Total step length in seconds for fixed steps.
    fn total_seconds(&self) -> Option<i64> {
        self.unit.fixed_seconds().map(|s| s * self.interval as i64)
    }

    /// Average length in seconds, used only to estimate slice indices.
    pub fn approx_seconds(&self) -> f64 {
        match (self.total_seconds(), self.total_months()) {
            (Some(s), _) => s as f64,
            (None, Some(m)) => m as f64 * 30.436_875 * 86_400.0,
            (None, None) => 1.0,
        }
    }

    /// `origin + n * self`, with month-end clamping for calendar steps.
    pub fn advance(&self, origin: NaiveDateTime, n: i64) -> NaiveDateTime {
        if let Some(months) = self.total_months() {
            let total = months * n;
            let shifted = if total >= 0 {
                origin.checked_add_months(Months::new(total as u32))
            } else {
                origin.checked_sub_months(Months::new((-total) as u32))
            };
            shifted.unwrap_or(if total >= 0 {
                NaiveDateTime::MAX
            } else {
                NaiveDateTime::MIN
            })
        } else {
            let secs = self.total_seconds().unwrap_or(1) * n;
            origin
                .checked_add_signed(Duration::seconds(secs))
                .unwrap_or(if secs >= 0 {
                    NaiveDateTime::MAX
                } else {
                    NaiveDateTime::MIN
                })
        }
    }

    /// Index of the step interval starting at `origin` that contains `t`.
    ///
    /// Intervals are half-open, so a point exactly on a boundary belongs to
    /// the interval starting there. Negative for points before `origin`.
    pub fn index_of(&self, origin: NaiveDateTime, t: NaiveDateTime) -> i64 {
        let mut k = match self.total_months() {
            Some(m) => {
                let months = (t.year() as i64 - origin.year() as i64) * 12
                    + (t.month() as i64 - origin.month() as i64);
                months.div_euclid(m)
            }
            None => {
                let secs = (t - origin).num_seconds();
                secs.div_euclid(self.total_seconds().unwrap_or(1))
            }
        };
        while self.advance(origin, k) > t {
            k -= 1;
        }
        while self.advance(origin, k + 1) <= t {
            k += 1;
        }
        k
    }

    /// Whether every boundary of `self` coincides with a boundary of `finer`
    /// when both start at the same origin.
    pub fn is_multiple_of(&self, finer: &TimeStep) -> bool {
        match (
            self.total_months(),
            finer.total_months(),
            self.total_seconds(),
            finer.total_seconds(),
        ) {
            (Some(a), Some(b), _, _) => a % b == 0,
            (_, _, Some(a), Some(b)) => a % b == 0,
            // Calendar steps are whole days, so any fixed step dividing a day fits.
            (Some(_), None, _, Some(b)) => 86_400 % b == 0,
            _ => false,
        }
    }
}

impl std::fmt::Display for TimeStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.unit {
            TimeUnit::Second => write!(f, "PT{}S", self.interval),
            TimeUnit::Minute => write!(f, "PT{}M", self.interval),
            TimeUnit::Hour => write!(f, "PT{}H", self.interval),
            TimeUnit::Day => write!(f, "P{}D", self.interval),
            TimeUnit::Week => write!(f, "P{}W", self.interval),
            TimeUnit::Month => write!(f, "P{}M", self.interval),
            TimeUnit::Quarter => write!(f, "P{}Q", self.interval),
            TimeUnit::Year => write!(f, "P{}Y", self.interval),
        }
    }
}

impl TryFrom<String> for TimeStep {
    type Error = CubeError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<TimeStep> for String {
    fn from(dt: TimeStep) -> Self {
        dt.to_string()
    }
}

/// Parse a datetime in one of the formats accepted by cube descriptions:
/// `YYYY-MM-DDTHH:MM:SS`, `YYYY-MM-DD`, `YYYY-MM` or `YYYY`.
pub fn parse_datetime(s: &str) -> Result<NaiveDateTime> {
    let s = s.trim();
    if let Ok(t) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(t);
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(t);
    }
    let padded = match s.len() {
        4 => format!("{}-01-01", s),
        7 => format!("{}-01", s),
        _ => s.to_string(),
    };
    chrono::NaiveDate::parse_from_str(&padded, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| CubeError::config(format!("invalid datetime '{}'", s)))
}
