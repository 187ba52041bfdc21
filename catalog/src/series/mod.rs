//! Time series values, queries and summaries

pub mod normalize;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use normalize::{average, normalize, sum, Consolidation, Operator};

/// A single timestamped value; `NaN` marks an unknown value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub time: DateTime<Utc>,
    pub value: f64,
}

impl Point {
    pub fn new(time: DateTime<Utc>, value: f64) -> Self {
        Self { time, value }
    }

    pub fn unknown(time: DateTime<Utc>) -> Self {
        Self { time, value: f64::NAN }
    }
}

/// A series of points plus its computed summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    /// `None` when the backend returned no data at all
    pub points: Option<Vec<Point>>,
    #[serde(default)]
    pub summary: BTreeMap<String, f64>,
}

impl Series {
    pub fn new(points: Vec<Point>) -> Self {
        Self {
            points: Some(points),
            summary: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().flatten().map(|p| p.value).collect()
    }

    /// Multiply every known value by `factor`
    pub fn scale(&mut self, factor: f64) {
        for point in self.points.iter_mut().flatten() {
            if !point.value.is_nan() {
                point.value *= factor;
            }
        }
    }

    /// Replace unknown values with zero
    pub fn zero_nulls(&mut self) {
        for point in self.points.iter_mut().flatten() {
            if point.value.is_nan() {
                point.value = 0.0;
            }
        }
    }

    /// Fill `min`, `max`, `avg` and `last`, plus one `{p}th` entry per percentile
    pub fn summarize(&mut self, percentiles: &[f64]) {
        let mut min = f64::NAN;
        let mut max = f64::NAN;
        let mut last = f64::NAN;
        let mut total = 0.0;
        let mut count = 0usize;

        for value in self.values().into_iter().filter(|v| !v.is_nan()) {
            if value < min || min.is_nan() {
                min = value;
            }
            if value > max || max.is_nan() {
                max = value;
            }
            last = value;
            total += value;
            count += 1;
        }

        self.summary.insert("min".to_string(), min);
        self.summary.insert("max".to_string(), max);
        self.summary.insert("avg".to_string(), total / count as f64);
        self.summary.insert("last".to_string(), last);

        if !percentiles.is_empty() {
            self.percentiles(percentiles);
        }
    }

    /// Percentiles by linear interpolation at rank `p/100 * (n+1)`, clamped to the ends
    ///
    /// Non-finite percentiles are skipped.
    pub fn percentiles(&mut self, percentiles: &[f64]) {
        let mut set: Vec<f64> = self.values().into_iter().filter(|v| !v.is_nan()).collect();
        if set.is_empty() {
            return;
        }
        set.sort_by(f64::total_cmp);

        let count = set.len();
        for pct in percentiles.iter().filter(|p| p.is_finite()) {
            let label = format!("{}th", pct);
            let rank = (pct / 100.0) * (count + 1) as f64;
            let rank_int = rank as usize;
            let rank_frac = rank - rank_int as f64;

            let value = if rank <= 1.0 {
                set[0]
            } else if rank >= count as f64 {
                set[count - 1]
            } else {
                set[rank_int - 1] + rank_frac * (set[rank_int] - set[rank_int - 1])
            };

            self.summary.insert(label, value);
        }
    }
}

/// One series requested from a connector
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuerySeries {
    pub origin: String,
    pub source: String,
    pub metric: String,
}

/// A points request addressed to a connector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub sample: i64,
    pub series: Vec<QuerySeries>,
}
