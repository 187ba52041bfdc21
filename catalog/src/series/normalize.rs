//! Series alignment and cross-series operators

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SeriesError, SeriesResult, ValidationError};
use crate::series::{Point, Series};

/// How the points falling into one bucket are reduced to a single point
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consolidation {
    #[default]
    Average,
    First,
    Last,
    Max,
    Min,
    Sum,
}

impl FromStr for Consolidation {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "average" => Ok(Self::Average),
            "first" => Ok(Self::First),
            "last" => Ok(Self::Last),
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            "sum" => Ok(Self::Sum),
            other => Err(ValidationError::InvalidType {
                key: other.to_string(),
                expected: "consolidation".to_string(),
            }),
        }
    }
}

impl fmt::Display for Consolidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Average => "average",
            Self::First => "first",
            Self::Last => "last",
            Self::Max => "max",
            Self::Min => "min",
            Self::Sum => "sum",
        };
        f.write_str(name)
    }
}

/// Cross-series operator applied to a normalized group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    #[default]
    None,
    Average,
    Sum,
}

impl Operator {
    /// Apply the operator; `None` hands the input back unchanged
    pub fn apply(self, series: Vec<Series>) -> SeriesResult<Vec<Series>> {
        match self {
            Self::None => Ok(series),
            Self::Average => Ok(vec![average(&series)?]),
            Self::Sum => Ok(vec![sum(&series)?]),
        }
    }
}

/// Reduce the points of one bucket starting at `start`
pub(crate) fn consolidate(points: &[Point], start: DateTime<Utc>, consolidation: Consolidation) -> Point {
    let (first, last) = match (points.first(), points.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Point::unknown(start),
    };

    let known = || points.iter().filter(|p| !p.value.is_nan());

    match consolidation {
        Consolidation::Average => {
            let (total, count) = known().fold((0.0, 0usize), |(t, c), p| (t + p.value, c + 1));
            let value = if count > 0 { total / count as f64 } else { f64::NAN };
            let time = first.time + (last.time - first.time) / 2;
            Point::new(time, value)
        }
        Consolidation::Sum => {
            let (total, count) = known().fold((0.0, 0usize), |(t, c), p| (t + p.value, c + 1));
            let value = if count > 0 { total } else { f64::NAN };
            Point::new(last.time, value)
        }
        Consolidation::First => *first,
        Consolidation::Last => *last,
        Consolidation::Min => known()
            .fold(None, |acc: Option<&Point>, p| match acc {
                Some(best) if best.value <= p.value => Some(best),
                _ => Some(p),
            })
            .copied()
            .unwrap_or_else(|| Point::unknown(start)),
        Consolidation::Max => known()
            .fold(None, |acc: Option<&Point>, p| match acc {
                Some(best) if best.value >= p.value => Some(best),
                _ => Some(p),
            })
            .copied()
            .unwrap_or_else(|| Point::unknown(start)),
    }
}

/// Align every series onto `sample` buckets evenly covering `[start, end)`
///
/// Each output series has exactly `sample` points timed at bucket starts.
/// Points outside the window are dropped and empty buckets hold `NaN`.
pub fn normalize(
    series: &[Series],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    sample: i64,
    consolidation: Consolidation,
) -> Result<Vec<Series>> {
    if sample <= 0 {
        return Err(ValidationError::InvalidSample { value: sample }.into());
    }
    if series.is_empty() {
        return Err(SeriesError::EmptySeries.into());
    }

    let span = (end - start).num_nanoseconds().unwrap_or(0);
    let step = span / sample;
    if step <= 0 {
        return Err(ValidationError::InvalidRange {
            value: format!("{} - {}", start.to_rfc3339(), end.to_rfc3339()),
        }
        .into());
    }

    let buckets = sample as usize;
    let bucket_start = |idx: usize| start + Duration::nanoseconds(step * idx as i64);

    let result = series
        .iter()
        .map(|s| {
            let mut grouped: Vec<Vec<Point>> = vec![Vec::new(); buckets];

            for point in s.points.iter().flatten() {
                if point.time < start || point.time > end {
                    continue;
                }
                let offset = (point.time - start).num_nanoseconds().unwrap_or(i64::MAX);
                let idx = (offset / step) as usize;
                if idx < buckets {
                    grouped[idx].push(*point);
                }
            }

            let points = grouped
                .iter()
                .enumerate()
                .map(|(idx, bucket)| {
                    let time = bucket_start(idx);
                    Point::new(time, consolidate(bucket, time, consolidation).value)
                })
                .collect();

            Series::new(points)
        })
        .collect();

    Ok(result)
}

/// Point-wise mean of normalized series, ignoring unknown values
pub fn average(series: &[Series]) -> SeriesResult<Series> {
    combine(series, true)
}

/// Point-wise sum of normalized series, ignoring unknown values
pub fn sum(series: &[Series]) -> SeriesResult<Series> {
    combine(series, false)
}

fn combine(series: &[Series], average: bool) -> SeriesResult<Series> {
    if series.is_empty() {
        return Err(SeriesError::EmptySeries);
    }

    let present: Vec<&Vec<Point>> = series.iter().filter_map(|s| s.points.as_ref()).collect();
    let reference = match present.first() {
        Some(points) => *points,
        None => return Ok(Series::new(Vec::new())),
    };

    if present.iter().any(|points| points.len() != reference.len()) {
        return Err(SeriesError::UnnormalizedSeries);
    }

    let points = reference
        .iter()
        .enumerate()
        .map(|(idx, point)| {
            let (total, count) = present
                .iter()
                .map(|points| points[idx].value)
                .filter(|v| !v.is_nan())
                .fold((0.0, 0usize), |(t, c), v| (t + v, c + 1));

            let value = match (count, average) {
                (0, _) => f64::NAN,
                (n, true) => total / n as f64,
                (_, false) => total,
            };
            Point::new(point.time, value)
        })
        .collect();

    Ok(Series::new(points))
}
