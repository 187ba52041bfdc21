//! Graph plotting
//!
//! Evaluating a graph turns each of its series definitions into catalog
//! metrics, fetches their points from the owning connectors (one query per
//! catalog), then normalizes, combines and summarizes every group.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::attributes::Attributes;
use crate::catalog::{Catalog, Metric, Searcher};
use crate::error::{ConnectorError, Result, ValidationError, ValidationResult};
use crate::library::graph;
use crate::pattern;
use crate::series::{normalize, Operator, Query, QuerySeries, Series};
use crate::storage::{Graph, Storage};
use crate::timerange;

/// Number of points per series when the request does not say otherwise
pub const DEFAULT_SAMPLE: i64 = 400;

/// Time window and shape of a plot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotRequest {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub sample: i64,
    /// Overrides the graph's `percentiles` option when non-empty
    #[serde(default)]
    pub percentiles: Vec<f64>,
}

impl PlotRequest {
    pub fn new(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            end_time,
            sample: DEFAULT_SAMPLE,
            percentiles: Vec::new(),
        }
    }

    /// Window spanning `range` from `time`; a negative range ends at `time`
    pub fn from_range(time: DateTime<Utc>, range: &str) -> ValidationResult<Self> {
        let shifted = timerange::apply(time, range)?;
        if range.trim_start().starts_with('-') {
            Ok(Self::new(shifted, time))
        } else {
            Ok(Self::new(time, shifted))
        }
    }

    pub fn with_sample(mut self, sample: i64) -> Self {
        self.sample = sample;
        self
    }

    pub fn with_percentiles(mut self, percentiles: Vec<f64>) -> Self {
        self.percentiles = percentiles;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotSeries {
    pub name: String,
    #[serde(flatten)]
    pub series: Series,
    #[serde(skip_serializing_if = "Attributes::is_empty")]
    pub options: Attributes,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotResponse {
    pub id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub series: Vec<PlotSeries>,
    pub options: Attributes,
}

/// A graph series bound to the metric it resolved to
struct Resolved {
    group: usize,
    name: String,
    options: Attributes,
    metric: Option<Metric>,
}

/// Points requested from one catalog's connector
struct Batch {
    catalog: Catalog,
    slots: Vec<usize>,
    series: Vec<QuerySeries>,
}

/// Plot an expanded graph
///
/// Series whose metric is unknown, or whose connector fails, come back as
/// series of unknown values. Pattern, normalization and option type errors
/// are returned.
pub async fn evaluate(graph: &Graph, searcher: &Searcher, request: &PlotRequest) -> Result<PlotResponse> {
    let percentiles = if request.percentiles.is_empty() {
        option_percentiles(&graph.options)?
    } else {
        request.percentiles.clone()
    };

    let resolved = resolve_series(graph, searcher)?;
    let mut raw = fetch(&resolved, request).await;

    for (entry, series) in resolved.iter().zip(raw.iter_mut()) {
        let factor = entry.options.get_float("scale", 0.0)?;
        if factor != 0.0 {
            series.scale(factor);
        }
    }

    let mut plotted = Vec::new();

    for (idx, group) in graph.groups.iter().enumerate() {
        let (entries, series): (Vec<&Resolved>, Vec<Series>) = resolved
            .iter()
            .zip(raw.iter())
            .filter(|(entry, _)| entry.group == idx)
            .map(|(entry, series)| (entry, series.clone()))
            .unzip();

        if series.is_empty() {
            debug!(graph = %graph.item.name, group = %group.name, "skipping group without series");
            continue;
        }

        let normalized = normalize(&series, request.start_time, request.end_time, request.sample, group.consolidate)?;

        let mut output: Vec<PlotSeries> = match group.operator {
            Operator::None => entries
                .iter()
                .zip(normalized)
                .map(|(entry, series)| PlotSeries {
                    name: entry.name.clone(),
                    series,
                    options: entry.options.clone(),
                })
                .collect(),
            operator => operator
                .apply(normalized)?
                .into_iter()
                .map(|series| PlotSeries {
                    name: group.name.clone(),
                    series,
                    options: group.options.clone(),
                })
                .collect(),
        };

        let factor = group.options.get_float("scale", 0.0)?;
        for plot in &mut output {
            if factor != 0.0 {
                plot.series.scale(factor);
            }
            plot.series.summarize(&percentiles);
        }

        plotted.extend(output);
    }

    let mut options = graph.options.clone();
    if !options.has("title") {
        options.set("title", graph.item.name.clone());
    }

    Ok(PlotResponse {
        id: graph.item.id.clone(),
        start: request.start_time,
        end: request.end_time,
        series: plotted,
        options,
    })
}

/// Expand the stored graph `id` with `attrs`, then plot it
///
/// A template graph cannot be plotted without attributes to fill it.
pub async fn evaluate_item(
    storage: &dyn Storage,
    searcher: &Searcher,
    id: &str,
    attrs: Option<&Attributes>,
    request: &PlotRequest,
) -> Result<PlotResponse> {
    let stored = storage.graph(id)?;
    if stored.template && attrs.map_or(true, Attributes::is_empty) {
        return Err(ValidationError::MissingField {
            field: "attributes".to_string(),
        }
        .into());
    }

    let expanded = graph::expand(&stored, attrs, storage)?;
    evaluate(&expanded, searcher, request).await
}

fn option_percentiles(options: &Attributes) -> ValidationResult<Vec<f64>> {
    let invalid = || ValidationError::InvalidType {
        key: "percentiles".to_string(),
        expected: "list of numbers".to_string(),
    };

    match options.get("percentiles") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(values)) => values.iter().map(|v| v.as_f64().ok_or_else(invalid)).collect(),
        Some(_) => Err(invalid()),
    }
}

fn resolve_series(graph: &Graph, searcher: &Searcher) -> Result<Vec<Resolved>> {
    let mut resolved = Vec::new();

    for (idx, group) in graph.groups.iter().enumerate() {
        for series in &group.series {
            let names = [&series.origin, &series.source, &series.metric];
            let metrics = if names.iter().all(|name| !name.is_empty() && !pattern::is_pattern(name)) {
                // Exact series resolve to the highest-priority provider only
                searcher
                    .metrics(&series.origin, &series.source, &series.metric)
                    .into_iter()
                    .take(1)
                    .collect()
            } else {
                searcher.find_metrics(&series.origin, &series.source, &series.metric)?
            };

            match metrics.len() {
                0 => {
                    warn!(graph = %graph.item.name, series = %series, "no metric found for series");
                    resolved.push(Resolved {
                        group: idx,
                        name: series.name.clone(),
                        options: series.options.clone(),
                        metric: None,
                    });
                }
                1 => resolved.push(Resolved {
                    group: idx,
                    name: series.name.clone(),
                    options: series.options.clone(),
                    metric: metrics.into_iter().next(),
                }),
                _ => resolved.extend(metrics.into_iter().map(|metric| Resolved {
                    group: idx,
                    name: format!("{} ({}/{})", series.name, metric.source_name(), metric.name()),
                    options: series.options.clone(),
                    metric: Some(metric),
                })),
            }
        }
    }

    Ok(resolved)
}

/// Fetch raw points for every resolved series, in input order
async fn fetch(resolved: &[Resolved], request: &PlotRequest) -> Vec<Series> {
    let mut batches: Vec<Batch> = Vec::new();

    for (slot, entry) in resolved.iter().enumerate() {
        let metric = match &entry.metric {
            Some(metric) => metric,
            None => continue,
        };

        let upstream = metric.upstream().clone();
        match batches.iter_mut().find(|b| b.catalog.ptr_eq(metric.catalog())) {
            Some(batch) => {
                batch.slots.push(slot);
                batch.series.push(upstream);
            }
            None => batches.push(Batch {
                catalog: metric.catalog().clone(),
                slots: vec![slot],
                series: vec![upstream],
            }),
        }
    }

    let queries = batches.into_iter().map(|batch| async move {
        let query = Query {
            start_time: request.start_time,
            end_time: request.end_time,
            sample: request.sample,
            series: batch.series,
        };

        let outcome = match batch.catalog.connector() {
            Some(connector) => connector.points(&query).await,
            None => Err(ConnectorError::Unsupported {
                name: batch.catalog.name().to_string(),
                operation: "points".to_string(),
            }),
        };

        (batch.catalog, batch.slots, outcome)
    });

    let mut result = vec![Series::default(); resolved.len()];

    for (catalog, slots, outcome) in join_all(queries).await {
        match outcome {
            Ok(series) if series.len() == slots.len() => {
                for (slot, series) in slots.into_iter().zip(series) {
                    result[slot] = series;
                }
            }
            Ok(series) => warn!(
                provider = %catalog.name(),
                expected = slots.len(),
                received = series.len(),
                "connector returned a mismatched number of series"
            ),
            Err(e) => warn!(provider = %catalog.name(), error = %e, "unable to fetch points"),
        }
    }

    result
}
