//! Builders for the items and records shared across tests

use chrono::{DateTime, TimeZone, Utc};

use sightline_catalog::{
    catalog::Record,
    series::Operator,
    storage::{FilterRule, Graph, GraphSeries, Provider, SeriesGroup},
};

use crate::mocks::MOCK_CONNECTOR;

/// Unix `seconds` as a UTC instant
pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).unwrap()
}

/// One `collectd` record per (source, metric) pair
pub fn records(sources: &[&str], metrics: &[&str]) -> Vec<Record> {
    sources
        .iter()
        .flat_map(|source| metrics.iter().map(move |metric| Record::new("collectd", *source, *metric)))
        .collect()
}

/// Provider backed by the mock connector
pub fn mock_provider(name: &str, priority: i64) -> Provider {
    let mut provider = Provider::new(name, MOCK_CONNECTOR);
    provider.priority = priority;
    provider
}

/// Mock provider rewriting `hostN` sources into `serverN`
pub fn rewriting_provider(name: &str) -> Provider {
    let mut provider = mock_provider(name, 0);
    provider.filters = vec![
        FilterRule::rewrite("source", r"^host(\d+)$", "server$1"),
        FilterRule::discard("metric", r"^tmp\."),
    ];
    provider
}

pub fn series_group(name: &str, operator: Operator, series: Vec<GraphSeries>) -> SeriesGroup {
    SeriesGroup {
        name: name.to_string(),
        operator,
        series,
        ..Default::default()
    }
}

pub fn graph(name: &str, groups: Vec<SeriesGroup>) -> Graph {
    let mut graph = Graph::new(name);
    graph.groups = groups;
    graph
}
