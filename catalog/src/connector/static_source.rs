//! Connector serving records and points declared in its settings
//!
//! Settings:
//!
//! ```toml
//! [[settings.records]]
//! origin = "collectd"
//! source = "host1"
//! metric = "cpu.user"
//!
//! [[settings.series]]
//! origin = "collectd"
//! source = "host1"
//! metric = "cpu.user"
//! points = [[1700000000, 12.5], [1700000060, 13.0]]
//! ```

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::attributes::Attributes;
use crate::catalog::Record;
use crate::connector::Connector;
use crate::error::{ConnectorError, ConnectorResult};
use crate::series::{Point, Query, QuerySeries, Series};

pub const CONNECTOR_TYPE: &str = "static";

#[derive(Debug, Clone, Deserialize)]
struct StaticSeries {
    origin: String,
    source: String,
    metric: String,
    /// `[unix seconds, value]` pairs; a null value is unknown
    #[serde(default)]
    points: Vec<(i64, Option<f64>)>,
}

impl StaticSeries {
    fn matches(&self, query: &QuerySeries) -> bool {
        self.origin == query.origin && self.source == query.source && self.metric == query.metric
    }
}

/// Connector backed by the `records` and `series` settings
#[derive(Debug, Clone)]
pub struct StaticConnector {
    name: String,
    records: Vec<Record>,
    series: Vec<StaticSeries>,
}

impl StaticConnector {
    pub fn new(name: &str, settings: &Attributes) -> ConnectorResult<Self> {
        let records = decode_setting(settings, "records")?;
        let series = decode_setting(settings, "series")?;

        Ok(Self {
            name: name.to_string(),
            records,
            series,
        })
    }

    pub fn from_records(name: &str, records: Vec<Record>) -> Self {
        Self {
            name: name.to_string(),
            records,
            series: Vec::new(),
        }
    }
}

fn decode_setting<T: serde::de::DeserializeOwned>(settings: &Attributes, key: &str) -> ConnectorResult<Vec<T>> {
    match settings.get(key) {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| ConnectorError::InvalidSettings {
            reason: format!("{}: {}", key, e),
        }),
    }
}

fn timestamp(seconds: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0).single()
}

#[async_trait]
impl Connector for StaticConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn refresh(&self, output: mpsc::Sender<Record>) -> ConnectorResult<()> {
        for record in &self.records {
            output.send(record.clone()).await.map_err(|_| ConnectorError::RefreshFailed {
                reason: "record stream closed".to_string(),
            })?;
        }
        Ok(())
    }

    async fn points(&self, query: &Query) -> ConnectorResult<Vec<Series>> {
        let result = query
            .series
            .iter()
            .map(|wanted| match self.series.iter().find(|s| s.matches(wanted)) {
                Some(found) => Series::new(
                    found
                        .points
                        .iter()
                        .filter_map(|(t, v)| timestamp(*t).map(|time| Point::new(time, v.unwrap_or(f64::NAN))))
                        .filter(|p| p.time >= query.start_time && p.time <= query.end_time)
                        .collect(),
                ),
                None => Series::default(),
            })
            .collect();

        Ok(result)
    }
}
