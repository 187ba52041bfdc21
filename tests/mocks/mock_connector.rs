use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};

use sightline_catalog::{
    attributes::Attributes,
    catalog::Record,
    connector::{Connector, ConnectorRegistry},
    error::{ConnectorError, ConnectorResult},
    series::{Point, Query, QuerySeries, Series},
};

/// Connector type name the mock factory registers under
pub const MOCK_CONNECTOR: &str = "mock";

/// Scriptable connector shared between a test and the worker using it
#[derive(Clone)]
pub struct MockConnector {
    name: String,
    records: Arc<RwLock<Vec<Record>>>,
    points: Arc<RwLock<HashMap<QuerySeries, Vec<Point>>>>,
    queries: Arc<RwLock<Vec<Query>>>,
    refreshes: Arc<AtomicUsize>,
    fail_refresh: Arc<AtomicBool>,
    delay: Arc<Mutex<Duration>>,
}

impl MockConnector {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            records: Arc::new(RwLock::new(Vec::new())),
            points: Arc::new(RwLock::new(HashMap::new())),
            queries: Arc::new(RwLock::new(Vec::new())),
            refreshes: Arc::new(AtomicUsize::new(0)),
            fail_refresh: Arc::new(AtomicBool::new(false)),
            delay: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub async fn set_records(&self, records: Vec<Record>) {
        *self.records.write().await = records;
    }

    /// Serve `points` for the upstream series `origin/source/metric`
    pub async fn set_points(&self, origin: &str, source: &str, metric: &str, points: Vec<(DateTime<Utc>, f64)>) {
        let key = QuerySeries {
            origin: origin.to_string(),
            source: source.to_string(),
            metric: metric.to_string(),
        };
        let points = points.into_iter().map(|(time, value)| Point::new(time, value)).collect();
        self.points.write().await.insert(key, points);
    }

    pub fn set_fail_refresh(&self, fail: bool) {
        self.fail_refresh.store(fail, Ordering::SeqCst);
    }

    /// Delay applied before every refresh streams its records
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Every points query received so far
    pub async fn queries(&self) -> Vec<Query> {
        self.queries.read().await.clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn refresh(&self, output: mpsc::Sender<Record>) -> ConnectorResult<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(ConnectorError::RefreshFailed {
                reason: "mock upstream unavailable".to_string(),
            });
        }

        let records = self.records.read().await.clone();
        for record in records {
            output.send(record).await.map_err(|_| ConnectorError::RefreshFailed {
                reason: "record stream closed".to_string(),
            })?;
        }
        Ok(())
    }

    async fn points(&self, query: &Query) -> ConnectorResult<Vec<Series>> {
        self.queries.write().await.push(query.clone());

        let points = self.points.read().await;
        Ok(query
            .series
            .iter()
            .map(|wanted| match points.get(wanted) {
                Some(found) => Series::new(
                    found
                        .iter()
                        .filter(|p| p.time >= query.start_time && p.time <= query.end_time)
                        .copied()
                        .collect(),
                ),
                None => Series::default(),
            })
            .collect())
    }
}

/// Hands out one shared [`MockConnector`] per provider name
#[derive(Clone, Default)]
pub struct MockConnectorFactory {
    connectors: Arc<Mutex<HashMap<String, MockConnector>>>,
}

impl MockConnectorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector used by the provider named `name`, created on first use
    pub fn connector(&self, name: &str) -> MockConnector {
        self.connectors
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert_with(|| MockConnector::new(name))
            .clone()
    }

    /// Registry with the built-in connectors plus the mock type
    pub fn registry(&self) -> ConnectorRegistry {
        let mut registry = ConnectorRegistry::new();
        let factory = self.clone();
        registry.register(MOCK_CONNECTOR, move |name: &str, _settings: &Attributes| {
            Ok(Arc::new(factory.connector(name)) as Arc<dyn Connector>)
        });
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_mock_refresh_streams_records() {
        let connector = MockConnector::new("p1");
        connector
            .set_records(vec![Record::new("collectd", "host1", "load")])
            .await;

        let (tx, mut rx) = mpsc::channel(4);
        connector.refresh(tx).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().metric, "load");
        assert!(rx.recv().await.is_none());
        assert_eq!(connector.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_failure() {
        let connector = MockConnector::new("p1");
        connector.set_fail_refresh(true);

        let (tx, _rx) = mpsc::channel(4);
        assert!(connector.refresh(tx).await.is_err());
    }

    #[tokio::test]
    async fn test_factory_shares_connectors() {
        let factory = MockConnectorFactory::new();
        let registry = factory.registry();
        assert!(registry.contains(MOCK_CONNECTOR));
        assert!(registry.contains("static"));

        let at = |s| Utc.timestamp_opt(s, 0).unwrap();
        factory
            .connector("p1")
            .set_points("collectd", "host1", "load", vec![(at(0), 1.0), (at(500), 2.0)])
            .await;

        let created = registry.create(MOCK_CONNECTOR, "p1", &Attributes::new()).unwrap();
        let query = Query {
            start_time: at(0),
            end_time: at(100),
            sample: 10,
            series: vec![QuerySeries {
                origin: "collectd".to_string(),
                source: "host1".to_string(),
                metric: "load".to_string(),
            }],
        };

        let series = created.points(&query).await.unwrap();
        assert_eq!(series[0].values(), vec![1.0]);
        assert_eq!(factory.connector("p1").queries().await.len(), 1);
    }
}
