//! Three-level metric catalog (origin, source, metric)
//!
//! A [`Catalog`] is a cheap, cloneable handle over one provider's index. All
//! levels live behind a single reader-writer lock: `insert` and
//! `set_priority` take it for writing, every lookup and traversal for
//! reading. Lookups hand out [`Origin`], [`Source`] and [`Metric`] snapshot
//! handles that keep a reference to their catalog, so walking back up the
//! tree is O(1) and always lands on the owning catalog.

pub mod filter;
pub mod record;
pub mod searcher;
pub mod state;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::attributes::Attributes;
use crate::connector::Connector;
use crate::error::{CatalogError, CatalogResult};
use crate::series::QuerySeries;

pub use filter::{FilterChain, RuleSet};
pub use record::Record;
pub use searcher::Searcher;

#[derive(Default)]
struct CatalogState {
    priority: i64,
    origins: HashMap<String, OriginNode>,
}

#[derive(Default)]
struct OriginNode {
    sources: HashMap<String, SourceNode>,
}

#[derive(Default)]
struct SourceNode {
    metrics: HashMap<String, MetricNode>,
}

#[derive(Clone, Debug)]
struct MetricNode {
    attributes: Arc<Attributes>,
    upstream: Arc<QuerySeries>,
}

struct CatalogInner {
    name: String,
    connector: Option<Arc<dyn Connector>>,
    state: RwLock<CatalogState>,
}

/// One provider's worth of indexed records plus its priority
#[derive(Clone)]
pub struct Catalog {
    inner: Arc<CatalogInner>,
}

impl Catalog {
    pub fn new(name: impl Into<String>, connector: Option<Arc<dyn Connector>>) -> Self {
        Self {
            inner: Arc::new(CatalogInner {
                name: name.into(),
                connector,
                state: RwLock::new(CatalogState::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn connector(&self) -> Option<Arc<dyn Connector>> {
        self.inner.connector.clone()
    }

    pub fn priority(&self) -> i64 {
        self.inner.state.read().priority
    }

    pub fn set_priority(&self, priority: i64) {
        self.inner.state.write().priority = priority;
    }

    /// Identity comparison; two handles are equal when they share the same index
    pub fn ptr_eq(&self, other: &Catalog) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Insert a record, creating missing levels on the way down.
    ///
    /// Returns `true` when a new metric was created. Re-inserting an existing
    /// triple is a no-op and keeps the attributes of the first insertion.
    pub fn insert(&self, record: &Record) -> CatalogResult<bool> {
        for (field, value) in [
            ("origin", &record.origin),
            ("source", &record.source),
            ("metric", &record.metric),
        ] {
            if value.is_empty() {
                return Err(CatalogError::InvalidRecord {
                    reason: format!("empty {} name", field),
                });
            }
        }

        let mut state = self.inner.state.write();
        let metrics = &mut state
            .origins
            .entry(record.origin.clone())
            .or_default()
            .sources
            .entry(record.source.clone())
            .or_default()
            .metrics;

        if metrics.contains_key(&record.metric) {
            return Ok(false);
        }

        let upstream = QuerySeries {
            origin: or_current(&record.original_origin, &record.origin),
            source: or_current(&record.original_source, &record.source),
            metric: or_current(&record.original_metric, &record.metric),
        };

        metrics.insert(
            record.metric.clone(),
            MetricNode {
                attributes: Arc::new(record.attributes.clone().unwrap_or_default()),
                upstream: Arc::new(upstream),
            },
        );
        Ok(true)
    }

    pub fn origin(&self, origin: &str) -> CatalogResult<Origin> {
        let state = self.inner.state.read();
        if !state.origins.contains_key(origin) {
            return Err(CatalogError::UnknownOrigin { name: origin.to_string() });
        }

        Ok(Origin {
            catalog: self.clone(),
            name: origin.to_string(),
        })
    }

    pub fn source(&self, origin: &str, source: &str) -> CatalogResult<Source> {
        let state = self.inner.state.read();
        let origin_node = state
            .origins
            .get(origin)
            .ok_or_else(|| CatalogError::UnknownOrigin { name: origin.to_string() })?;
        if !origin_node.sources.contains_key(source) {
            return Err(CatalogError::UnknownSource { name: source.to_string() });
        }

        Ok(Source {
            catalog: self.clone(),
            origin: origin.to_string(),
            name: source.to_string(),
        })
    }

    pub fn metric(&self, origin: &str, source: &str, metric: &str) -> CatalogResult<Metric> {
        let state = self.inner.state.read();
        let node = state
            .origins
            .get(origin)
            .ok_or_else(|| CatalogError::UnknownOrigin { name: origin.to_string() })?
            .sources
            .get(source)
            .ok_or_else(|| CatalogError::UnknownSource { name: source.to_string() })?
            .metrics
            .get(metric)
            .ok_or_else(|| CatalogError::UnknownMetric { name: metric.to_string() })?;

        Ok(Metric {
            catalog: self.clone(),
            origin: origin.to_string(),
            source: source.to_string(),
            name: metric.to_string(),
            node: node.clone(),
        })
    }

    /// All origins, sorted by name
    pub fn origins(&self) -> Vec<Origin> {
        let state = self.inner.state.read();
        let mut names: Vec<&String> = state.origins.keys().collect();
        names.sort();

        names
            .into_iter()
            .map(|name| Origin {
                catalog: self.clone(),
                name: name.clone(),
            })
            .collect()
    }

    /// Number of metrics in the catalog
    pub fn len(&self) -> usize {
        let state = self.inner.state.read();
        state
            .origins
            .values()
            .flat_map(|origin| origin.sources.values())
            .map(|source| source.metrics.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.read().origins.is_empty()
    }

    /// Snapshot of every record, sorted by (origin, source, metric)
    pub fn records(&self) -> Vec<Record> {
        let state = self.inner.state.read();
        let mut records: Vec<Record> = state
            .origins
            .iter()
            .flat_map(|(origin, origin_node)| {
                origin_node.sources.iter().flat_map(move |(source, source_node)| {
                    source_node.metrics.iter().map(move |(metric, node)| {
                        let mut record = Record::new(origin.as_str(), source.as_str(), metric.as_str());
                        if !node.attributes.is_empty() {
                            record.attributes = Some(node.attributes.as_ref().clone());
                        }
                        if node.upstream.origin != *origin {
                            record.original_origin = node.upstream.origin.clone();
                        }
                        if node.upstream.source != *source {
                            record.original_source = node.upstream.source.clone();
                        }
                        if node.upstream.metric != *metric {
                            record.original_metric = node.upstream.metric.clone();
                        }
                        record
                    })
                })
            })
            .collect();

        records.sort_by(|a, b| {
            (&a.origin, &a.source, &a.metric).cmp(&(&b.origin, &b.source, &b.metric))
        });
        records
    }
}

fn or_current(original: &str, current: &str) -> String {
    if original.is_empty() {
        current.to_string()
    } else {
        original.to_string()
    }
}

impl PartialEq for Catalog {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("name", &self.inner.name)
            .field("priority", &self.priority())
            .finish()
    }
}

/// Top-level partition of a catalog
#[derive(Clone, Debug)]
pub struct Origin {
    catalog: Catalog,
    name: String,
}

impl Origin {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Sources under this origin, sorted by name
    pub fn sources(&self) -> Vec<Source> {
        let state = self.catalog.inner.state.read();
        let mut names: Vec<&String> = state
            .origins
            .get(&self.name)
            .map(|node| node.sources.keys().collect())
            .unwrap_or_default();
        names.sort();

        names
            .into_iter()
            .map(|name| Source {
                catalog: self.catalog.clone(),
                origin: self.name.clone(),
                name: name.clone(),
            })
            .collect()
    }
}

/// Mid-level partition, typically a host
#[derive(Clone, Debug)]
pub struct Source {
    catalog: Catalog,
    origin: String,
    name: String,
}

impl Source {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin_name(&self) -> &str {
        &self.origin
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn origin(&self) -> Origin {
        Origin {
            catalog: self.catalog.clone(),
            name: self.origin.clone(),
        }
    }

    /// Metrics under this source, sorted by name
    pub fn metrics(&self) -> Vec<Metric> {
        let state = self.catalog.inner.state.read();
        let mut metrics: Vec<(&String, &MetricNode)> = state
            .origins
            .get(&self.origin)
            .and_then(|node| node.sources.get(&self.name))
            .map(|node| node.metrics.iter().collect())
            .unwrap_or_default();
        metrics.sort_by(|a, b| a.0.cmp(b.0));

        metrics
            .into_iter()
            .map(|(name, node)| Metric {
                catalog: self.catalog.clone(),
                origin: self.origin.clone(),
                source: self.name.clone(),
                name: name.clone(),
                node: node.clone(),
            })
            .collect()
    }
}

/// Leaf node: one named measurement of a source
#[derive(Clone, Debug)]
pub struct Metric {
    catalog: Catalog,
    origin: String,
    source: String,
    name: String,
    node: MetricNode,
}

impl Metric {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_name(&self) -> &str {
        &self.source
    }

    pub fn origin_name(&self) -> &str {
        &self.origin
    }

    pub fn attributes(&self) -> &Attributes {
        &self.node.attributes
    }

    /// Names as the connector knows them, before any filter rewrite
    pub fn upstream(&self) -> &QuerySeries {
        &self.node.upstream
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn connector(&self) -> Option<Arc<dyn Connector>> {
        self.catalog.connector()
    }

    pub fn source(&self) -> Source {
        Source {
            catalog: self.catalog.clone(),
            origin: self.origin.clone(),
            name: self.source.clone(),
        }
    }

    pub fn origin(&self) -> Origin {
        Origin {
            catalog: self.catalog.clone(),
            name: self.origin.clone(),
        }
    }
}
