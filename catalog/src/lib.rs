//! Sightline metric catalog core
//!
//! This library indexes the metrics exposed by upstream time-series
//! providers, keeps those indexes fresh with one poller worker per
//! provider, and resolves stored graphs into normalized, consolidated
//! series ready for plotting.

pub mod attributes;
pub mod catalog;
pub mod config;
pub mod connector;
pub mod error;
pub mod library;
pub mod logging;
pub mod metrics;
pub mod pattern;
pub mod poller;
pub mod series;
pub mod service;
pub mod storage;
pub mod template;
pub mod timerange;

// Re-export commonly used types
pub use attributes::Attributes;
pub use catalog::{Catalog, FilterChain, Record, RuleSet, Searcher};
pub use config::SightlineConfig;
pub use connector::{Connector, ConnectorRegistry, StaticConnector};
pub use error::{Result, SightlineError};
pub use library::{PlotRequest, PlotResponse, PlotSeries};
pub use metrics::MetricsCollector;
pub use poller::{Poller, WorkerContext, WorkerHandle, WorkerState};
pub use series::{Consolidation, Operator, Point, Series};
pub use service::{CatalogService, ServiceStatus};
pub use storage::{Collection, Graph, MemoryStorage, Provider, Storage};
