//! Connector contract and registry
//!
//! A connector translates one upstream data source into a stream of
//! records and, optionally, answers points queries. Connector types are
//! looked up by name in a [`ConnectorRegistry`] when a provider's worker is
//! built.

pub mod static_source;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::attributes::Attributes;
use crate::catalog::Record;
use crate::error::{ConnectorError, ConnectorResult};
use crate::series::{Query, Series};

pub use static_source::StaticConnector;

/// Trait implemented by every upstream connector
#[async_trait]
pub trait Connector: Send + Sync {
    /// Name of the provider this connector was built for
    fn name(&self) -> &str;

    /// Stream every known record into `output`.
    ///
    /// Called once per refresh. The sender feeds the provider's filter
    /// chain; it must not be kept past the end of the call.
    async fn refresh(&self, output: mpsc::Sender<Record>) -> ConnectorResult<()>;

    /// Fetch points for every series of `query`, in query order
    async fn points(&self, query: &Query) -> ConnectorResult<Vec<Series>> {
        let _ = query;
        Err(ConnectorError::Unsupported {
            name: self.name().to_string(),
            operation: "points".to_string(),
        })
    }
}

/// Builds a connector from a provider name and its settings
pub type ConnectorFactory = Arc<dyn Fn(&str, &Attributes) -> ConnectorResult<Arc<dyn Connector>> + Send + Sync>;

/// Connector types available to providers
#[derive(Clone)]
pub struct ConnectorRegistry {
    factories: HashMap<String, ConnectorFactory>,
}

impl ConnectorRegistry {
    /// Registry without any connector type
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in connector types
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(static_source::CONNECTOR_TYPE, |name, settings| {
            Ok(Arc::new(StaticConnector::new(name, settings)?) as Arc<dyn Connector>)
        });
        registry
    }

    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&str, &Attributes) -> ConnectorResult<Arc<dyn Connector>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.to_string(), Arc::new(factory));
    }

    pub fn create(&self, kind: &str, provider: &str, settings: &Attributes) -> ConnectorResult<Arc<dyn Connector>> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| ConnectorError::UnsupportedConnector { kind: kind.to_string() })?;
        factory(provider, settings)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered connector type names, sorted
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorRegistry").field("types", &self.types()).finish()
    }
}
