//! Persisted items and the storage contract
//!
//! The catalog core only needs to read providers, graphs and collections.
//! [`MemoryStorage`] is the built-in backend; it also carries the write
//! path so items can be seeded and validated without a database.

pub mod collection;
pub mod graph;
pub mod item;
pub mod memory;
pub mod provider;
pub mod validation;

use crate::error::StorageResult;

pub use collection::{Collection, CollectionEntry};
pub use graph::{Graph, GraphSeries, SeriesGroup};
pub use item::{Item, ItemBase};
pub use memory::{open, MemoryStorage, Seed};
pub use provider::{FilterRule, Provider};
pub use validation::ItemValidator;

/// Selection applied when listing providers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderFilter {
    /// Only keep providers whose `enabled` flag matches
    pub enabled: Option<bool>,
}

impl ProviderFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn enabled() -> Self {
        Self { enabled: Some(true) }
    }

    pub fn matches(&self, provider: &Provider) -> bool {
        self.enabled.map_or(true, |enabled| provider.enabled == enabled)
    }
}

/// Read access to persisted items
pub trait Storage: Send + Sync {
    /// Providers matching `filter`, sorted by name
    fn list_providers(&self, filter: ProviderFilter) -> StorageResult<Vec<Provider>>;

    fn provider(&self, id: &str) -> StorageResult<Provider>;

    fn graph(&self, id: &str) -> StorageResult<Graph>;

    /// All graphs, sorted by name
    fn graphs(&self) -> StorageResult<Vec<Graph>>;

    fn collection(&self, id: &str) -> StorageResult<Collection>;

    /// All collections, sorted by name
    fn collections(&self) -> StorageResult<Vec<Collection>>;
}
