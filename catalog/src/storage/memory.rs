//! In-memory storage backend

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::BackendConfig;
use crate::error::{Result, SightlineError, StorageError, StorageResult, ValidationError};
use crate::storage::{Collection, Graph, Item, ItemValidator, Provider, ProviderFilter, Storage};

/// Name of the built-in storage driver
pub const MEMORY_DRIVER: &str = "memory";

/// Items loaded from a seed file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub providers: Vec<Provider>,
    #[serde(default)]
    pub graphs: Vec<Graph>,
    #[serde(default)]
    pub collections: Vec<Collection>,
}

#[derive(Default)]
struct MemoryState {
    providers: HashMap<String, Provider>,
    graphs: HashMap<String, Graph>,
    collections: HashMap<String, Collection>,
}

/// Storage keeping every item in process memory
pub struct MemoryStorage {
    validator: ItemValidator,
    state: RwLock<MemoryState>,
}

/// Open the storage selected by `config`, loading its seed file if any
pub fn open(config: &BackendConfig) -> Result<MemoryStorage> {
    if config.driver != MEMORY_DRIVER {
        return Err(StorageError::UnsupportedDriver {
            driver: config.driver.clone(),
        }
        .into());
    }

    let storage = MemoryStorage::new()?;
    if let Some(path) = &config.path {
        let count = storage.load_seed(path)?;
        info!(path = %path.display(), items = count, "loaded storage seed");
    }
    Ok(storage)
}

impl MemoryStorage {
    pub fn new() -> Result<Self> {
        Ok(Self {
            validator: ItemValidator::new()?,
            state: RwLock::new(MemoryState::default()),
        })
    }

    pub fn save_provider(&self, mut provider: Provider) -> Result<Provider> {
        let mut state = self.state.write();
        keep_created(&state.providers, &mut provider);
        self.validator.prepare_for_persist(&mut provider)?;
        check_conflicts(&state.providers, &provider)?;

        state.providers.insert(provider.item.id.clone(), provider.clone());
        debug!(id = %provider.item.id, name = %provider.item.name, "saved provider");
        Ok(provider)
    }

    pub fn save_graph(&self, mut graph: Graph) -> Result<Graph> {
        let mut state = self.state.write();
        keep_created(&state.graphs, &mut graph);
        self.validator.prepare_for_persist(&mut graph)?;
        check_conflicts(&state.graphs, &graph)?;

        if let Some(link) = &graph.link_id {
            if !state.graphs.contains_key(link) {
                return Err(unknown_reference(Graph::KIND, link));
            }
        }

        state.graphs.insert(graph.item.id.clone(), graph.clone());
        debug!(id = %graph.item.id, name = %graph.item.name, "saved graph");
        Ok(graph)
    }

    pub fn save_collection(&self, mut collection: Collection) -> Result<Collection> {
        let mut state = self.state.write();
        keep_created(&state.collections, &mut collection);
        self.validator.prepare_for_persist(&mut collection)?;
        check_conflicts(&state.collections, &collection)?;

        if let Some(link) = &collection.link_id {
            if !state.collections.contains_key(link) {
                return Err(unknown_reference(Collection::KIND, link));
            }
        }
        if let Some(entry) = collection.entries.iter().find(|e| !state.graphs.contains_key(&e.graph_id)) {
            return Err(unknown_reference(Graph::KIND, &entry.graph_id));
        }
        if let Some(parent) = &collection.parent_id {
            if !state.collections.contains_key(parent) {
                return Err(unknown_reference(Collection::KIND, parent));
            }
            check_parent_cycle(&state.collections, &collection.item.id, parent)?;
        }

        state.collections.insert(collection.item.id.clone(), collection.clone());
        debug!(id = %collection.item.id, name = %collection.item.name, "saved collection");
        Ok(collection)
    }

    pub fn delete_provider(&self, id: &str) -> StorageResult<Provider> {
        self.state
            .write()
            .providers
            .remove(id)
            .ok_or_else(|| not_found(Provider::KIND, id))
    }

    /// Delete a graph, along with graphs linked to it and the collection entries using them
    pub fn delete_graph(&self, id: &str) -> StorageResult<Graph> {
        let mut state = self.state.write();
        let graph = state.graphs.remove(id).ok_or_else(|| not_found(Graph::KIND, id))?;

        let mut removed: HashSet<String> = HashSet::from([id.to_string()]);
        loop {
            let linked: Vec<String> = state
                .graphs
                .values()
                .filter(|g| g.link_id.as_ref().map_or(false, |link| removed.contains(link)))
                .map(|g| g.item.id.clone())
                .collect();
            if linked.is_empty() {
                break;
            }
            for linked_id in linked {
                state.graphs.remove(&linked_id);
                removed.insert(linked_id);
            }
        }

        for collection in state.collections.values_mut() {
            collection.entries.retain(|entry| !removed.contains(&entry.graph_id));
        }

        Ok(graph)
    }

    /// Delete a collection; linked collections go with it, children become roots
    pub fn delete_collection(&self, id: &str) -> StorageResult<Collection> {
        let mut state = self.state.write();
        let collection = state
            .collections
            .remove(id)
            .ok_or_else(|| not_found(Collection::KIND, id))?;

        let mut removed: HashSet<String> = HashSet::from([id.to_string()]);
        loop {
            let linked: Vec<String> = state
                .collections
                .values()
                .filter(|c| c.link_id.as_ref().map_or(false, |link| removed.contains(link)))
                .map(|c| c.item.id.clone())
                .collect();
            if linked.is_empty() {
                break;
            }
            for linked_id in linked {
                state.collections.remove(&linked_id);
                removed.insert(linked_id);
            }
        }

        for child in state.collections.values_mut() {
            if child.parent_id.as_ref().map_or(false, |parent| removed.contains(parent)) {
                child.parent_id = None;
            }
        }

        Ok(collection)
    }

    /// Save every item of `seed`; returns the number of items stored
    ///
    /// Items referencing other items of the same kind are retried until
    /// their target exists, so the seed order does not matter.
    pub fn apply_seed(&self, seed: Seed) -> Result<usize> {
        let mut count = 0;
        for provider in seed.providers {
            self.save_provider(provider)?;
            count += 1;
        }
        count += save_in_dependency_order(seed.graphs, |g| self.save_graph(g))?;
        count += save_in_dependency_order(seed.collections, |c| self.save_collection(c))?;
        Ok(count)
    }

    /// Load a seed file, JSON when its extension is `.json` and TOML otherwise
    pub fn load_seed(&self, path: &Path) -> Result<usize> {
        let failed = |reason: String| StorageError::SeedLoadFailed {
            path: path.display().to_string(),
            reason,
        };

        let content = fs::read_to_string(path).map_err(|e| failed(e.to_string()))?;
        let seed: Seed = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content).map_err(|e| failed(e.to_string()))?,
            _ => toml::from_str(&content).map_err(|e| failed(e.to_string()))?,
        };

        self.apply_seed(seed)
    }
}

impl Storage for MemoryStorage {
    fn list_providers(&self, filter: ProviderFilter) -> StorageResult<Vec<Provider>> {
        let state = self.state.read();
        let mut providers: Vec<Provider> = state.providers.values().filter(|p| filter.matches(p)).cloned().collect();
        providers.sort_by(|a, b| a.item.name.cmp(&b.item.name));
        Ok(providers)
    }

    fn provider(&self, id: &str) -> StorageResult<Provider> {
        self.state
            .read()
            .providers
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(Provider::KIND, id))
    }

    fn graph(&self, id: &str) -> StorageResult<Graph> {
        self.state
            .read()
            .graphs
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(Graph::KIND, id))
    }

    fn graphs(&self) -> StorageResult<Vec<Graph>> {
        Ok(sorted(self.state.read().graphs.values().cloned().collect()))
    }

    fn collection(&self, id: &str) -> StorageResult<Collection> {
        self.state
            .read()
            .collections
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(Collection::KIND, id))
    }

    fn collections(&self) -> StorageResult<Vec<Collection>> {
        Ok(sorted(self.state.read().collections.values().cloned().collect()))
    }
}

fn sorted<T: Item>(mut items: Vec<T>) -> Vec<T> {
    items.sort_by(|a, b| a.name().cmp(b.name()));
    items
}

fn not_found(kind: &str, id: &str) -> StorageError {
    StorageError::ItemNotFound {
        kind: kind.to_string(),
        id: id.to_string(),
    }
}

fn unknown_reference(kind: &str, id: &str) -> SightlineError {
    StorageError::UnknownReference {
        kind: kind.to_string(),
        id: id.to_string(),
    }
    .into()
}

/// An update without a creation time keeps the stored one
fn keep_created<T: Item>(existing: &HashMap<String, T>, item: &mut T) {
    if item.base().created.is_some() {
        return;
    }
    if let Some(stored) = existing.get(item.id()) {
        item.base_mut().created = stored.base().created;
    }
}

fn check_conflicts<T: Item>(existing: &HashMap<String, T>, item: &T) -> StorageResult<()> {
    for other in existing.values().filter(|other| other.id() != item.id()) {
        if other.name() == item.name() {
            return Err(StorageError::ItemConflict {
                kind: T::KIND.to_string(),
                name: item.name().to_string(),
            });
        }
        if let (Some(alias), Some(other_alias)) = (item.alias(), other.alias()) {
            if alias == other_alias {
                return Err(StorageError::ItemConflict {
                    kind: T::KIND.to_string(),
                    name: alias.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn check_parent_cycle(collections: &HashMap<String, Collection>, id: &str, parent: &str) -> Result<()> {
    let mut visited = HashSet::new();
    let mut current = Some(parent.to_string());

    while let Some(cursor) = current {
        if cursor == id || !visited.insert(cursor.clone()) {
            return Err(ValidationError::InvalidParent { id: parent.to_string() }.into());
        }
        current = collections.get(&cursor).and_then(|c| c.parent_id.clone());
    }
    Ok(())
}

fn save_in_dependency_order<T: Clone>(items: Vec<T>, save: impl Fn(T) -> Result<T>) -> Result<usize> {
    let mut pending = items;
    let mut count = 0;

    while !pending.is_empty() {
        let mut deferred = Vec::new();
        let mut last_error = None;
        let before = count;

        for item in pending {
            match save(item.clone()) {
                Ok(_) => count += 1,
                Err(SightlineError::Storage(e @ StorageError::UnknownReference { .. })) => {
                    deferred.push(item);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        // A pass that saved nothing cannot make progress
        if count == before {
            if let Some(error) = last_error {
                return Err(error.into());
            }
        }
        pending = deferred;
    }

    Ok(count)
}
