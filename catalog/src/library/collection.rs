use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::attributes::Attributes;
use crate::error::{ResolutionError, Result, StorageError};
use crate::library::{expand_options, graph};
use crate::storage::{Collection, Graph, Storage};

/// Fetch the template `collection` links to, `None` when it is not linked
pub fn resolve(collection: &Collection, storage: &dyn Storage) -> Result<Option<Collection>> {
    let link = match collection.link_id.as_deref().filter(|id| !id.is_empty()) {
        Some(link) => link,
        None => return Ok(None),
    };

    match storage.collection(link) {
        Ok(template) => Ok(Some(template)),
        Err(StorageError::ItemNotFound { .. }) => Err(ResolutionError::UnresolvableItem {
            id: collection.item.id.clone(),
            link_id: link.to_string(),
        }
        .into()),
        Err(e) => Err(e.into()),
    }
}

/// Produce a standalone copy of `collection` with every placeholder substituted
///
/// A linked collection takes the entries of its template and keeps its own
/// identity and parent. Entry options are expanded with the collection
/// attributes overridden by the entry's own; each entry also picks up the
/// expanded title of its graph when the graph exists.
pub fn expand(collection: &Collection, attrs: Option<&Attributes>, storage: &dyn Storage) -> Result<Collection> {
    let mut expanded = collection.clone();
    if let Some(attrs) = attrs {
        expanded.attributes.merge(attrs, true);
    }

    if let Some(mut instance) = resolve(collection, storage)? {
        instance.item = expanded.item.clone();
        instance.link_id = expanded.link_id.clone();
        instance.alias = expanded.alias.clone();
        instance.parent_id = expanded.parent_id.clone();
        instance.attributes.merge(&expanded.attributes, true);
        instance.options.merge(&expanded.options, true);
        expanded = instance;
    }

    expanded.template = false;
    let attrs = expanded.attributes.clone();
    expand_options(&mut expanded.options, &attrs)?;

    for entry in &mut expanded.entries {
        let mut entry_attrs = attrs.clone();
        entry_attrs.merge(&entry.attributes, true);
        expand_options(&mut entry.options, &entry_attrs)?;

        match storage.graph(&entry.graph_id) {
            Ok(graph) => {
                let graph = graph::expand(&graph, Some(&entry_attrs), storage)?;
                if let Some(title) = graph.options.get("title") {
                    entry.options.set("title", title.clone());
                }
            }
            Err(e) => debug!(graph = %entry.graph_id, error = %e, "collection entry graph unavailable"),
        }
    }

    Ok(expanded)
}

/// Expanded graphs of every entry of an expanded collection, in entry order
pub fn graphs(collection: &Collection, storage: &dyn Storage) -> Result<Vec<Graph>> {
    collection
        .entries
        .iter()
        .map(|entry| {
            let mut attrs = collection.attributes.clone();
            attrs.merge(&entry.attributes, true);
            graph::expand(&storage.graph(&entry.graph_id)?, Some(&attrs), storage)
        })
        .collect()
}

/// Node of the collection tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionTreeEntry {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub children: Vec<CollectionTreeEntry>,
}

/// Assemble the forest of non-template collections
///
/// With `root` unset the forest starts at collections without a parent;
/// a `parent_id` pointing at nothing (or at a template) also makes a root.
/// With `root` set only the children of that collection are returned.
/// Siblings are ordered by label, then id.
pub fn tree(storage: &dyn Storage, root: Option<&str>) -> Result<Vec<CollectionTreeEntry>> {
    let collections: Vec<Collection> = storage.collections()?.into_iter().filter(|c| !c.template).collect();
    let known: HashSet<&str> = collections.iter().map(|c| c.item.id.as_str()).collect();

    let mut labels: HashMap<String, String> = HashMap::new();
    let mut children: BTreeMap<Option<String>, Vec<String>> = BTreeMap::new();

    for collection in &collections {
        let id = collection.item.id.clone();
        let parent = collection
            .parent_id
            .clone()
            .filter(|p| p != &id && known.contains(p.as_str()));

        labels.insert(id.clone(), label(collection, storage));
        children.entry(parent).or_default().push(id);
    }

    let start = root.map(str::to_string);
    let mut visited = HashSet::new();
    Ok(build_level(&start, &children, &labels, &mut visited))
}

fn label(collection: &Collection, storage: &dyn Storage) -> String {
    let expanded = match expand(collection, None, storage) {
        Ok(expanded) => expanded,
        Err(e) => {
            debug!(collection = %collection.item.id, error = %e, "unable to expand collection");
            collection.clone()
        }
    };

    match expanded.options.get_string("title", "") {
        Ok(title) if !title.is_empty() => title,
        _ => expanded.item.name,
    }
}

fn build_level(
    parent: &Option<String>,
    children: &BTreeMap<Option<String>, Vec<String>>,
    labels: &HashMap<String, String>,
    visited: &mut HashSet<String>,
) -> Vec<CollectionTreeEntry> {
    let mut level: Vec<CollectionTreeEntry> = children
        .get(parent)
        .map(|ids| ids.as_slice())
        .unwrap_or_default()
        .iter()
        .filter(|id| visited.insert((*id).clone()))
        .map(|id| CollectionTreeEntry {
            id: id.clone(),
            label: labels.get(id).cloned().unwrap_or_default(),
            parent: parent.clone(),
            children: Vec::new(),
        })
        .collect();

    for entry in &mut level {
        entry.children = build_level(&Some(entry.id.clone()), children, labels, visited);
    }

    level.sort_by(|a, b| a.label.cmp(&b.label).then_with(|| a.id.cmp(&b.id)));
    level
}
