use serde::{Deserialize, Serialize};

use crate::attributes::Attributes;
use crate::error::{ValidationError, ValidationResult};
use crate::storage::item::{clear_empty, Item, ItemBase};

/// Persisted collection of graphs, arranged in a tree through `parent_id`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    #[serde(flatten)]
    pub item: ItemBase,

    #[serde(default)]
    pub entries: Vec<CollectionEntry>,

    #[serde(default, rename = "link", skip_serializing_if = "Option::is_none")]
    pub link_id: Option<String>,

    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub options: Attributes,

    #[serde(default, rename = "parent", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    #[serde(default)]
    pub template: bool,
}

/// A graph placed in a collection, with per-entry attributes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionEntry {
    #[serde(rename = "graph")]
    pub graph_id: String,

    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,

    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub options: Attributes,
}

impl Collection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            item: ItemBase::new(name),
            ..Default::default()
        }
    }

    pub fn is_linked(&self) -> bool {
        self.link_id.as_deref().map_or(false, |id| !id.is_empty())
    }

    pub fn has_parent(&self) -> bool {
        self.parent_id.as_deref().map_or(false, |id| !id.is_empty())
    }
}

impl Item for Collection {
    const KIND: &'static str = "collection";

    fn base(&self) -> &ItemBase {
        &self.item
    }

    fn base_mut(&mut self) -> &mut ItemBase {
        &mut self.item
    }

    fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    fn normalize(&mut self) {
        clear_empty(&mut self.link_id);
        clear_empty(&mut self.alias);
        clear_empty(&mut self.parent_id);
    }

    fn validate(&self) -> ValidationResult<()> {
        match self.parent_id.as_deref() {
            Some(parent) if !self.item.id.is_empty() && parent == self.item.id => {
                Err(ValidationError::InvalidParent { id: parent.to_string() })
            }
            _ => Ok(()),
        }
    }
}
