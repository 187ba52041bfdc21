use std::fmt;

use serde::{Deserialize, Serialize};

use crate::attributes::Attributes;
use crate::series::{Consolidation, Operator};
use crate::storage::item::{clear_empty, Item, ItemBase};

/// Persisted graph definition, possibly a template or a link to one
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    #[serde(flatten)]
    pub item: ItemBase,

    #[serde(default)]
    pub groups: Vec<SeriesGroup>,

    /// Template this graph instantiates
    #[serde(default, rename = "link", skip_serializing_if = "Option::is_none")]
    pub link_id: Option<String>,

    /// Values substituted into template placeholders
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub options: Attributes,

    #[serde(default)]
    pub template: bool,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            item: ItemBase::new(name),
            ..Default::default()
        }
    }

    pub fn is_linked(&self) -> bool {
        self.link_id.as_deref().map_or(false, |id| !id.is_empty())
    }
}

impl Item for Graph {
    const KIND: &'static str = "graph";

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
    }
}

/// Series sharing a consolidation and an operator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesGroup {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub operator: Operator,

    #[serde(default)]
    pub consolidate: Consolidation,

    #[serde(default)]
    pub series: Vec<GraphSeries>,

    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub options: Attributes,
}

/// One series reference; each field may be a pattern or a template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSeries {
    #[serde(default)]
    pub name: String,
    pub origin: String,
    pub source: String,
    pub metric: String,

    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub options: Attributes,
}

impl GraphSeries {
    pub fn new(name: &str, origin: &str, source: &str, metric: &str) -> Self {
        Self {
            name: name.to_string(),
            origin: origin.to_string(),
            source: source.to_string(),
            metric: metric.to_string(),
            options: Attributes::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.origin.is_empty() && !self.source.is_empty() && !self.metric.is_empty()
    }
}

impl fmt::Display for GraphSeries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{name: {:?}, origin: {:?}, source: {:?}, metric: {:?}}}",
            self.name, self.origin, self.source, self.metric
        )
    }
}
