use serde::{Deserialize, Serialize};

use crate::attributes::Attributes;

/// A metric record as emitted by a connector
///
/// The `original_*` fields hold the names as they were before filtering.
/// The filter chain fills all three; [`Catalog::records`] only keeps the
/// ones a rewrite changed, so dumps stay compact.
///
/// [`Catalog::records`]: crate::catalog::Catalog::records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub origin: String,
    pub source: String,
    pub metric: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub original_origin: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub original_source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub original_metric: String,
}

impl Record {
    pub fn new(origin: impl Into<String>, source: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            source: source.into(),
            metric: metric.into(),
            ..Default::default()
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// Remember the current names as the pre-rewrite ones
    pub fn preserve_originals(&mut self) {
        self.original_origin = self.origin.clone();
        self.original_source = self.source.clone();
        self.original_metric = self.metric.clone();
    }
}

impl std::fmt::Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.origin, self.source, self.metric)
    }
}
