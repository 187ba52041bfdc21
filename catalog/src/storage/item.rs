use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationResult;

/// Fields shared by every persisted item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemBase {
    /// UUID; generated on first save when empty
    #[serde(default)]
    pub id: String,

    /// Unique per item kind
    pub name: String,

    /// Stored as `None` when empty
    #[serde(default)]
    pub description: Option<String>,

    /// Set once, on first save
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    /// Refreshed on every save
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

impl ItemBase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// A persisted item kind
pub trait Item: Clone + Send + Sync {
    /// Human readable kind, used in storage errors
    const KIND: &'static str;

    fn base(&self) -> &ItemBase;

    fn base_mut(&mut self) -> &mut ItemBase;

    fn id(&self) -> &str {
        &self.base().id
    }

    fn name(&self) -> &str {
        &self.base().name
    }

    /// Optional alias, validated with the same grammar as names
    fn alias(&self) -> Option<&str> {
        None
    }

    /// Collapse empty optional fields to `None`
    fn normalize(&mut self) {}

    /// Kind-specific checks run after the common ones
    fn validate(&self) -> ValidationResult<()> {
        Ok(())
    }
}

/// Turn `Some("")` into `None`
pub(crate) fn clear_empty(value: &mut Option<String>) {
    if value.as_deref() == Some("") {
        *value = None;
    }
}
