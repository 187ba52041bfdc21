use serde::{Deserialize, Serialize};

use crate::attributes::Attributes;
use crate::error::{ValidationError, ValidationResult};
use crate::storage::item::{Item, ItemBase};

/// One filter rule as configured on a provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    /// `discard`, `rewrite` or `sieve`
    pub action: String,

    /// `origin`, `source`, `metric` or `any` (the default when empty)
    #[serde(default)]
    pub target: String,

    /// Regular expression matched against the target field
    pub pattern: String,

    /// Replacement, only meaningful for `rewrite`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub into: String,
}

impl FilterRule {
    pub fn rewrite(target: &str, pattern: &str, into: &str) -> Self {
        Self {
            action: "rewrite".to_string(),
            target: target.to_string(),
            pattern: pattern.to_string(),
            into: into.to_string(),
        }
    }

    pub fn discard(target: &str, pattern: &str) -> Self {
        Self {
            action: "discard".to_string(),
            target: target.to_string(),
            pattern: pattern.to_string(),
            into: String::new(),
        }
    }

    pub fn sieve(target: &str, pattern: &str) -> Self {
        Self {
            action: "sieve".to_string(),
            target: target.to_string(),
            pattern: pattern.to_string(),
            into: String::new(),
        }
    }
}

/// Persisted provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    #[serde(flatten)]
    pub item: ItemBase,

    /// Connector type name, resolved through the connector registry
    pub connector: String,

    /// Connector-specific settings
    #[serde(default)]
    pub settings: Attributes,

    #[serde(default)]
    pub filters: Vec<FilterRule>,

    /// Seconds between periodic refreshes, 0 disables them
    #[serde(default)]
    pub refresh_interval: i64,

    /// Catalog priority, higher ranks first
    #[serde(default)]
    pub priority: i64,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Provider {
    pub fn new(name: impl Into<String>, connector: impl Into<String>) -> Self {
        Self {
            item: ItemBase::new(name),
            connector: connector.into(),
            settings: Attributes::new(),
            filters: Vec::new(),
            refresh_interval: 0,
            priority: 0,
            enabled: true,
        }
    }

    /// Whether switching from `self` to `other` needs the worker to be restarted
    pub fn requires_restart(&self, other: &Provider) -> bool {
        self.enabled != other.enabled
            || self.connector != other.connector
            || self.settings != other.settings
            || self.filters != other.filters
            || self.refresh_interval != other.refresh_interval
            || self.priority != other.priority
    }
}

impl Item for Provider {
    const KIND: &'static str = "provider";

    fn base(&self) -> &ItemBase {
        &self.item
    }

    fn base_mut(&mut self) -> &mut ItemBase {
        &mut self.item
    }

    fn validate(&self) -> ValidationResult<()> {
        if self.connector.is_empty() {
            return Err(ValidationError::MissingField {
                field: "connector".to_string(),
            });
        }
        if self.refresh_interval < 0 {
            return Err(ValidationError::InvalidInterval {
                value: self.refresh_interval,
            });
        }
        if self.priority < 0 {
            return Err(ValidationError::InvalidPriority { value: self.priority });
        }
        Ok(())
    }
}
