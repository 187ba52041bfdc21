//! Validation applied to items before they are persisted

use chrono::{SubsecRound, Utc};
use regex::Regex;
use uuid::Uuid;

use crate::error::{Result, ValidationError, ValidationResult};
use crate::storage::item::{clear_empty, Item};

/// Grammar shared by item names and aliases
pub const NAME_PATTERN: &str = r"(?i)^[a-z0-9](?:[a-z0-9\-_\.]*[a-z0-9])?$";

/// Validator holding the pre-compiled item grammars
#[derive(Debug, Clone)]
pub struct ItemValidator {
    name_regex: Regex,
}

impl ItemValidator {
    pub fn new() -> Result<Self> {
        let name_regex = Regex::new(NAME_PATTERN)?;
        Ok(Self { name_regex })
    }

    pub fn validate_id(&self, id: &str) -> ValidationResult<()> {
        Uuid::parse_str(id)
            .map(|_| ())
            .map_err(|_| ValidationError::InvalidId { value: id.to_string() })
    }

    pub fn validate_name(&self, name: &str) -> ValidationResult<()> {
        if self.name_regex.is_match(name) {
            Ok(())
        } else {
            Err(ValidationError::InvalidName { value: name.to_string() })
        }
    }

    pub fn validate_alias(&self, alias: &str) -> ValidationResult<()> {
        if self.name_regex.is_match(alias) {
            Ok(())
        } else {
            Err(ValidationError::InvalidAlias { value: alias.to_string() })
        }
    }

    /// Normalize and validate `item` ahead of a save
    ///
    /// Generates a missing id, stamps `created` (once) and `modified` with
    /// the current time at second precision, and stores an empty
    /// description as `None`. Nothing is modified when validation fails.
    pub fn prepare_for_persist<T: Item>(&self, item: &mut T) -> ValidationResult<()> {
        let base = item.base();
        if !base.id.is_empty() {
            self.validate_id(&base.id)?;
        }
        self.validate_name(&base.name)?;

        if let Some(alias) = item.alias().filter(|a| !a.is_empty()) {
            self.validate_alias(alias)?;
        }
        item.validate()?;

        item.normalize();

        let now = Utc::now().round_subsecs(0);
        let base = item.base_mut();
        if base.id.is_empty() {
            base.id = Uuid::new_v4().to_string();
        }
        if base.created.is_none() {
            base.created = Some(now);
        }
        base.modified = Some(now);
        clear_empty(&mut base.description);

        Ok(())
    }
}
