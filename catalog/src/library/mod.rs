//! Graph and collection resolution, expansion and plotting

pub mod collection;
pub mod graph;
pub mod plot;

use serde_json::Value;

use crate::attributes::Attributes;
use crate::error::ValidationResult;
use crate::template;

pub use collection::CollectionTreeEntry;
pub use plot::{PlotRequest, PlotResponse, PlotSeries};

/// Expand placeholders in every string held by `value`, recursing into lists and maps
pub(crate) fn expand_value(value: &mut Value, attrs: &Attributes) -> ValidationResult<()> {
    match value {
        Value::String(text) => *text = template::expand(text, attrs)?,
        Value::Array(items) => {
            for item in items {
                expand_value(item, attrs)?;
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                expand_value(item, attrs)?;
            }
        }
        _ => {}
    }
    Ok(())
}

pub(crate) fn expand_options(options: &mut Attributes, attrs: &Attributes) -> ValidationResult<()> {
    for (_, value) in options.iter_mut() {
        expand_value(value, attrs)?;
    }
    Ok(())
}
