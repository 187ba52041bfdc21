use crate::attributes::Attributes;
use crate::error::{ResolutionError, Result, StorageError, ValidationResult};
use crate::library::expand_options;
use crate::storage::{Graph, Storage};
use crate::template;

/// Fetch the template `graph` links to, `None` when it is not linked
pub fn resolve(graph: &Graph, storage: &dyn Storage) -> Result<Option<Graph>> {
    let link = match graph.link_id.as_deref().filter(|id| !id.is_empty()) {
        Some(link) => link,
        None => return Ok(None),
    };

    match storage.graph(link) {
        Ok(template) => Ok(Some(template)),
        Err(StorageError::ItemNotFound { .. }) => Err(ResolutionError::UnresolvableItem {
            id: graph.item.id.clone(),
            link_id: link.to_string(),
        }
        .into()),
        Err(e) => Err(e.into()),
    }
}

/// Produce a standalone copy of `graph` with every placeholder substituted
///
/// `attrs` override the graph's own attributes. A linked graph takes the
/// groups and options of its template; its own identity, attributes and
/// options win over the template's. The result is never a template.
pub fn expand(graph: &Graph, attrs: Option<&Attributes>, storage: &dyn Storage) -> Result<Graph> {
    let mut expanded = graph.clone();
    if let Some(attrs) = attrs {
        expanded.attributes.merge(attrs, true);
    }

    if let Some(mut instance) = resolve(graph, storage)? {
        instance.item = expanded.item.clone();
        instance.link_id = expanded.link_id.clone();
        instance.alias = expanded.alias.clone();
        instance.attributes.merge(&expanded.attributes, true);
        instance.options.merge(&expanded.options, true);
        expanded = instance;
    }

    expanded.template = false;
    substitute(&mut expanded)?;
    Ok(expanded)
}

fn substitute(graph: &mut Graph) -> ValidationResult<()> {
    let attrs = graph.attributes.clone();
    expand_options(&mut graph.options, &attrs)?;

    for group in &mut graph.groups {
        expand_options(&mut group.options, &attrs)?;

        for series in &mut group.series {
            series.name = template::expand(&series.name, &attrs)?;
            series.origin = template::expand(&series.origin, &attrs)?;
            series.source = template::expand(&series.source, &attrs)?;
            series.metric = template::expand(&series.metric, &attrs)?;
            expand_options(&mut series.options, &attrs)?;
        }
    }

    Ok(())
}
