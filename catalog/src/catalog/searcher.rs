//! Cross-catalog query surface
//!
//! The searcher joins every registered catalog into one priority-ordered
//! view. Results are ordered by name first; entries sharing a name are
//! ranked by descending catalog priority, and any remaining tie is broken
//! by parent names, catalog name and finally registration order so that
//! every ordering is total.

use std::cmp::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::catalog::{Catalog, Metric, Origin, Source};
use crate::error::Result;
use crate::pattern::Pattern;

/// Registry of live catalogs
#[derive(Clone, Default)]
pub struct Searcher {
    catalogs: Arc<RwLock<Vec<Catalog>>>,
}

/// Sort key snapshot taken once per catalog, outside the comparator
struct Ranked<T> {
    item: T,
    priority: i64,
    rank: usize,
}

impl Searcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, catalog: Catalog) {
        self.catalogs.write().push(catalog);
    }

    /// Remove `catalog` by identity; no-op when absent
    pub fn unregister(&self, catalog: &Catalog) {
        let mut catalogs = self.catalogs.write();
        if let Some(idx) = catalogs.iter().position(|c| c.ptr_eq(catalog)) {
            catalogs.remove(idx);
        }
    }

    /// Reorder the registry by descending priority, keeping registration order on ties
    pub fn apply_priorities(&self) {
        let mut catalogs = self.catalogs.write();
        let mut keyed: Vec<(i64, Catalog)> = catalogs.drain(..).map(|c| (c.priority(), c)).collect();
        keyed.sort_by(|a, b| b.0.cmp(&a.0));
        catalogs.extend(keyed.into_iter().map(|(_, c)| c));
    }

    /// Snapshot of the registered catalogs
    pub fn catalogs(&self) -> Vec<Catalog> {
        self.catalogs.read().clone()
    }

    pub fn len(&self) -> usize {
        self.catalogs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalogs.read().is_empty()
    }

    /// Origins named `name` (all when empty), sorted by (name, priority desc)
    pub fn origins(&self, name: &str) -> Vec<Origin> {
        let mut ranked = self.ranked_origins(|origin| name.is_empty() || origin == name);
        ranked.sort_by(|a, b| {
            a.item
                .name()
                .cmp(b.item.name())
                .then_with(|| by_priority(a, b))
                .then_with(|| a.item.catalog().name().cmp(b.item.catalog().name()))
                .then_with(|| a.rank.cmp(&b.rank))
        });
        ranked.into_iter().map(|r| r.item).collect()
    }

    /// Sources sorted by (source name, origin name, priority desc)
    pub fn sources(&self, origin: &str, name: &str) -> Vec<Source> {
        let mut ranked = self.ranked_sources(
            |o| origin.is_empty() || o == origin,
            |s| name.is_empty() || s == name,
        );
        ranked.sort_by(compare_sources);
        ranked.into_iter().map(|r| r.item).collect()
    }

    /// Metrics sorted by (metric name, priority desc)
    pub fn metrics(&self, origin: &str, source: &str, name: &str) -> Vec<Metric> {
        let mut ranked = self.ranked_metrics(
            |o| origin.is_empty() || o == origin,
            |s| source.is_empty() || s == source,
            |m| name.is_empty() || m == name,
        );
        ranked.sort_by(compare_metrics);
        ranked.into_iter().map(|r| r.item).collect()
    }

    /// Like [`Searcher::metrics`], with `glob:`/`regexp:` patterns at every level
    ///
    /// Empty patterns match everything. Pattern compile errors are returned.
    pub fn find_metrics(&self, origin: &str, source: &str, name: &str) -> Result<Vec<Metric>> {
        let compile = |p: &str| -> Result<Option<Pattern>> {
            if p.is_empty() {
                Ok(None)
            } else {
                Pattern::new(p).map(Some)
            }
        };
        let (origin, source, name) = (compile(origin)?, compile(source)?, compile(name)?);
        let matches = |pattern: &Option<Pattern>, value: &str| pattern.as_ref().map_or(true, |p| p.matches(value));

        let mut ranked = self.ranked_metrics(
            |o| matches(&origin, o),
            |s| matches(&source, s),
            |m| matches(&name, m),
        );
        ranked.sort_by(compare_metrics);
        Ok(ranked.into_iter().map(|r| r.item).collect())
    }

    fn ranked_origins(&self, keep: impl Fn(&str) -> bool) -> Vec<Ranked<Origin>> {
        let catalogs = self.catalogs.read();
        let mut result = Vec::new();

        for (rank, catalog) in catalogs.iter().enumerate() {
            let priority = catalog.priority();
            for origin in catalog.origins() {
                if keep(origin.name()) {
                    result.push(Ranked { item: origin, priority, rank });
                }
            }
        }

        result
    }

    fn ranked_sources(&self, keep_origin: impl Fn(&str) -> bool, keep: impl Fn(&str) -> bool) -> Vec<Ranked<Source>> {
        self.ranked_origins(keep_origin)
            .into_iter()
            .flat_map(|r| {
                let Ranked { item, priority, rank } = r;
                item.sources()
                    .into_iter()
                    .map(move |source| Ranked { item: source, priority, rank })
            })
            .filter(|r| keep(r.item.name()))
            .collect()
    }

    fn ranked_metrics(
        &self,
        keep_origin: impl Fn(&str) -> bool,
        keep_source: impl Fn(&str) -> bool,
        keep: impl Fn(&str) -> bool,
    ) -> Vec<Ranked<Metric>> {
        self.ranked_sources(keep_origin, keep_source)
            .into_iter()
            .flat_map(|r| {
                let Ranked { item, priority, rank } = r;
                item.metrics()
                    .into_iter()
                    .map(move |metric| Ranked { item: metric, priority, rank })
            })
            .filter(|r| keep(r.item.name()))
            .collect()
    }
}

fn by_priority<T>(a: &Ranked<T>, b: &Ranked<T>) -> Ordering {
    b.priority.cmp(&a.priority)
}

fn compare_sources(a: &Ranked<Source>, b: &Ranked<Source>) -> Ordering {
    a.item
        .name()
        .cmp(b.item.name())
        .then_with(|| a.item.origin_name().cmp(b.item.origin_name()))
        .then_with(|| by_priority(a, b))
        .then_with(|| a.item.catalog().name().cmp(b.item.catalog().name()))
        .then_with(|| a.rank.cmp(&b.rank))
}

fn compare_metrics(a: &Ranked<Metric>, b: &Ranked<Metric>) -> Ordering {
    a.item
        .name()
        .cmp(b.item.name())
        .then_with(|| by_priority(a, b))
        .then_with(|| a.item.source_name().cmp(b.item.source_name()))
        .then_with(|| a.item.origin_name().cmp(b.item.origin_name()))
        .then_with(|| a.item.catalog().name().cmp(b.item.catalog().name()))
        .then_with(|| a.rank.cmp(&b.rank))
}
