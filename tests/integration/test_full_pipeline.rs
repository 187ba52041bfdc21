//! Full pipeline integration test
//! Tests the complete flow: connector → filter chain → catalog → searcher → plot

use anyhow::Result;

use sightline_catalog::{
    catalog::Record,
    library::{collection, plot, PlotRequest},
    series::Operator,
    storage::{Collection, CollectionEntry, GraphSeries, Storage},
};

use crate::utils::fixtures::{at, graph, rewriting_provider, series_group};
use crate::utils::{wait_until, TestService};

async fn pipeline_harness() -> Result<TestService> {
    let harness = TestService::new()?;
    harness.add_provider(rewriting_provider("p1"))?;

    let connector = harness.connectors.connector("p1");
    connector
        .set_records(vec![
            Record::new("collectd", "host1", "load"),
            Record::new("collectd", "host2", "load"),
            Record::new("collectd", "host1", "tmp.scratch"),
        ])
        .await;
    connector
        .set_points("collectd", "host1", "load", vec![(at(0), 1.0), (at(30), 3.0), (at(60), 5.0), (at(90), 7.0)])
        .await;
    connector
        .set_points("collectd", "host2", "load", vec![(at(0), 10.0), (at(60), 20.0)])
        .await;

    harness.start().await?;
    assert!(wait_until(|| harness.searcher().metrics("", "", "load").len() == 2).await);
    Ok(harness)
}

fn request() -> PlotRequest {
    PlotRequest::new(at(0), at(120)).with_sample(2)
}

#[tokio::test]
async fn test_filtered_records_reach_the_searcher() -> Result<()> {
    crate::test_setup!();
    let harness = pipeline_harness().await?;
    let searcher = harness.searcher();

    let sources: Vec<String> = searcher
        .sources("collectd", "")
        .iter()
        .map(|source| source.name().to_string())
        .collect();
    assert_eq!(sources, vec!["server1", "server2"]);
    assert!(searcher.metrics("", "", "tmp.scratch").is_empty());

    let metric = &searcher.metrics("collectd", "server1", "load")[0];
    assert_eq!(metric.upstream().source, "host1");

    let metrics = harness.service.metrics().clone();
    assert!(wait_until(|| metrics.get_stats().filter_messages >= 1).await);
    assert_eq!(metrics.get_stats().records_inserted, 2);

    harness.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_plot_queries_upstream_names() -> Result<()> {
    crate::test_setup!();
    let harness = pipeline_harness().await?;

    let graph = harness.storage.save_graph(graph(
        "total-load",
        vec![series_group(
            "total",
            Operator::Sum,
            vec![GraphSeries::new("load", "collectd", "glob:server*", "load")],
        )],
    ))?;

    let response = harness.service.plot(&graph.item.id, None, &request()).await?;
    assert_eq!(response.series.len(), 1);
    assert_eq!(response.series[0].name, "total");
    assert_eq!(response.series[0].series.values(), vec![12.0, 26.0]);

    // One batched query per catalog, addressed with upstream names
    let queries = harness.connectors.connector("p1").queries().await;
    assert_eq!(queries.len(), 1);
    let sources: Vec<&str> = queries[0].series.iter().map(|s| s.source.as_str()).collect();
    assert_eq!(sources, vec!["host1", "host2"]);
    assert_eq!(queries[0].sample, 2);

    harness.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_plot_collection_of_templates() -> Result<()> {
    crate::test_setup!();
    let harness = pipeline_harness().await?;

    let mut template = graph(
        "host-load",
        vec![series_group(
            "load",
            Operator::None,
            vec![GraphSeries::new("{{ .host }}", "collectd", "{{ .host }}", "load")],
        )],
    );
    template.template = true;
    template.options.set("title", "Load on {{ .host }}");
    let template = harness.storage.save_graph(template)?;

    let mut hosts = Collection::new("hosts");
    for host in ["server1", "server2", "server9"] {
        hosts.entries.push(CollectionEntry {
            graph_id: template.item.id.clone(),
            attributes: [("host", host)].into_iter().collect(),
            ..Default::default()
        });
    }
    let hosts = harness.storage.save_collection(hosts)?;

    let storage = harness.storage.as_ref() as &dyn Storage;
    let expanded = collection::expand(&hosts, None, storage)?;
    let titles: Vec<String> = expanded
        .entries
        .iter()
        .map(|entry| entry.options.get_string("title", "").unwrap())
        .collect();
    assert_eq!(titles, vec!["Load on server1", "Load on server2", "Load on server9"]);

    let mut plotted = Vec::new();
    for graph in collection::graphs(&expanded, storage)? {
        plotted.push(plot::evaluate(&graph, harness.searcher(), &request()).await?);
    }

    assert_eq!(plotted[0].series[0].series.values(), vec![2.0, 6.0]);
    assert_eq!(plotted[1].series[0].series.values(), vec![10.0, 20.0]);
    // Unknown hosts plot as unknown values rather than failing
    assert_eq!(plotted[2].series[0].series.len(), 2);
    assert!(plotted[2].series[0].series.values().iter().all(|v| v.is_nan()));

    harness.stop().await?;
    Ok(())
}
