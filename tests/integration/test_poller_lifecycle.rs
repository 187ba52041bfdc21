//! Poller lifecycle tests: refreshes, failures, restarts and shutdown

use std::time::Duration;

use anyhow::Result;

use sightline_catalog::{
    catalog::state::state_path,
    catalog::Record,
    poller::{WorkerHandle, WorkerState},
    service::ServiceStatus,
};

use crate::utils::fixtures::{mock_provider, records};
use crate::utils::{wait_until, TestService};

/// Handle of the worker for `id` once its initial refresh has completed
async fn idle_worker(harness: &TestService, id: &str) -> WorkerHandle {
    let worker = harness.service.poller().worker(id).unwrap();
    let metrics = harness.service.metrics().clone();
    assert!(wait_until(|| metrics.get_stats().refreshes >= 1 && !worker.is_refreshing()).await);
    worker
}

#[tokio::test]
async fn test_manual_refresh_picks_up_new_records() -> Result<()> {
    crate::test_setup!();
    let harness = TestService::new()?;
    let provider = harness.add_provider(mock_provider("p1", 0))?;
    let connector = harness.connectors.connector("p1");
    connector.set_records(records(&["host1"], &["load"])).await;

    harness.start().await?;
    assert!(wait_until(|| harness.searcher().metrics("", "", "load").len() == 1).await);
    let worker = idle_worker(&harness, &provider.item.id).await;

    connector
        .set_records(vec![
            Record::new("collectd", "host1", "load"),
            Record::new("collectd", "host2", "load"),
        ])
        .await;
    assert!(worker.refresh());
    assert!(wait_until(|| harness.searcher().metrics("", "", "load").len() == 2).await);
    assert!(connector.refresh_count() >= 2);

    harness.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_failed_refresh_keeps_catalog() -> Result<()> {
    crate::test_setup!();
    let harness = TestService::new()?;
    let provider = harness.add_provider(mock_provider("p1", 0))?;
    let connector = harness.connectors.connector("p1");
    connector.set_records(records(&["host1", "host2"], &["load"])).await;

    harness.start().await?;
    assert!(wait_until(|| harness.searcher().metrics("", "", "load").len() == 2).await);

    let worker = idle_worker(&harness, &provider.item.id).await;
    connector.set_fail_refresh(true);
    assert!(harness.service.poller().refresh(&provider.item.id));

    let metrics = harness.service.metrics().clone();
    assert!(wait_until(|| metrics.get_stats().refresh_errors == 1).await);
    assert!(wait_until(|| worker.state() == WorkerState::Running).await);
    assert_eq!(harness.searcher().metrics("", "", "load").len(), 2);

    harness.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_refresh_timeout() -> Result<()> {
    crate::test_setup!();
    let harness = TestService::with_config(|config| config.poller.refresh_timeout = 1)?;
    harness.add_provider(mock_provider("slow", 0))?;
    let connector = harness.connectors.connector("slow");
    connector.set_records(records(&["host1"], &["load"])).await;
    connector.set_delay(Duration::from_secs(30));

    harness.start().await?;
    let metrics = harness.service.metrics().clone();
    assert!(wait_until(|| metrics.get_stats().refresh_errors == 1).await);
    assert!(harness.searcher().metrics("", "", "load").is_empty());

    harness.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_periodic_refresh() -> Result<()> {
    crate::test_setup!();
    let harness = TestService::new()?;
    let mut provider = mock_provider("p1", 0);
    provider.refresh_interval = 1;
    harness.add_provider(provider)?;
    let connector = harness.connectors.connector("p1");

    harness.start().await?;
    assert!(wait_until(|| connector.refresh_count() >= 3).await);

    harness.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_provider_priorities() -> Result<()> {
    crate::test_setup!();
    let harness = TestService::new()?;
    harness.add_provider(mock_provider("low", 1))?;
    harness.add_provider(mock_provider("high", 20))?;
    for name in ["low", "high"] {
        harness
            .connectors
            .connector(name)
            .set_records(records(&["host1"], &["load"]))
            .await;
    }

    harness.start().await?;
    assert!(wait_until(|| harness.searcher().metrics("", "", "load").len() == 2).await);

    let catalogs: Vec<String> = harness
        .searcher()
        .metrics("collectd", "host1", "load")
        .iter()
        .map(|metric| metric.catalog().name().to_string())
        .collect();
    assert_eq!(catalogs, vec!["high", "low"]);

    harness.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_update_provider_restarts_worker() -> Result<()> {
    crate::test_setup!();
    // Without a cache the new worker cannot restore the old, unfiltered catalog
    let harness = TestService::with_config(|config| config.cache.path = None)?;
    let provider = harness.add_provider(mock_provider("p1", 0))?;
    harness
        .connectors
        .connector("p1")
        .set_records(records(&["host1"], &["load", "tmp.scratch"]))
        .await;

    harness.start().await?;
    assert!(wait_until(|| harness.searcher().metrics("", "", "tmp.scratch").len() == 1).await);
    let before = harness.service.poller().worker(&provider.item.id).unwrap();

    let mut updated = provider.clone();
    updated.filters = vec![sightline_catalog::storage::FilterRule::discard("metric", r"^tmp\.")];
    let updated = harness.storage.save_provider(updated)?;
    harness.service.poller().update_provider(&updated);

    let poller = harness.service.poller();
    assert!(wait_until(|| {
        poller
            .worker(&provider.item.id)
            .map_or(false, |worker| !worker.catalog().ptr_eq(before.catalog()))
    })
    .await);
    assert!(wait_until(|| harness.searcher().metrics("", "", "load").len() == 1).await);
    assert!(harness.searcher().metrics("", "", "tmp.scratch").is_empty());

    harness.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_shutdown_dumps_and_restart_restores() -> Result<()> {
    crate::test_setup!();
    let harness = TestService::new()?;
    harness.add_provider(mock_provider("p1", 0))?;
    let connector = harness.connectors.connector("p1");
    connector.set_records(records(&["host1", "host2"], &["load"])).await;

    harness.start().await?;
    assert!(wait_until(|| harness.searcher().metrics("", "", "load").len() == 2).await);
    harness.stop().await?;

    let status = harness.service.get_status().await;
    assert_eq!(status.status, ServiceStatus::Stopped);
    assert!(harness.searcher().is_empty());
    assert!(state_path(&harness.temp_dir.path().join("cache"), "p1").exists());

    // Upstream now fails: the restarted service serves the dumped catalog
    connector.set_fail_refresh(true);
    let restarted = harness.restart()?;
    restarted.start().await?;
    assert!(wait_until(|| restarted.searcher().metrics("", "", "load").len() == 2).await);

    restarted.stop().await?;
    Ok(())
}
