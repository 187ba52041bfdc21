//! Service harness wiring a catalog service to mock connectors

use std::sync::Arc;

use anyhow::Result;
use tempfile::TempDir;

use sightline_catalog::{
    catalog::Searcher,
    config::SightlineConfig,
    service::CatalogService,
    storage::{MemoryStorage, Provider, Storage},
};

use crate::mocks::MockConnectorFactory;
use crate::{DEFAULT_POLL_INTERVAL, DEFAULT_TEST_TIMEOUT};

/// Poll `condition` until it holds or the default test timeout elapses
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + DEFAULT_TEST_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
    }
    condition()
}

/// Catalog service over in-memory storage, mock connectors and a temp cache
pub struct TestService {
    pub service: CatalogService,
    pub storage: Arc<MemoryStorage>,
    pub connectors: MockConnectorFactory,
    pub temp_dir: TempDir,
}

impl TestService {
    pub fn new() -> Result<Self> {
        Self::with_config(|_| {})
    }

    /// Build the service after `customize` adjusted the default test configuration
    pub fn with_config<F: FnOnce(&mut SightlineConfig)>(customize: F) -> Result<Self> {
        Self::with_storage(Arc::new(MemoryStorage::new()?), TempDir::new()?, MockConnectorFactory::new(), customize)
    }

    /// Build a second service sharing this one's storage, cache and connectors
    pub fn restart(&self) -> Result<CatalogService> {
        let service = CatalogService::with_parts(
            self.service.config().clone(),
            self.storage.clone() as Arc<dyn Storage>,
            self.connectors.registry(),
        )?;
        Ok(service)
    }

    fn with_storage<F: FnOnce(&mut SightlineConfig)>(
        storage: Arc<MemoryStorage>,
        temp_dir: TempDir,
        connectors: MockConnectorFactory,
        customize: F,
    ) -> Result<Self> {
        let mut config = SightlineConfig::default();
        config.cache.path = Some(temp_dir.path().join("cache"));
        config.server.graceful_timeout = 5;
        customize(&mut config);
        config.validate()?;

        let service = CatalogService::with_parts(
            config,
            storage.clone() as Arc<dyn Storage>,
            connectors.registry(),
        )?;

        Ok(Self {
            service,
            storage,
            connectors,
            temp_dir,
        })
    }

    pub fn add_provider(&self, provider: Provider) -> Result<Provider> {
        Ok(self.storage.save_provider(provider)?)
    }

    pub fn searcher(&self) -> &Searcher {
        self.service.searcher()
    }

    pub async fn start(&self) -> Result<()> {
        crate::init_test_environment();
        self.service.start().await?;
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.service.stop().await?;
        Ok(())
    }
}
