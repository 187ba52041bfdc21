//! Process-wide manager of provider workers

pub mod worker;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::catalog::Searcher;
use crate::error::{Result, SightlineError};
use crate::storage::{Provider, ProviderFilter, Storage};

pub use worker::{Worker, WorkerContext, WorkerHandle, WorkerState};

#[derive(Default)]
struct PollerState {
    workers: HashMap<String, WorkerHandle>,
    errors: HashMap<String, Arc<SightlineError>>,
}

struct PollerInner {
    storage: Arc<dyn Storage>,
    context: WorkerContext,
    state: Mutex<PollerState>,
    tracker: TaskTracker,
    token: CancellationToken,
}

/// Starts, stops and refreshes one worker per enabled provider
#[derive(Clone)]
pub struct Poller {
    inner: Arc<PollerInner>,
}

impl Poller {
    pub fn new(storage: Arc<dyn Storage>, context: WorkerContext) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                storage,
                context,
                state: Mutex::new(PollerState::default()),
                tracker: TaskTracker::new(),
                token: CancellationToken::new(),
            }),
        }
    }

    pub fn searcher(&self) -> &Searcher {
        &self.inner.context.searcher
    }

    /// Start a worker for every enabled provider and return
    ///
    /// Failing to list providers is an error; failing to start a worker is
    /// recorded and reported through [`Poller::worker_error`].
    pub fn start(&self) -> Result<usize> {
        let providers = self.inner.storage.list_providers(ProviderFilter::enabled())?;

        let started = providers.iter().filter(|provider| self.start_worker(provider)).count();
        self.searcher().apply_priorities();

        info!(providers = providers.len(), started, "poller started");
        Ok(started)
    }

    /// Start every enabled provider, then block until `token` is cancelled
    /// and every worker has terminated
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        self.start()?;

        tokio::select! {
            _ = token.cancelled() => {}
            _ = self.inner.token.cancelled() => {}
        }

        self.shutdown();
        self.wait().await;
        Ok(())
    }

    /// Launch a worker for `provider`
    ///
    /// Returns `true` when a new worker was launched. Disabled providers and
    /// providers that already have a worker are skipped.
    pub fn start_worker(&self, provider: &Provider) -> bool {
        let id = provider.item.id.clone();

        if !provider.enabled {
            debug!(provider = %provider.item.name, "provider disabled, skipping");
            return false;
        }

        let mut state = self.inner.state.lock();
        if state.workers.contains_key(&id) || self.inner.token.is_cancelled() {
            return false;
        }

        match Worker::new(provider, self.inner.context.clone(), &self.inner.token) {
            Ok(worker) => {
                state.errors.remove(&id);
                state.workers.insert(id, worker.handle());
                self.inner.tracker.spawn(worker.run());
                true
            }
            Err(e) => {
                error!(
                    provider = %provider.item.name,
                    error = %e,
                    category = e.category(),
                    recoverable = e.is_recoverable(),
                    "unable to start worker"
                );
                self.inner.context.metrics.record_worker_start_error();
                state.errors.insert(id, Arc::new(e));
                false
            }
        }
    }

    /// Shut down the worker of `provider`, starting a fresh one when `restart` is set
    pub fn stop_worker(&self, provider: &Provider, restart: bool) {
        let handle = self.inner.state.lock().workers.remove(&provider.item.id);

        if let Some(handle) = handle {
            handle.shutdown();
            debug!(provider = %provider.item.name, "worker stopped");
        }

        if restart {
            self.start_worker(provider);
        }
    }

    /// Reconcile the worker of `provider` with its latest stored settings
    pub fn update_provider(&self, provider: &Provider) {
        let current = self.worker(&provider.item.id);

        match current {
            Some(_) if !provider.enabled => self.stop_worker(provider, false),
            Some(handle) if handle.provider().requires_restart(provider) => self.stop_worker(provider, true),
            Some(_) => return,
            None => {
                self.start_worker(provider);
            }
        }

        self.searcher().apply_priorities();
    }

    /// Shut down every worker; they terminate asynchronously
    pub fn shutdown(&self) {
        let handles: Vec<WorkerHandle> = {
            let mut state = self.inner.state.lock();
            state.workers.drain().map(|(_, handle)| handle).collect()
        };

        for handle in &handles {
            handle.shutdown();
        }
        self.inner.token.cancel();
        self.inner.tracker.close();

        info!(workers = handles.len(), "poller shutting down");
    }

    /// Wait for every launched worker to terminate
    pub async fn wait(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    /// Queue a refresh on every worker
    pub fn refresh_all(&self) {
        for handle in self.inner.state.lock().workers.values() {
            handle.refresh();
        }
    }

    /// Queue a refresh on the worker of provider `id`; `false` when there is none
    pub fn refresh(&self, id: &str) -> bool {
        self.worker(id).map_or(false, |handle| handle.refresh())
    }

    /// Error recorded when the worker of provider `id` failed to start
    pub fn worker_error(&self, id: &str) -> Option<Arc<SightlineError>> {
        self.inner.state.lock().errors.get(id).cloned()
    }

    pub fn worker(&self, id: &str) -> Option<WorkerHandle> {
        self.inner.state.lock().workers.get(id).cloned()
    }

    /// Handles of the running workers, sorted by provider name
    pub fn workers(&self) -> Vec<WorkerHandle> {
        let mut workers: Vec<WorkerHandle> = self.inner.state.lock().workers.values().cloned().collect();
        workers.sort_by(|a, b| a.provider().item.name.cmp(&b.provider().item.name));
        workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, MetricsConfig, PollerConfig};
    use crate::connector::ConnectorRegistry;
    use crate::error::ConnectorError;
    use crate::metrics::MetricsCollector;
    use crate::storage::MemoryStorage;
    use serde_json::json;
    use std::time::Duration;

    fn context() -> WorkerContext {
        WorkerContext {
            searcher: Searcher::new(),
            connectors: ConnectorRegistry::new(),
            metrics: Arc::new(MetricsCollector::new(MetricsConfig::default()).unwrap()),
            cache: CacheConfig {
                path: None,
                dump_on_shutdown: false,
            },
            poller: PollerConfig::default(),
        }
    }

    fn provider(name: &str, metric: &str, priority: i64) -> Provider {
        let mut provider = Provider::new(name, "static");
        provider.priority = priority;
        provider.settings.set(
            "records",
            json!([{"origin": "collectd", "source": "host1", "metric": metric}]),
        );
        provider
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    fn storage(providers: Vec<Provider>) -> (Arc<MemoryStorage>, Vec<Provider>) {
        let storage = Arc::new(MemoryStorage::new().unwrap());
        let saved = providers
            .into_iter()
            .map(|provider| storage.save_provider(provider).unwrap())
            .collect();
        (storage, saved)
    }

    #[tokio::test]
    async fn test_run_and_shutdown() {
        let mut disabled = provider("disabled", "load", 0);
        disabled.enabled = false;
        let (storage, saved) = storage(vec![provider("low", "load", 0), provider("high", "load", 10), disabled]);

        let poller = Poller::new(storage, context());
        let searcher = poller.searcher().clone();
        let token = CancellationToken::new();

        let running = tokio::spawn({
            let poller = poller.clone();
            let token = token.clone();
            async move { poller.run(token).await }
        });

        wait_for(|| searcher.metrics("", "", "load").len() == 2).await;
        assert_eq!(poller.workers().len(), 2);
        assert!(poller.worker(&saved[2].item.id).is_none());

        let catalogs: Vec<String> = searcher
            .metrics("", "", "load")
            .iter()
            .map(|m| m.catalog().name().to_string())
            .collect();
        assert_eq!(catalogs, vec!["high", "low"]);

        token.cancel();
        running.await.unwrap().unwrap();
        assert!(searcher.is_empty());
        assert!(poller.workers().is_empty());
    }

    #[tokio::test]
    async fn test_start_worker_errors_and_idempotency() {
        let (storage, _) = storage(Vec::new());
        let poller = Poller::new(storage, context());

        let mut broken = Provider::new("broken", "graphite");
        broken.item.id = "0b6cbd15-5bd6-4d47-9a5b-4b8b4c7bc0d1".to_string();
        assert!(!poller.start_worker(&broken));

        let error = poller.worker_error(&broken.item.id).unwrap();
        assert!(matches!(
            error.as_ref(),
            SightlineError::Connector(ConnectorError::UnsupportedConnector { .. })
        ));
        assert_eq!(poller.inner.context.metrics.get_stats().worker_start_errors, 1);

        let mut good = provider("good", "load", 0);
        good.item.id = "5f0ae4b8-9a3c-4d7e-8c2d-0a1b2c3d4e5f".to_string();
        assert!(poller.start_worker(&good));
        assert!(!poller.start_worker(&good));
        assert!(poller.worker_error(&good.item.id).is_none());

        poller.shutdown();
        poller.wait().await;
        assert!(!poller.start_worker(&good));
    }

    #[tokio::test]
    async fn test_stop_restart_and_refresh() {
        let (storage, saved) = storage(vec![provider("p1", "load", 0)]);
        let poller = Poller::new(storage, context());
        let searcher = poller.searcher().clone();

        assert_eq!(poller.start().unwrap(), 1);
        let id = saved[0].item.id.clone();
        wait_for(|| searcher.metrics("", "", "load").len() == 1).await;

        assert!(poller.refresh(&id));
        assert!(!poller.refresh("unknown"));
        poller.refresh_all();

        let first = poller.worker(&id).unwrap();
        poller.stop_worker(&saved[0], true);
        assert_eq!(first.catalog().name(), "p1");
        assert!(!first.catalog().ptr_eq(poller.worker(&id).unwrap().catalog()));
        wait_for(|| searcher.len() == 1 && searcher.metrics("", "", "load").len() == 1).await;

        poller.stop_worker(&saved[0], false);
        assert!(poller.worker(&id).is_none());
        assert!(searcher.is_empty());

        poller.shutdown();
        poller.wait().await;
    }

    #[tokio::test]
    async fn test_stop_before_first_poll() {
        let (storage, saved) = storage(vec![provider("p1", "load", 0)]);
        let poller = Poller::new(storage, context());
        let searcher = poller.searcher().clone();

        assert!(poller.start_worker(&saved[0]));
        poller.stop_worker(&saved[0], false);
        poller.shutdown();
        poller.wait().await;

        assert!(searcher.is_empty());
    }

    #[tokio::test]
    async fn test_restart_before_first_poll() {
        let (storage, saved) = storage(vec![provider("p1", "load", 0)]);
        let poller = Poller::new(storage, context());
        let searcher = poller.searcher().clone();

        assert!(poller.start_worker(&saved[0]));
        poller.stop_worker(&saved[0], true);

        wait_for(|| searcher.metrics("", "", "load").len() == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(searcher.len(), 1);
        assert!(searcher.catalogs()[0].ptr_eq(poller.worker(&saved[0].item.id).unwrap().catalog()));

        poller.shutdown();
        poller.wait().await;
        assert!(searcher.is_empty());
    }

    #[tokio::test]
    async fn test_run_cancelled_immediately() {
        let (storage, _) = storage(vec![provider("p1", "load", 0), provider("p2", "load", 0)]);
        let poller = Poller::new(storage, context());
        let searcher = poller.searcher().clone();

        let token = CancellationToken::new();
        token.cancel();
        poller.run(token).await.unwrap();

        assert!(searcher.is_empty());
        assert!(poller.workers().is_empty());
    }

    #[tokio::test]
    async fn test_update_provider() {
        let (storage, saved) = storage(vec![provider("p1", "load", 0)]);
        let poller = Poller::new(storage, context());
        let searcher = poller.searcher().clone();
        poller.start().unwrap();

        let id = saved[0].item.id.clone();
        wait_for(|| searcher.metrics("", "", "load").len() == 1).await;

        // Unchanged settings keep the running worker
        let before = poller.worker(&id).unwrap();
        poller.update_provider(&saved[0]);
        assert!(before.catalog().ptr_eq(poller.worker(&id).unwrap().catalog()));

        let mut changed = saved[0].clone();
        changed.settings.set(
            "records",
            json!([{"origin": "collectd", "source": "host1", "metric": "uptime"}]),
        );
        poller.update_provider(&changed);
        wait_for(|| searcher.metrics("", "", "uptime").len() == 1).await;
        assert!(searcher.metrics("", "", "load").is_empty());

        changed.enabled = false;
        poller.update_provider(&changed);
        assert!(poller.worker(&id).is_none());
        assert!(searcher.is_empty());

        poller.shutdown();
        poller.wait().await;
    }
}
