//! Per-provider worker
//!
//! A worker owns one provider's connector, catalog and filter chain. Its
//! main loop multiplexes refresh and shutdown commands, the optional
//! refresh ticker, and the filter chain output (records to insert) and
//! diagnostics. Refreshes run on their own task so the loop keeps draining
//! records while a connector streams them.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::catalog::state::{dump_to_file, restore_from_file, state_path};
use crate::catalog::{Catalog, FilterChain, Record, Searcher};
use crate::config::{CacheConfig, PollerConfig};
use crate::connector::{Connector, ConnectorRegistry};
use crate::error::{CatalogError, ConnectorError, ConnectorResult, Result};
use crate::metrics::MetricsCollector;
use crate::storage::Provider;

/// Lifecycle of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    New,
    Initializing,
    Running,
    Refreshing,
    Stopping,
    Terminated,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::New => "new",
            WorkerState::Initializing => "initializing",
            WorkerState::Running => "running",
            WorkerState::Refreshing => "refreshing",
            WorkerState::Stopping => "stopping",
            WorkerState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Refresh,
    Shutdown,
}

/// Everything a worker shares with its poller
#[derive(Clone)]
pub struct WorkerContext {
    pub searcher: Searcher,
    pub connectors: ConnectorRegistry,
    pub metrics: Arc<MetricsCollector>,
    pub cache: CacheConfig,
    pub poller: PollerConfig,
}

struct HandleInner {
    provider: Provider,
    catalog: Catalog,
    searcher: Searcher,
    commands: mpsc::UnboundedSender<Command>,
    state: RwLock<WorkerState>,
    refreshing: AtomicBool,
    // Guards searcher registration against a concurrent shutdown
    stopped: Mutex<bool>,
    token: CancellationToken,
}

/// Cloneable control handle over a running worker
#[derive(Clone)]
pub struct WorkerHandle {
    inner: Arc<HandleInner>,
}

impl WorkerHandle {
    pub fn provider(&self) -> &Provider {
        &self.inner.provider
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    pub fn state(&self) -> WorkerState {
        *self.inner.state.read()
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.refreshing.load(Ordering::SeqCst)
    }

    /// Queue a refresh; returns `false` once the worker has stopped
    pub fn refresh(&self) -> bool {
        self.inner.commands.send(Command::Refresh).is_ok()
    }

    /// Unregister the catalog and stop the worker; later calls are no-ops
    pub fn shutdown(&self) {
        {
            let mut stopped = self.inner.stopped.lock();
            if *stopped {
                return;
            }
            *stopped = true;
            self.inner.searcher.unregister(&self.inner.catalog);
        }

        let _ = self.inner.commands.send(Command::Shutdown);
        self.inner.token.cancel();
    }

    /// Make the catalog visible to the searcher; `false` once shut down
    fn register(&self) -> bool {
        let stopped = self.inner.stopped.lock();
        if *stopped || self.inner.token.is_cancelled() {
            return false;
        }
        self.inner.searcher.register(self.inner.catalog.clone());
        true
    }

    fn set_state(&self, state: WorkerState) {
        *self.inner.state.write() = state;
    }

    /// Claim the refresh slot; `false` when a refresh is already in flight
    fn begin_refresh(&self) -> bool {
        if self.inner.refreshing.swap(true, Ordering::SeqCst) {
            return false;
        }

        let mut state = self.inner.state.write();
        if *state == WorkerState::Running {
            *state = WorkerState::Refreshing;
        }
        true
    }

    fn finish_refresh(&self) {
        let mut state = self.inner.state.write();
        if *state == WorkerState::Refreshing {
            *state = WorkerState::Running;
        }
        self.inner.refreshing.store(false, Ordering::SeqCst);
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("provider", &self.inner.provider.item.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Runs connector refreshes on their own task
#[derive(Clone)]
struct Refresher {
    connector: Arc<dyn Connector>,
    input: mpsc::Sender<Record>,
    handle: WorkerHandle,
    metrics: Arc<MetricsCollector>,
    timeout: Option<Duration>,
}

impl Refresher {
    fn start(&self) {
        if !self.handle.begin_refresh() {
            debug!("refresh already in progress, skipping");
            return;
        }

        let refresher = self.clone();
        tokio::spawn(refresher.refresh().instrument(Span::current()));
    }

    async fn refresh(self) {
        let started = Instant::now();
        let token = self.handle.inner.token.clone();

        let outcome = tokio::select! {
            result = bounded(self.connector.refresh(self.input.clone()), self.timeout) => result,
            _ = token.cancelled() => Err(ConnectorError::Cancelled),
        };

        match &outcome {
            Ok(()) => debug!(elapsed = ?started.elapsed(), "refresh completed"),
            Err(ConnectorError::Cancelled) => debug!("refresh cancelled"),
            Err(e) => error!(error = %e, "refresh failed"),
        }

        self.metrics.record_refresh(started.elapsed(), outcome.is_ok());
        self.handle.finish_refresh();
    }
}

async fn bounded<F>(refresh: F, timeout: Option<Duration>) -> ConnectorResult<()>
where
    F: std::future::Future<Output = ConnectorResult<()>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, refresh)
            .await
            .unwrap_or(Err(ConnectorError::Timeout { seconds: limit.as_secs() })),
        None => refresh.await,
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// A provider worker, ready to run
pub struct Worker {
    connector: Arc<dyn Connector>,
    chain: FilterChain,
    commands: mpsc::UnboundedReceiver<Command>,
    handle: WorkerHandle,
    context: WorkerContext,
}

impl Worker {
    /// Build the connector, catalog and filter chain of `provider`
    ///
    /// Must be called from within a Tokio runtime. `parent` cancels the
    /// worker along with any in-flight refresh.
    pub fn new(provider: &Provider, context: WorkerContext, parent: &CancellationToken) -> Result<Self> {
        let name = provider.item.name.as_str();
        let connector = context
            .connectors
            .create(&provider.connector, name, &provider.settings)?;

        let catalog = Catalog::new(name, Some(connector.clone()));
        let chain = FilterChain::new(&provider.filters, context.poller.messages_capacity);
        let (commands_tx, commands) = mpsc::unbounded_channel();

        let handle = WorkerHandle {
            inner: Arc::new(HandleInner {
                provider: provider.clone(),
                catalog,
                searcher: context.searcher.clone(),
                commands: commands_tx,
                state: RwLock::new(WorkerState::New),
                refreshing: AtomicBool::new(false),
                stopped: Mutex::new(false),
                token: parent.child_token(),
            }),
        };

        Ok(Self {
            connector,
            chain,
            commands,
            handle,
            context,
        })
    }

    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    /// Run until shut down or cancelled
    pub async fn run(self) {
        let span = info_span!("poller", provider = %self.handle.provider().item.name);
        self.run_loop().instrument(span).await
    }

    fn state_file(&self) -> Option<PathBuf> {
        self.context
            .cache
            .path
            .as_ref()
            .map(|dir| state_path(dir, &self.handle.provider().item.name))
    }

    async fn run_loop(self) {
        let state_file = self.state_file();
        let Worker {
            connector,
            chain,
            mut commands,
            handle,
            context,
        } = self;
        let FilterChain {
            input,
            mut output,
            mut messages,
            ..
        } = chain;

        handle.set_state(WorkerState::Initializing);
        let provider = handle.provider().clone();
        let catalog = handle.catalog().clone();

        if let Some(path) = &state_file {
            match restore_from_file(&catalog, path) {
                Ok(0) => {}
                Ok(count) => info!(records = count, "restored catalog state"),
                Err(e) => warn!(
                    error = %e,
                    category = e.category(),
                    path = %path.display(),
                    "unable to restore catalog state"
                ),
            }
        }

        if provider.priority > 0 {
            catalog.set_priority(provider.priority);
        }
        if !handle.register() {
            handle.set_state(WorkerState::Terminated);
            debug!("worker stopped before start");
            return;
        }
        context.metrics.worker_started();
        handle.set_state(WorkerState::Running);
        info!(connector = %provider.connector, "worker started");

        let refresher = Refresher {
            connector,
            input,
            handle: handle.clone(),
            metrics: context.metrics.clone(),
            timeout: (context.poller.refresh_timeout > 0).then(|| Duration::from_secs(context.poller.refresh_timeout)),
        };
        refresher.start();

        let mut ticker = (provider.refresh_interval > 0).then(|| {
            let period = Duration::from_secs(provider.refresh_interval as u64);
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });

        let token = handle.inner.token.clone();
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                command = commands.recv() => match command {
                    Some(Command::Refresh) => refresher.start(),
                    Some(Command::Shutdown) | None => break,
                },
                Some(record) = output.recv() => insert(&catalog, &context.metrics, record),
                Some(message) = messages.recv() => {
                    debug!(%message, "filter");
                    context.metrics.record_filter_message();
                }
                _ = tick(&mut ticker) => refresher.start(),
            }
        }

        handle.set_state(WorkerState::Stopping);
        handle.shutdown();
        context.searcher.unregister(&catalog);
        commands.close();
        drop(refresher);

        if let Some(path) = state_file.filter(|_| context.cache.dump_on_shutdown) {
            if let Err(e) = dump_to_file(&catalog, &path) {
                warn!(error = %e, path = %path.display(), "unable to dump catalog state");
            }
        }

        context.metrics.worker_stopped();
        handle.set_state(WorkerState::Terminated);
        info!("worker terminated");
    }
}

fn insert(catalog: &Catalog, metrics: &MetricsCollector, record: Record) {
    match catalog.insert(&record) {
        Ok(true) => metrics.record_inserted(),
        Ok(false) => {}
        Err(CatalogError::InvalidRecord { reason }) => {
            debug!(%record, %reason, "discarding invalid record");
            metrics.record_discarded();
        }
        Err(e) => warn!(%record, error = %e, "unable to insert record"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;
    use crate::storage::FilterRule;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn worker_context(cache: Option<PathBuf>) -> WorkerContext {
        WorkerContext {
            searcher: Searcher::new(),
            connectors: ConnectorRegistry::new(),
            metrics: Arc::new(MetricsCollector::new(MetricsConfig::default()).unwrap()),
            cache: CacheConfig {
                path: cache,
                dump_on_shutdown: true,
            },
            poller: PollerConfig::default(),
        }
    }

    fn static_provider() -> Provider {
        let mut provider = Provider::new("static1", "static");
        provider.settings.set(
            "records",
            json!([
                {"origin": "collectd", "source": "host1", "metric": "cpu.user"},
                {"origin": "collectd", "source": "host1", "metric": "cpu.system"},
                {"origin": "collectd", "source": "host2", "metric": "load"},
            ]),
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

    #[tokio::test]
    async fn test_worker_lifecycle() {
        let context = worker_context(None);
        let searcher = context.searcher.clone();
        let token = CancellationToken::new();

        let worker = Worker::new(&static_provider(), context, &token).unwrap();
        let handle = worker.handle();
        assert_eq!(handle.state(), WorkerState::New);

        let task = tokio::spawn(worker.run());
        wait_for(|| handle.catalog().len() == 3).await;

        assert_eq!(searcher.len(), 1);
        assert_eq!(searcher.metrics("collectd", "", "").len(), 3);

        handle.shutdown();
        handle.shutdown();
        assert!(searcher.is_empty());

        task.await.unwrap();
        assert_eq!(handle.state(), WorkerState::Terminated);
        assert!(!handle.refresh());
    }

    #[tokio::test]
    async fn test_shutdown_before_first_poll() {
        let context = worker_context(None);
        let searcher = context.searcher.clone();
        let metrics = context.metrics.clone();
        let token = CancellationToken::new();

        let worker = Worker::new(&static_provider(), context, &token).unwrap();
        let handle = worker.handle();
        let task = tokio::spawn(worker.run());
        handle.shutdown();

        task.await.unwrap();
        assert!(searcher.is_empty());
        assert_eq!(handle.state(), WorkerState::Terminated);
        assert_eq!(metrics.get_stats().workers_running, 0);
    }

    #[tokio::test]
    async fn test_worker_filters_and_discards() {
        let context = worker_context(None);
        let metrics = context.metrics.clone();
        let token = CancellationToken::new();

        let mut provider = static_provider();
        provider.filters = vec![
            FilterRule::discard("source", "host2"),
            FilterRule::rewrite("metric", r"^cpu\.system$", ""),
        ];

        let worker = Worker::new(&provider, context, &token).unwrap();
        let handle = worker.handle();
        let task = tokio::spawn(worker.run());

        wait_for(|| metrics.get_stats().records_discarded == 1).await;
        wait_for(|| metrics.get_stats().filter_messages >= 1).await;
        assert_eq!(handle.catalog().len(), 1);

        token.cancel();
        task.await.unwrap();
        assert_eq!(handle.state(), WorkerState::Terminated);
    }

    #[tokio::test]
    async fn test_unknown_connector() {
        let provider = Provider::new("broken", "graphite");
        let result = Worker::new(&provider, worker_context(None), &CancellationToken::new());
        assert!(result.is_err());
    }

    struct CountingConnector {
        calls: Arc<AtomicUsize>,
        delay: Duration,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        fn name(&self) -> &str {
            "counting"
        }

        async fn refresh(&self, output: mpsc::Sender<Record>) -> ConnectorResult<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let _ = output.send(Record::new("test", "host", format!("metric{}", call))).await;
            Ok(())
        }
    }

    fn counting_context(calls: Arc<AtomicUsize>, delay: Duration) -> WorkerContext {
        let mut context = worker_context(None);
        context.connectors.register("counting", move |_, _| {
            Ok(Arc::new(CountingConnector {
                calls: calls.clone(),
                delay,
            }) as Arc<dyn Connector>)
        });
        context
    }

    #[tokio::test]
    async fn test_refresh_in_flight_is_dropped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let context = counting_context(calls.clone(), Duration::from_millis(200));
        let token = CancellationToken::new();

        let worker = Worker::new(&Provider::new("slow", "counting"), context, &token).unwrap();
        let handle = worker.handle();
        let task = tokio::spawn(worker.run());

        wait_for(|| handle.is_refreshing()).await;
        assert_eq!(handle.state(), WorkerState::Refreshing);
        assert!(handle.refresh());
        assert!(handle.refresh());

        wait_for(|| handle.catalog().len() == 1).await;
        wait_for(|| !handle.is_refreshing()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), WorkerState::Running);

        handle.refresh();
        wait_for(|| handle.catalog().len() == 2).await;

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_periodic_refresh() {
        let calls = Arc::new(AtomicUsize::new(0));
        let context = counting_context(calls.clone(), Duration::ZERO);
        let token = CancellationToken::new();

        let mut provider = Provider::new("periodic", "counting");
        provider.refresh_interval = 1;

        let worker = Worker::new(&provider, context, &token).unwrap();
        let handle = worker.handle();
        let task = tokio::spawn(worker.run());

        wait_for(|| calls.load(Ordering::SeqCst) >= 2).await;

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_timeout() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut context = counting_context(calls, Duration::from_secs(30));
        context.poller.refresh_timeout = 1;
        let metrics = context.metrics.clone();
        let token = CancellationToken::new();

        let worker = Worker::new(&Provider::new("stuck", "counting"), context, &token).unwrap();
        let handle = worker.handle();
        let task = tokio::spawn(worker.run());

        wait_for(|| metrics.get_stats().refresh_errors == 1).await;
        assert_eq!(handle.state(), WorkerState::Running);

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_warm_start() {
        let dir = tempfile::tempdir().unwrap();

        let context = worker_context(Some(dir.path().to_path_buf()));
        let token = CancellationToken::new();
        let worker = Worker::new(&static_provider(), context, &token).unwrap();
        let handle = worker.handle();
        let task = tokio::spawn(worker.run());
        wait_for(|| handle.catalog().len() == 3).await;
        handle.shutdown();
        task.await.unwrap();

        assert!(state_path(dir.path(), "static1").exists());

        // Same provider, no records from the connector: the catalog comes from the dump
        let context = worker_context(Some(dir.path().to_path_buf()));
        let searcher = context.searcher.clone();
        let provider = Provider::new("static1", "static");
        let worker = Worker::new(&provider, context, &token).unwrap();
        let handle = worker.handle();
        let task = tokio::spawn(worker.run());

        wait_for(|| handle.state() == WorkerState::Running).await;
        assert_eq!(handle.catalog().len(), 3);
        assert_eq!(searcher.metrics("", "host2", "load").len(), 1);

        handle.shutdown();
        task.await.unwrap();
    }
}
