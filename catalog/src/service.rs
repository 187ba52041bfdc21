//! Catalog service: storage, poller and searcher wired together
//!
//! The service owns the lifetime of the poller. `start` launches it on a
//! background task; `stop` cancels it and waits for every worker to
//! terminate, bounded by the configured graceful timeout.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::signal;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::attributes::Attributes;
use crate::catalog::Searcher;
use crate::config::SightlineConfig;
use crate::connector::ConnectorRegistry;
use crate::error::{Result, SightlineError};
use crate::library::plot::{self, PlotRequest, PlotResponse};
use crate::metrics::MetricsCollector;
use crate::poller::{Poller, WorkerContext};
use crate::storage::{self, Storage};

/// Service status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Service state
#[derive(Debug, Clone)]
pub struct ServiceState {
    pub status: ServiceStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

pub struct CatalogService {
    config: SightlineConfig,
    storage: Arc<dyn Storage>,
    metrics: Arc<MetricsCollector>,
    poller: Poller,
    state: Arc<RwLock<ServiceState>>,
    token: CancellationToken,
    task: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl CatalogService {
    /// Create the service with the configured storage backend and built-in connectors
    pub fn new(config: SightlineConfig) -> Result<Self> {
        let storage = Arc::new(storage::open(&config.backend)?);
        Self::with_parts(config, storage, ConnectorRegistry::new())
    }

    /// Create the service around an existing storage and connector registry
    pub fn with_parts(config: SightlineConfig, storage: Arc<dyn Storage>, connectors: ConnectorRegistry) -> Result<Self> {
        tracing::info!(connectors = ?connectors.types(), "initializing catalog service");

        let metrics = Arc::new(MetricsCollector::new(config.metrics.clone())?);
        let context = WorkerContext {
            searcher: Searcher::new(),
            connectors,
            metrics: metrics.clone(),
            cache: config.cache.clone(),
            poller: config.poller.clone(),
        };
        let poller = Poller::new(storage.clone(), context);

        Ok(Self {
            config,
            storage,
            metrics,
            poller,
            state: Arc::new(RwLock::new(ServiceState {
                status: ServiceStatus::Starting,
                started_at: None,
                last_error: None,
            })),
            token: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    /// Launch the poller in the background
    pub async fn start(&self) -> Result<()> {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return Err(SightlineError::Generic("service already started".to_string()));
        }

        tracing::info!("starting catalog service");
        self.poller.start()?;

        let poller = self.poller.clone();
        let token = self.token.clone();
        let state = self.state.clone();
        *task = Some(tokio::spawn(async move {
            token.cancelled().await;
            poller.shutdown();
            poller.wait().await;
            state.write().await.status = ServiceStatus::Stopped;
            Ok::<(), SightlineError>(())
        }));

        let mut state = self.state.write().await;
        state.status = ServiceStatus::Running;
        state.started_at = Some(Utc::now());
        Ok(())
    }

    /// Stop the poller, waiting at most `server.graceful_timeout` seconds for workers to exit
    pub async fn stop(&self) -> Result<()> {
        tracing::info!("stopping catalog service");
        self.state.write().await.status = ServiceStatus::Stopping;
        self.token.cancel();

        let task = self.task.lock().await.take();
        if let Some(task) = task {
            let limit = Duration::from_secs(self.config.server.graceful_timeout);
            match tokio::time::timeout(limit, task).await {
                Ok(Ok(result)) => result?,
                Ok(Err(e)) => {
                    self.state.write().await.last_error = Some(e.to_string());
                    return Err(SightlineError::Generic(format!("poller task failed: {}", e)));
                }
                Err(_) => {
                    tracing::warn!(timeout = ?limit, "workers did not stop in time");
                    self.state.write().await.last_error = Some("graceful timeout exceeded".to_string());
                }
            }
        }

        self.state.write().await.status = ServiceStatus::Stopped;
        tracing::info!("catalog service stopped");
        Ok(())
    }

    pub async fn get_status(&self) -> ServiceState {
        self.state.read().await.clone()
    }

    pub fn config(&self) -> &SightlineConfig {
        &self.config
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    pub fn searcher(&self) -> &Searcher {
        self.poller.searcher()
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Plot request covering the configured default time range, ending or starting at `now`
    pub fn default_request(&self, now: DateTime<Utc>) -> Result<PlotRequest> {
        Ok(PlotRequest::from_range(now, &self.config.defaults.time_range)?)
    }

    /// Plot the stored graph `id`, expanded with `attrs`
    pub async fn plot(&self, id: &str, attrs: Option<&Attributes>, request: &PlotRequest) -> Result<PlotResponse> {
        plot::evaluate_item(self.storage.as_ref(), self.searcher(), id, attrs, request).await
    }

    /// Wait for SIGTERM or SIGINT
    pub async fn wait_for_shutdown(&self) -> Result<()> {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT");
            }
        }

        Ok(())
    }
}
