//! Prometheus metrics for the catalog core
//!
//! The collector owns a private registry so that several instances (one
//! per test, for example) never collide on metric names.

use std::time::Duration;

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};

use crate::config::MetricsConfig;
use crate::error::{MetricsError, MetricsResult};

/// Metrics collector shared by the poller and its workers
pub struct MetricsCollector {
    config: MetricsConfig,
    registry: Registry,
    counters: CatalogCounters,
}

/// Counters, gauges and histograms of the catalog core
#[derive(Clone)]
pub struct CatalogCounters {
    pub records_inserted: IntCounter,
    pub records_discarded: IntCounter,
    pub filter_messages: IntCounter,
    pub refreshes: IntCounter,
    pub refresh_errors: IntCounter,
    pub refresh_duration: Histogram,
    pub workers_running: IntGauge,
    pub worker_start_errors: IntCounter,
}

/// Point-in-time view of the counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub records_inserted: u64,
    pub records_discarded: u64,
    pub filter_messages: u64,
    pub refreshes: u64,
    pub refresh_errors: u64,
    pub workers_running: i64,
    pub worker_start_errors: u64,
}

fn registration_failed(e: prometheus::Error) -> MetricsError {
    MetricsError::RegistrationFailed { name: e.to_string() }
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new(config: MetricsConfig) -> MetricsResult<Self> {
        let registry = Registry::new_custom(Some(config.namespace.clone()), None).map_err(registration_failed)?;
        let counters = CatalogCounters::new(&registry)?;

        Ok(Self {
            config,
            registry,
            counters,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn counters(&self) -> &CatalogCounters {
        &self.counters
    }

    pub fn record_inserted(&self) {
        self.counters.records_inserted.inc();
    }

    pub fn record_discarded(&self) {
        self.counters.records_discarded.inc();
    }

    pub fn record_filter_message(&self) {
        self.counters.filter_messages.inc();
    }

    pub fn record_refresh(&self, duration: Duration, success: bool) {
        self.counters.refreshes.inc();
        self.counters.refresh_duration.observe(duration.as_secs_f64());
        if !success {
            self.counters.refresh_errors.inc();
        }
    }

    pub fn worker_started(&self) {
        self.counters.workers_running.inc();
    }

    pub fn worker_stopped(&self) {
        self.counters.workers_running.dec();
    }

    pub fn record_worker_start_error(&self) {
        self.counters.worker_start_errors.inc();
    }

    pub fn get_stats(&self) -> CatalogStats {
        CatalogStats {
            records_inserted: self.counters.records_inserted.get(),
            records_discarded: self.counters.records_discarded.get(),
            filter_messages: self.counters.filter_messages.get(),
            refreshes: self.counters.refreshes.get(),
            refresh_errors: self.counters.refresh_errors.get(),
            workers_running: self.counters.workers_running.get(),
            worker_start_errors: self.counters.worker_start_errors.get(),
        }
    }

    /// Export metrics in the specified format (`prometheus` or `json`)
    pub fn export_metrics(&self, format: &str) -> MetricsResult<String> {
        match format {
            "prometheus" => {
                let encoder = TextEncoder::new();
                let mut buffer = Vec::new();
                encoder
                    .encode(&self.registry.gather(), &mut buffer)
                    .map_err(|e| MetricsError::ExportFailed { reason: e.to_string() })?;
                String::from_utf8(buffer).map_err(|e| MetricsError::ExportFailed { reason: e.to_string() })
            }
            "json" => {
                let combined = serde_json::json!({
                    "catalog_stats": self.get_stats(),
                    "timestamp": chrono::Utc::now().timestamp(),
                });

                serde_json::to_string_pretty(&combined).map_err(|e| MetricsError::ExportFailed { reason: e.to_string() })
            }
            _ => Err(MetricsError::ExportFailed {
                reason: format!("Unsupported format: {}", format),
            }),
        }
    }
}

impl CatalogCounters {
    fn new(registry: &Registry) -> MetricsResult<Self> {
        let counter = |name: &str, help: &str| -> MetricsResult<IntCounter> {
            let counter = IntCounter::new(name, help).map_err(registration_failed)?;
            registry.register(Box::new(counter.clone())).map_err(registration_failed)?;
            Ok(counter)
        };

        let refresh_duration = Histogram::with_opts(
            HistogramOpts::new("refresh_duration_seconds", "Duration of provider refreshes")
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]),
        )
        .map_err(registration_failed)?;
        registry
            .register(Box::new(refresh_duration.clone()))
            .map_err(registration_failed)?;

        let workers_running =
            IntGauge::with_opts(Opts::new("workers_running", "Number of running provider workers")).map_err(registration_failed)?;
        registry
            .register(Box::new(workers_running.clone()))
            .map_err(registration_failed)?;

        Ok(Self {
            records_inserted: counter("records_inserted_total", "Total number of metrics added to catalogs")?,
            records_discarded: counter("records_discarded_total", "Total number of records dropped before insertion")?,
            filter_messages: counter("filter_messages_total", "Total number of filter chain diagnostics")?,
            refreshes: counter("refreshes_total", "Total number of provider refreshes")?,
            refresh_errors: counter("refresh_errors_total", "Total number of failed provider refreshes")?,
            refresh_duration,
            workers_running,
            worker_start_errors: counter("worker_start_errors_total", "Total number of workers that failed to start")?,
        })
    }
}
