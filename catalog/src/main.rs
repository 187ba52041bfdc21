//! Sightline catalog daemon entry point
//!
//! Runs one worker per enabled provider, keeps their catalogs registered
//! with the searcher and dumps catalog state to the cache on shutdown.

use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use sightline_catalog::{
    config::SightlineConfig,
    connector::ConnectorRegistry,
    library::collection,
    logging,
    service::CatalogService,
    storage::{self, ProviderFilter, Storage},
};

/// Sightline catalog command line interface
#[derive(Parser)]
#[command(name = "sightline")]
#[command(about = "Metric catalog and poller for the Sightline dashboard server")]
#[command(version = "0.1.0")]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level, overrides the configuration file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Run the poller until SIGTERM or SIGINT
    Run,

    /// Validate configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,
    },

    /// List stored providers and whether their connector is available
    Providers,

    /// Index every enabled provider once and export the metrics snapshot
    Metrics {
        /// Output format (json, prometheus)
        #[arg(short, long, default_value = "prometheus")]
        format: String,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the collection tree as JSON
    Collections {
        /// Only print the subtree below this collection
        #[arg(long)]
        parent: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            process::exit(1);
        }
    };
    if cli.json_logs {
        config.logging.format = "json".to_string();
    }

    let _guard = match logging::init(&config.logging, cli.log_level.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            process::exit(1);
        }
    };

    let result = match &cli.command {
        Some(Commands::Run) | None => run_service(config).await,
        Some(Commands::Config { show }) => handle_config(&config, *show),
        Some(Commands::Providers) => list_providers(&config),
        Some(Commands::Metrics { format, output }) => export_metrics(config, format, output.as_deref()).await,
        Some(Commands::Collections { parent }) => print_collections(&config, parent.as_deref()),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        process::exit(1);
    }
}

/// Load configuration from the given file, the default location or defaults
fn load_configuration(cli: &Cli) -> Result<SightlineConfig> {
    let path = match &cli.config {
        Some(path) => {
            if !path.exists() {
                bail!("configuration file not found: {}", path.display());
            }
            path.clone()
        }
        None => SightlineConfig::default_config_path()?,
    };

    SightlineConfig::load_with_fallback(Some(&path))
        .with_context(|| format!("invalid configuration in {}", path.display()))
}

/// Start the service and block until a shutdown signal arrives
async fn run_service(config: SightlineConfig) -> Result<()> {
    info!(listen = %config.server.listen, "starting sightline catalog");

    let service = CatalogService::new(config)?;
    service.start().await?;

    for handle in service.poller().workers() {
        info!(provider = %handle.provider().item.name, "worker launched");
    }

    service.wait_for_shutdown().await?;

    info!("initiating graceful shutdown");
    service.stop().await?;
    Ok(())
}

/// Handle configuration commands
fn handle_config(config: &SightlineConfig, show: bool) -> Result<()> {
    if show {
        println!("Effective configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    } else {
        config.validate()?;
        println!("Configuration is valid");
    }

    Ok(())
}

fn list_providers(config: &SightlineConfig) -> Result<()> {
    let storage = storage::open(&config.backend)?;
    let connectors = ConnectorRegistry::new();

    for provider in storage.list_providers(ProviderFilter::all())? {
        let status = if !connectors.contains(&provider.connector) {
            "unknown connector"
        } else if provider.enabled {
            "enabled"
        } else {
            "disabled"
        };
        println!(
            "{}\t{}\t{}\t{}",
            provider.item.id, provider.item.name, provider.connector, status
        );
    }

    Ok(())
}

async fn export_metrics(config: SightlineConfig, format: &str, output: Option<&Path>) -> Result<()> {
    let limit = Duration::from_secs(config.server.graceful_timeout);
    let service = CatalogService::new(config)?;
    service.start().await?;

    let workers = service.poller().workers();
    let settled = tokio::time::timeout(limit, async {
        while service.metrics().get_stats().refreshes < workers.len() as u64
            || workers.iter().any(|worker| worker.is_refreshing())
        {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    if settled.is_err() {
        warn!(timeout = ?limit, "initial refreshes still running, exporting partial metrics");
    }

    let snapshot = service.metrics().export_metrics(format);
    service.stop().await?;
    let snapshot = snapshot?;

    match output {
        Some(path) => {
            std::fs::write(path, snapshot).with_context(|| format!("unable to write {}", path.display()))?;
            println!("Metrics exported to: {}", path.display());
        }
        None => println!("{}", snapshot),
    }

    Ok(())
}

fn print_collections(config: &SightlineConfig, parent: Option<&str>) -> Result<()> {
    let storage = storage::open(&config.backend)?;
    let tree = collection::tree(&storage, parent)?;
    println!("{}", serde_json::to_string_pretty(&tree)?);
    Ok(())
}
