//! Process-wide logging setup

use std::path::Path;
use std::str::FromStr;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{ConfigError, ConfigResult};

/// Keeps buffered file output alive; dropping it flushes pending lines
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

fn init_error(e: impl ToString) -> ConfigError {
    ConfigError::LoggingInit { reason: e.to_string() }
}

/// Filter at `level` for this crate, with noisy dependencies held at `warn`
pub fn build_filter(level: &str) -> ConfigResult<EnvFilter> {
    let level = Level::from_str(level).map_err(|_| ConfigError::InvalidValue {
        field: "logging.level".to_string(),
        value: level.to_string(),
    })?;

    Ok(EnvFilter::from_default_env()
        .add_directive(format!("sightline_catalog={}", level).parse().map_err(init_error)?)
        .add_directive(format!("sightline={}", level).parse().map_err(init_error)?)
        .add_directive("tokio=warn".parse().map_err(init_error)?)
        .add_directive("mio=warn".parse().map_err(init_error)?))
}

/// Install the global subscriber described by `config`
///
/// `level_override` wins over `config.level`. Fails when a global
/// subscriber is already installed.
pub fn init(config: &LoggingConfig, level_override: Option<&str>) -> ConfigResult<LoggingGuard> {
    let filter = build_filter(level_override.unwrap_or(&config.level))?;

    let (writer, guard) = match &config.file_path {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .ok_or_else(|| init_error(format!("invalid log file path: {}", path.display())))?;

            let appender = tracing_appender::rolling::daily(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(writer), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stdout), None),
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.format == "json" {
        registry.with(fmt::layer().json().with_writer(writer)).try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_ansi(guard.is_none())
                    .with_writer(writer),
            )
            .try_init()
    };
    result.map_err(init_error)?;

    Ok(LoggingGuard { _file: guard })
}
