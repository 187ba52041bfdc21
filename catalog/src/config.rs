//! Configuration management for the Sightline daemon
//!
//! Configuration is layered: built-in defaults, then an optional TOML
//! file, then `SIGHTLINE_*` environment variables. The result is validated
//! once all layers are applied.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::storage::memory::MEMORY_DRIVER;
use crate::timerange::TimeRange;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SightlineConfig {
    /// HTTP surface settings, consumed by the front end
    pub server: ServerConfig,

    /// Defaults applied to plot requests
    pub defaults: DefaultsConfig,

    /// Persistence backend
    pub backend: BackendConfig,

    /// Catalog state cache
    pub cache: CacheConfig,

    /// Provider workers
    pub poller: PollerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,

    /// Seconds allowed for a graceful shutdown
    pub graceful_timeout: u64,

    /// URL base, stored without its trailing slash
    pub root_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub time_range: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub driver: String,

    /// Seed file holding providers, graphs and collections (TOML or JSON)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding catalog state dumps; warm start is disabled when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    pub dump_on_shutdown: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Capacity of each worker's filter diagnostics channel
    pub messages_capacity: usize,

    /// Upper bound in seconds for one connector refresh, 0 for none
    pub refresh_timeout: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// Log format, `json` or `pretty`
    pub format: String,

    /// Log file path; logs go to stdout when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics collection
    pub enabled: bool,

    /// Prefix of every metric name
    pub namespace: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "localhost:12003".to_string(),
            graceful_timeout: 30,
            root_path: String::new(),
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            time_range: "-1h".to_string(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            driver: MEMORY_DRIVER.to_string(),
            path: None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: dirs::cache_dir().map(|dir| dir.join("sightline")),
            dump_on_shutdown: true,
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            messages_capacity: crate::catalog::filter::DEFAULT_MESSAGES_CAPACITY,
            refresh_timeout: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "sightline".to_string(),
        }
    }
}

impl SightlineConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.to_string_lossy().to_string(),
        })?;

        let mut config: SightlineConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError { reason: e.to_string() })?;

        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = SightlineConfig::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, then the file at `config_path` if it exists, then environment variables
    pub fn load_with_fallback<P: AsRef<Path>>(config_path: Option<P>) -> ConfigResult<Self> {
        let mut config = SightlineConfig::default();

        if let Some(path) = config_path {
            if path.as_ref().exists() {
                config = SightlineConfig::from_file(path)?;
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SIGHTLINE_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen) = lookup("SIGHTLINE_LISTEN") {
            self.server.listen = listen;
        }

        if let Some(root_path) = lookup("SIGHTLINE_ROOT_PATH") {
            self.server.root_path = root_path;
        }

        if let Some(timeout) = lookup("SIGHTLINE_GRACEFUL_TIMEOUT") {
            self.server.graceful_timeout = timeout.parse().map_err(|_| ConfigError::InvalidValue {
                field: "SIGHTLINE_GRACEFUL_TIMEOUT".to_string(),
                value: timeout,
            })?;
        }

        if let Some(time_range) = lookup("SIGHTLINE_DEFAULT_TIME_RANGE") {
            self.defaults.time_range = time_range;
        }

        if let Some(cache_path) = lookup("SIGHTLINE_CACHE_PATH") {
            self.cache.path = Some(PathBuf::from(cache_path));
        }

        if let Some(log_level) = lookup("SIGHTLINE_LOG_LEVEL") {
            self.logging.level = log_level;
        }

        self.normalize();
        Ok(())
    }

    fn normalize(&mut self) {
        let trimmed = self.server.root_path.trim_end_matches('/').len();
        self.server.root_path.truncate(trimmed);
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.server.listen.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "server.listen".to_string(),
                value: String::new(),
            });
        }

        if self.server.graceful_timeout == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.graceful_timeout".to_string(),
                value: "0".to_string(),
            });
        }

        if TimeRange::parse(&self.defaults.time_range).is_err() {
            return Err(ConfigError::InvalidValue {
                field: "defaults.time_range".to_string(),
                value: self.defaults.time_range.clone(),
            });
        }

        if self.backend.driver != MEMORY_DRIVER {
            return Err(ConfigError::InvalidValue {
                field: "backend.driver".to_string(),
                value: self.backend.driver.clone(),
            });
        }

        if self.poller.messages_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poller.messages_capacity".to_string(),
                value: "0".to_string(),
            });
        }

        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidValue {
                field: "logging.format".to_string(),
                value: self.logging.format.clone(),
            });
        }

        if self.metrics.namespace.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "metrics.namespace".to_string(),
                value: String::new(),
            });
        }

        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> ConfigResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("sightline").join("sightline.toml"))
            .ok_or_else(|| ConfigError::ValidationFailed {
                reason: "Unable to determine config directory".to_string(),
            })
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|_| ConfigError::ValidationFailed {
                reason: format!("Unable to create config directory: {}", parent.display()),
            })?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationFailed { reason: e.to_string() })?;

        fs::write(path, content).map_err(|_| ConfigError::PermissionDenied {
            path: path.to_string_lossy().to_string(),
        })?;

        Ok(())
    }
}
