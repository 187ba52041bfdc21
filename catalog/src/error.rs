//! Error handling for the Sightline catalog core
//!
//! This module provides the error types for every catalog operation,
//! from record insertion and filtering to series normalization, item
//! resolution and persisted item validation.

use std::io;

use thiserror::Error;

/// The main error type for the catalog core
#[derive(Error, Debug)]
pub enum SightlineError {
    /// Catalog lookup and insertion errors
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Input validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Persisted item errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Series normalization errors
    #[error("Series error: {0}")]
    Series(#[from] SeriesError),

    /// Item resolution errors
    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    /// Connector errors
    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Metrics errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),

    /// Regular expression compilation errors
    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// State dump encoding errors
    #[error("State encoding error: {0}")]
    Encoding(String),

    /// State dump decoding errors
    #[error("State decoding error: {0}")]
    Decoding(String),

    /// Generic errors
    #[error("{0}")]
    Generic(String),
}

/// Catalog specific errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    #[error("unknown origin: {name}")]
    UnknownOrigin { name: String },

    #[error("unknown source: {name}")]
    UnknownSource { name: String },

    #[error("unknown metric: {name}")]
    UnknownMetric { name: String },

    #[error("invalid record: {reason}")]
    InvalidRecord { reason: String },
}

/// Validation errors, raised synchronously before any state is touched
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("invalid identifier: {value}")]
    InvalidId { value: String },

    #[error("invalid name: {value}")]
    InvalidName { value: String },

    #[error("invalid alias: {value}")]
    InvalidAlias { value: String },

    #[error("invalid refresh interval: {value}")]
    InvalidInterval { value: i64 },

    #[error("invalid priority: {value}")]
    InvalidPriority { value: i64 },

    #[error("invalid time range: {value}")]
    InvalidRange { value: String },

    #[error("invalid template: {reason}")]
    InvalidTemplate { reason: String },

    #[error("invalid sample: {value}")]
    InvalidSample { value: i64 },

    #[error("invalid type for key {key}: expected {expected}")]
    InvalidType { key: String, expected: String },

    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error("invalid parent: {id}")]
    InvalidParent { id: String },
}

/// Persisted item errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("{kind} not found: {id}")]
    ItemNotFound { kind: String, id: String },

    #[error("{kind} conflicts with an existing item: {name}")]
    ItemConflict { kind: String, name: String },

    #[error("{kind} references an unknown item: {id}")]
    UnknownReference { kind: String, id: String },

    #[error("unsupported storage driver: {driver}")]
    UnsupportedDriver { driver: String },

    #[error("failed to load seed file {path}: {reason}")]
    SeedLoadFailed { path: String, reason: String },
}

/// Series normalization errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SeriesError {
    #[error("empty series")]
    EmptySeries,

    #[error("unnormalized series")]
    UnnormalizedSeries,
}

/// Item resolution errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("unresolvable item {id}: linked template {link_id} not found")]
    UnresolvableItem { id: String, link_id: String },
}

/// Connector errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectorError {
    #[error("unsupported connector type: {kind}")]
    UnsupportedConnector { kind: String },

    #[error("operation not supported by connector {name}: {operation}")]
    Unsupported { name: String, operation: String },

    #[error("invalid connector settings: {reason}")]
    InvalidSettings { reason: String },

    #[error("refresh failed: {reason}")]
    RefreshFailed { reason: String },

    #[error("points query failed: {reason}")]
    PointsFailed { reason: String },

    #[error("refresh timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("refresh cancelled")]
    Cancelled,
}

/// Configuration related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid configuration value: {field} = {value}")]
    InvalidValue { field: String, value: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Configuration file permission denied: {path}")]
    PermissionDenied { path: String },

    #[error("Configuration parsing error: {reason}")]
    ParseError { reason: String },

    #[error("Unknown configuration flag: {flag}")]
    FlagNotFound { flag: String },

    #[error("Logging initialization failed: {reason}")]
    LoggingInit { reason: String },
}

/// Metrics related errors
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Metrics export failed: {reason}")]
    ExportFailed { reason: String },

    #[error("Metric registration failed: {name}")]
    RegistrationFailed { name: String },
}

/// Error kinds, independent of the subsystem that raised the error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Conflict,
    Series,
    Resolution,
    Connector,
    Config,
    Io,
    Internal,
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, SightlineError>;

/// A specialized result type for catalog operations
pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

/// A specialized result type for validation
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;

/// A specialized result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A specialized result type for series operations
pub type SeriesResult<T> = std::result::Result<T, SeriesError>;

/// A specialized result type for connector operations
pub type ConnectorResult<T> = std::result::Result<T, ConnectorError>;

/// A specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// A specialized result type for metrics operations
pub type MetricsResult<T> = std::result::Result<T, MetricsError>;

impl SightlineError {
    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            SightlineError::Catalog(CatalogError::InvalidRecord { .. }) => ErrorKind::Validation,
            SightlineError::Catalog(_) => ErrorKind::NotFound,
            SightlineError::Validation(_) => ErrorKind::Validation,
            SightlineError::Storage(StorageError::ItemNotFound { .. }) => ErrorKind::NotFound,
            SightlineError::Storage(StorageError::ItemConflict { .. })
            | SightlineError::Storage(StorageError::UnknownReference { .. }) => ErrorKind::Conflict,
            SightlineError::Storage(_) => ErrorKind::Io,
            SightlineError::Series(_) => ErrorKind::Series,
            SightlineError::Resolution(_) => ErrorKind::Resolution,
            SightlineError::Connector(_) => ErrorKind::Connector,
            SightlineError::Config(ConfigError::FlagNotFound { .. }) => ErrorKind::NotFound,
            SightlineError::Config(_) => ErrorKind::Config,
            SightlineError::Pattern(_) => ErrorKind::Validation,
            SightlineError::Io(_) | SightlineError::Encoding(_) | SightlineError::Decoding(_) => ErrorKind::Io,
            SightlineError::Metrics(_) | SightlineError::Serialization(_) | SightlineError::Generic(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Check if this error may clear up on a later attempt
    pub fn is_recoverable(&self) -> bool {
        match self {
            SightlineError::Connector(ConnectorError::UnsupportedConnector { .. }) => false,
            SightlineError::Connector(ConnectorError::InvalidSettings { .. }) => false,
            SightlineError::Connector(_) => true,
            SightlineError::Validation(_) => false,
            SightlineError::Config(_) => false,
            SightlineError::Io(io_error) => {
                matches!(io_error.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock)
            }
            _ => true,
        }
    }

    /// Get the error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            SightlineError::Catalog(_) => "catalog",
            SightlineError::Validation(_) => "validation",
            SightlineError::Storage(_) => "storage",
            SightlineError::Series(_) => "series",
            SightlineError::Resolution(_) => "resolution",
            SightlineError::Connector(_) => "connector",
            SightlineError::Config(_) => "config",
            SightlineError::Metrics(_) => "metrics",
            SightlineError::Pattern(_) => "pattern",
            SightlineError::Io(_) => "io",
            SightlineError::Serialization(_) => "serialization",
            SightlineError::Encoding(_) | SightlineError::Decoding(_) => "state",
            SightlineError::Generic(_) => "generic",
        }
    }
}

impl From<String> for SightlineError {
    fn from(msg: String) -> Self {
        SightlineError::Generic(msg)
    }
}

impl From<&str> for SightlineError {
    fn from(msg: &str) -> Self {
        SightlineError::Generic(msg.to_string())
    }
}
