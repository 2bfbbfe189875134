//! Application configuration structures.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::validation::{ConfigError, expand_env_vars};

// =============================================================================
// Constants
// =============================================================================

/// Default database file.
pub const DEFAULT_DB_PATH: &str = "data/sparkstore.duckdb";

/// Default connection pool size.
pub const DEFAULT_POOL_SIZE: u32 = 4;

/// Default bound on a single storage call (5 seconds).
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default metric carrying the birth/death sequence.
pub const DEFAULT_SEQUENCE_METRIC: &str = "bdSeq";

fn default_db_path() -> String {
    DEFAULT_DB_PATH.to_string()
}

fn default_pool_size() -> u32 {
    DEFAULT_POOL_SIZE
}

fn default_statement_timeout() -> Duration {
    DEFAULT_STATEMENT_TIMEOUT
}

fn default_visible_prefixes() -> Vec<String> {
    vec!["Inputs/".to_string()]
}

fn default_internal_prefixes() -> Vec<String> {
    ["Node Control/", "Device Control/", "Properties/"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_sequence_metric() -> String {
    DEFAULT_SEQUENCE_METRIC.to_string()
}

// =============================================================================
// Database Configuration
// =============================================================================

/// Database configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file path, or `:memory:`.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Storage connection pool size (default: 4).
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Bound on every storage call (default: "5s").
    #[serde(default = "default_statement_timeout", with = "humantime_serde")]
    pub statement_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            pool_size: DEFAULT_POOL_SIZE,
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
        }
    }
}

// =============================================================================
// Ingest Configuration
// =============================================================================

/// Metric namespace settings for BIRTH handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// BIRTH pre-creates relations only for metrics under these prefixes.
    /// An empty list admits every non-internal metric.
    #[serde(default = "default_visible_prefixes")]
    pub visible_prefixes: Vec<String>,

    /// Control and property namespaces never pre-created.
    #[serde(default = "default_internal_prefixes")]
    pub internal_prefixes: Vec<String>,

    #[serde(default = "default_sequence_metric")]
    pub sequence_metric: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            visible_prefixes: default_visible_prefixes(),
            internal_prefixes: default_internal_prefixes(),
            sequence_metric: default_sequence_metric(),
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub ingest: IngestConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// `${VAR}` and `${VAR:-default}` references are expanded before parsing.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(&expand_env_vars(content))?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the database path (command line or environment override).
    pub fn with_db_path(mut self, path: impl Into<String>) -> Self {
        self.database.path = path.into();
        self
    }

    /// Replace the statement timeout (command line or environment override).
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.database.statement_timeout = timeout;
        self
    }

    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.database.path)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "database path cannot be empty".to_string(),
            ));
        }

        if self.database.pool_size == 0 {
            return Err(ConfigError::ValidationError(
                "database pool_size must be positive".to_string(),
            ));
        }

        if self.database.statement_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "database statement_timeout must be positive".to_string(),
            ));
        }

        if self.ingest.sequence_metric.is_empty() {
            return Err(ConfigError::ValidationError(
                "ingest sequence_metric cannot be empty".to_string(),
            ));
        }

        if let Some(prefix) = self
            .ingest
            .visible_prefixes
            .iter()
            .find(|p| self.ingest.internal_prefixes.contains(p))
        {
            return Err(ConfigError::ValidationError(format!(
                "prefix '{prefix}' is both visible and internal"
            )));
        }

        Ok(())
    }
}
