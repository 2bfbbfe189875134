//! Configuration module for sparkstore.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Database settings (path, pool size, statement timeout)
//! - Ingest settings (visible and internal metric namespaces, sequence metric)

mod app;
mod validation;

pub use app::{AppConfig, DatabaseConfig, IngestConfig};
pub use validation::{ConfigError, expand_env_vars, parse_duration};

// Re-export constants
pub use app::{DEFAULT_DB_PATH, DEFAULT_POOL_SIZE, DEFAULT_STATEMENT_TIMEOUT};
