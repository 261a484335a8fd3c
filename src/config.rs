//! Configuration module.
//!
//! YAML configuration for:
//! - Pull endpoint (bind address, port)
//! - Database connection (url, pool size)
//! - Refresh cadence, query deadline and registration failure policy
//! - Query files grouped by value kind

mod app;
mod queries;
mod validation;

pub use app::{
    AppConfig, DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_MAX_CONNECTIONS, DEFAULT_PORT, DEFAULT_REFRESH,
    DatabaseConfig, MIN_REFRESH, ServerConfig,
};
pub use queries::{QueriesConfig, QueryFile, QuerySpec};
pub use validation::{ConfigError, expand_env_vars, parse_duration, parse_refresh};
