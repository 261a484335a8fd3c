//! Application configuration structures.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::collector::DEFAULT_QUERY_TIMEOUT;
use crate::scheduler::{RegistrationPolicy, SchedulerSettings};
use crate::source::ModifiedStamp;

use super::queries::QueriesConfig;
use super::validation::{ConfigError, expand_env_vars};

// =============================================================================
// Constants
// =============================================================================

/// Default pull endpoint port.
pub const DEFAULT_PORT: u16 = 9348;

/// Default refresh interval (5 minutes).
pub const DEFAULT_REFRESH: Duration = Duration::from_secs(300);

/// Smallest accepted refresh interval.
pub const MIN_REFRESH: Duration = Duration::from_secs(1);

/// Default connection pool size.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 4;

/// Default pool acquire timeout (30 seconds).
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

fn default_refresh() -> Duration {
    DEFAULT_REFRESH
}

fn default_query_timeout() -> Duration {
    DEFAULT_QUERY_TIMEOUT
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_acquire_timeout() -> Duration {
    DEFAULT_ACQUIRE_TIMEOUT
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Pull endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (default: "0.0.0.0").
    pub bind: String,

    /// Port (default: 9348).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerConfig {
    /// Socket address to listen on. Call after [`AppConfig::validate`].
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.bind.parse().map_err(|_| {
            ConfigError::ValidationError(format!("invalid server bind address: '{}'", self.bind))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

// =============================================================================
// Database Configuration
// =============================================================================

/// Database connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL, e.g. `sqlite:data/metrics.db?mode=ro`. `${VAR}` references are expanded.
    pub url: String,

    /// Pool size (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long to wait for a pooled connection (default: 30s).
    #[serde(default = "default_acquire_timeout", with = "humantime_serde")]
    pub acquire_timeout: Duration,
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    pub database: DatabaseConfig,

    /// Interval between refresh cycles (default: 5m, minimum: 1s).
    #[serde(default = "default_refresh", with = "humantime_serde")]
    pub refresh: Duration,

    /// Deadline for one query execution (default: 2m).
    #[serde(default = "default_query_timeout", with = "humantime_serde")]
    pub query_timeout: Duration,

    /// What a failed registration does to the process (default: retry).
    #[serde(default)]
    pub registration_failure: RegistrationPolicy,

    #[serde(flatten)]
    pub queries: QueriesConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// The database URL has environment references expanded and relative
    /// query paths are resolved against the config file's directory.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::ParseError {
                path: path.to_path_buf(),
                source,
            })?;

        config.database.url = expand_env_vars(&config.database.url);
        if let Some(base) = path.parent() {
            config.queries.resolve_relative(base);
        }
        config.validate()?;
        Ok(config)
    }

    /// Load configuration and a stamp primed with the file's modification
    /// time, for hot reload.
    ///
    /// The time is read before the content so an edit racing the load is
    /// seen as a change on the next check.
    pub fn load_with_stamp(path: impl AsRef<Path>) -> Result<(Self, ModifiedStamp), ConfigError> {
        let path = path.as_ref();
        let modified = std::fs::metadata(path)
            .and_then(|meta| meta.modified())
            .map_err(|source| ConfigError::IoError {
                path: path.to_path_buf(),
                source,
            })?;
        let config = Self::load(path)?;
        Ok((config, ModifiedStamp::with_modified(path, modified)))
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.socket_addr()?;

        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server port must be non-zero".to_string(),
            ));
        }

        if self.database.url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "database url cannot be empty".to_string(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "database max_connections must be positive".to_string(),
            ));
        }

        if self.refresh < MIN_REFRESH {
            return Err(ConfigError::ValidationError(format!(
                "refresh must be at least {}",
                humantime::format_duration(MIN_REFRESH)
            )));
        }

        if self.query_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "query_timeout must be positive".to_string(),
            ));
        }

        self.queries.validate()
    }

    /// Scheduler settings derived from this configuration.
    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            refresh: self.refresh,
            query_timeout: self.query_timeout,
            policy: self.registration_failure,
        }
    }
}
