//! Query Exporter - SQL query results as Prometheus metrics
//!
//! This crate runs a set of SQL query files against a database on a fixed,
//! wall-clock aligned cycle and exposes the latest results on a Prometheus
//! pull endpoint. It can be used as a library, or run as a standalone binary
//! with the `query-exporter` executable.
//!
//! # Architecture
//!
//! - **Row**: converts engine rows into label/value records
//! - **Query**: the runner seam and its SQLite implementation
//! - **Collector**: per-source metric caches and the shared registry
//! - **Source**: query files, modification tracking and registration lifecycle
//! - **Scheduler**: the aligned refresh loop with config hot reload
//! - **Server**: `/metrics` and `/healthz`
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use query_exporter::{AppConfig, Registry, Scheduler, SchedulerMetrics, SqliteRunner};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load("configs/config.yaml")?;
//!     let runner = SqliteRunner::connect(&config.database.url, Default::default()).await?;
//!     let registry = Arc::new(Registry::new());
//!     let metrics = SchedulerMetrics::new(registry.internal())?;
//!
//!     Scheduler::new(config.scheduler_settings(), Arc::new(runner), registry, metrics)
//!         .with_sources(config.queries.specs())
//!         .run(Default::default())
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod collector;
pub mod config;
pub mod query;
pub mod row;
pub mod scheduler;
pub mod server;
pub mod source;

pub use collector::{
    Descriptor, QueryCollector, Registry, RegistryError, Sample, UpdateOutcome, ValueKind,
};
pub use config::{AppConfig, ConfigError, QuerySpec};
pub use query::{QueryError, QueryRunner, SqliteRunner, SqliteRunnerOptions};
pub use row::{Record, Row, Value, row_to_record};
pub use scheduler::{
    CycleReport, RegistrationPolicy, Scheduler, SchedulerError, SchedulerMetrics,
    SchedulerSettings,
};
pub use server::{AppState, create_router};
pub use source::{ModifiedStamp, SourceEntry, SourceError, TemplateVars};
