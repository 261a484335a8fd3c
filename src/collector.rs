//! Collector Layer
//!
//! Query-backed metric caches and the registry the pull endpoint reads.
//!
//! # Architecture
//!
//! - [`QueryCollector`]: caches one source's latest records behind fixed descriptors
//! - [`MinInterval`]: per-source frequency cap parsed from the query text
//! - [`Registry`]: concurrency-safe table of registered collectors
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use query_exporter::{QueryCollector, Registry, SqliteRunner, SqliteRunnerOptions, ValueKind};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let runner = SqliteRunner::connect("sqlite:data/metrics.db", SqliteRunnerOptions::default()).await?;
//! let registry = Registry::new();
//! let collector = Arc::new(QueryCollector::new(
//!     Arc::new(runner),
//!     ValueKind::Gauge,
//!     "jobs_pending",
//!     "SELECT queue, COUNT(*) AS value FROM jobs GROUP BY queue",
//! ));
//! registry.register(collector).await?;
//! println!("{}", registry.encode_text().await?);
//! # Ok(())
//! # }
//! ```

mod descriptor;
mod query_collector;
mod registry;
mod throttle;

pub use descriptor::{Descriptor, Sample, ValueKind};
pub use query_collector::{DEFAULT_QUERY_TIMEOUT, QueryCollector, UpdateOutcome};
pub use registry::{Registry, RegistryError};
pub use throttle::{MIN_INTERVAL_MARKER, MinInterval, Permit, parse_min_interval};
