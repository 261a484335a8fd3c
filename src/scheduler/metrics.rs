//! Self-observability for the refresh loop.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `query_exporter_source_runs_total` | Counter | `source`, `phase`, `status` |
//! | `query_exporter_source_duration_seconds` | Histogram | `source`, `phase` |
//! | `query_exporter_source_last_success_timestamp_seconds` | Gauge | `source` |
//! | `query_exporter_cycle_duration_seconds` | Histogram | |
//! | `query_exporter_registered_sources` | Gauge | |

use std::time::Duration;

use prometheus::{
    GaugeVec, Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
};
use strum_macros::AsRefStr;

/// Buckets for query and cycle durations, in seconds.
pub const DURATION_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0];

/// Which step of a source's lifecycle ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    /// Build and register a collector (runs the initial query).
    Register,
    /// Refresh an already registered collector.
    Update,
}

/// How a phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failure,
    /// The minimum interval suppressed the query.
    Skipped,
}

/// Scheduler metrics registered on the exporter's own registry.
///
/// Cheap to clone; every field is a shared handle.
#[derive(Clone)]
pub struct SchedulerMetrics {
    source_runs_total: IntCounterVec,
    source_duration_seconds: HistogramVec,
    source_last_success: GaugeVec,
    cycle_duration_seconds: Histogram,
    registered_sources: IntGauge,
}

impl std::fmt::Debug for SchedulerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerMetrics").finish_non_exhaustive()
    }
}

impl SchedulerMetrics {
    /// Create the metrics and register them with `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error if a metric with the same name is already registered.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let source_runs_total = IntCounterVec::new(
            Opts::new(
                "query_exporter_source_runs_total",
                "Source registrations and updates by outcome",
            ),
            &["source", "phase", "status"],
        )?;
        registry.register(Box::new(source_runs_total.clone()))?;

        let source_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "query_exporter_source_duration_seconds",
                "Time spent registering or updating a source",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["source", "phase"],
        )?;
        registry.register(Box::new(source_duration_seconds.clone()))?;

        let source_last_success = GaugeVec::new(
            Opts::new(
                "query_exporter_source_last_success_timestamp_seconds",
                "Unix time of the last successful query per source",
            ),
            &["source"],
        )?;
        registry.register(Box::new(source_last_success.clone()))?;

        let cycle_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "query_exporter_cycle_duration_seconds",
                "Time spent on one full refresh cycle",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(cycle_duration_seconds.clone()))?;

        let registered_sources = IntGauge::new(
            "query_exporter_registered_sources",
            "Number of collectors currently registered",
        )?;
        registry.register(Box::new(registered_sources.clone()))?;

        Ok(Self {
            source_runs_total,
            source_duration_seconds,
            source_last_success,
            cycle_duration_seconds,
            registered_sources,
        })
    }

    /// Record one registration or update attempt.
    pub fn record_run(&self, source: &str, phase: Phase, status: RunStatus, elapsed: Duration) {
        self.source_runs_total
            .with_label_values(&[source, phase.as_ref(), status.as_ref()])
            .inc();

        if status != RunStatus::Skipped {
            self.source_duration_seconds
                .with_label_values(&[source, phase.as_ref()])
                .observe(elapsed.as_secs_f64());
        }

        if status == RunStatus::Success {
            let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
            self.source_last_success.with_label_values(&[source]).set(now);
        }
    }

    pub fn observe_cycle(&self, elapsed: Duration) {
        self.cycle_duration_seconds.observe(elapsed.as_secs_f64());
    }

    pub fn set_registered_sources(&self, count: usize) {
        self.registered_sources
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Drop every series labeled with `source`.
    pub fn remove_source(&self, source: &str) {
        for phase in [Phase::Register, Phase::Update] {
            for status in [RunStatus::Success, RunStatus::Failure, RunStatus::Skipped] {
                let _ = self
                    .source_runs_total
                    .remove_label_values(&[source, phase.as_ref(), status.as_ref()]);
            }
            let _ = self
                .source_duration_seconds
                .remove_label_values(&[source, phase.as_ref()]);
        }
        let _ = self.source_last_success.remove_label_values(&[source]);
    }
}
