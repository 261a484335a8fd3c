//! The refresh loop.
//!
//! One [`Scheduler`] owns every [`SourceEntry`]. Each cycle fans out one task
//! per entry, joins them all, then sleeps until the next aligned wake-up.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::collector::{DEFAULT_QUERY_TIMEOUT, Registry, UpdateOutcome};
use crate::config::{AppConfig, DEFAULT_REFRESH, QuerySpec};
use crate::query::QueryRunner;
use crate::scheduler::clock;
use crate::scheduler::metrics::{Phase, RunStatus, SchedulerMetrics};
use crate::source::{ModifiedStamp, SourceEntry, TemplateVars};

/// What a failed registration does to the scheduler.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum RegistrationPolicy {
    /// Stop the scheduler at the end of the cycle.
    Fatal,
    /// Log it and register again on the next cycle.
    #[default]
    Retry,
}

/// Scheduler tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Cycle period; wake-ups land on exact multiples of it.
    pub refresh: Duration,
    /// Deadline for each query.
    pub query_timeout: Duration,
    /// Reaction to a failed registration.
    pub policy: RegistrationPolicy,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            refresh: DEFAULT_REFRESH,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            policy: RegistrationPolicy::default(),
        }
    }
}

/// Errors that stop the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A registration failed under [`RegistrationPolicy::Fatal`].
    #[error("registration failed for source '{source_name}': {message}")]
    Registration { source_name: String, message: String },

    /// Bookkeeping and registry disagree; always fatal.
    #[error("registry is inconsistent: {0}")]
    Consistency(String),
}

/// How one source fared in one cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutcome {
    /// A new collector was registered. `init_error` holds the failure of its
    /// first query, if any.
    Registered { init_error: Option<String> },
    /// The registered collector ran its query.
    Refreshed { records: usize },
    /// The minimum interval suppressed the query.
    Skipped,
    /// Nothing registered and nothing to register.
    Idle,
    QueryFailed(String),
    RegistrationFailed(String),
    Inconsistent(String),
}

impl SourceOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::Registered {
                init_error: Some(_)
            } | Self::QueryFailed(_)
                | Self::RegistrationFailed(_)
                | Self::Inconsistent(_)
        )
    }

    fn phase_status(&self) -> Option<(Phase, RunStatus)> {
        match self {
            Self::Registered { init_error: None } => Some((Phase::Register, RunStatus::Success)),
            Self::Registered { init_error: Some(_) }
            | Self::RegistrationFailed(_)
            | Self::Inconsistent(_) => Some((Phase::Register, RunStatus::Failure)),
            Self::Refreshed { .. } => Some((Phase::Update, RunStatus::Success)),
            Self::Skipped => Some((Phase::Update, RunStatus::Skipped)),
            Self::QueryFailed(_) => Some((Phase::Update, RunStatus::Failure)),
            Self::Idle => None,
        }
    }
}

/// Per-source result of a cycle.
#[derive(Debug, Clone)]
pub struct SourceReport {
    pub source: String,
    pub outcome: SourceOutcome,
    pub elapsed: Duration,
}

/// Result of one [`Scheduler::run_cycle`], sources sorted by name.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub sources: Vec<SourceReport>,
    pub elapsed: Duration,
}

impl CycleReport {
    /// Outcome for `source`, if it took part in the cycle.
    pub fn outcome(&self, source: &str) -> Option<&SourceOutcome> {
        self.sources
            .iter()
            .find(|report| report.source == source)
            .map(|report| &report.outcome)
    }

    pub fn failures(&self) -> usize {
        self.sources
            .iter()
            .filter(|report| report.outcome.is_failure())
            .count()
    }
}

/// Everything a per-source task needs, shared across one cycle.
#[derive(Clone)]
struct CycleContext {
    registry: Arc<Registry>,
    runner: Arc<dyn QueryRunner>,
    metrics: SchedulerMetrics,
    vars: TemplateVars,
    query_timeout: Duration,
}

impl CycleContext {
    async fn refresh(&self, entry: Arc<Mutex<SourceEntry>>, force_register: bool) -> SourceReport {
        let mut entry = entry.lock().await;
        let started = Instant::now();

        let modified = match entry.is_modified().await {
            Ok(modified) => modified,
            Err(e) => {
                tracing::warn!(source = %entry.name(), error = %e, "Failed to stat source");
                false
            }
        };

        let outcome = if modified || force_register {
            self.register(&mut entry).await
        } else {
            self.update(&entry).await
        };

        let elapsed = started.elapsed();
        if let Some((phase, status)) = outcome.phase_status() {
            self.metrics.record_run(entry.name(), phase, status, elapsed);
        }
        SourceReport {
            source: entry.name().to_string(),
            outcome,
            elapsed,
        }
    }

    async fn register(&self, entry: &mut SourceEntry) -> SourceOutcome {
        tracing::info!(
            source = %entry.name(),
            kind = %entry.kind(),
            path = %entry.path().display(),
            "Registering source"
        );

        let collector = match entry
            .build_collector(Arc::clone(&self.runner), &self.vars, self.query_timeout)
            .await
        {
            Ok(collector) => Arc::new(collector),
            Err(e) => {
                // A registered collector keeps updating from the query it
                // already read; the next file change triggers a new attempt.
                if entry.collector().is_none() {
                    entry.invalidate();
                }
                tracing::error!(source = %entry.name(), error = %e, "Registration failed");
                return SourceOutcome::RegistrationFailed(e.to_string());
            }
        };

        match entry.register(&self.registry, Arc::clone(&collector)).await {
            Ok(()) => {
                let init_error = collector.take_init_error().map(|e| e.to_string());
                if init_error.is_some() {
                    // No descriptors were derived; register again next cycle.
                    entry.invalidate();
                } else {
                    tracing::info!(
                        source = %entry.name(),
                        records = collector.snapshot().len(),
                        min_interval_secs = collector.min_interval().as_secs(),
                        "Source registered"
                    );
                }
                SourceOutcome::Registered { init_error }
            }
            Err(e) if e.is_consistency_error() => {
                tracing::error!(source = %entry.name(), error = %e, "Registry is inconsistent");
                SourceOutcome::Inconsistent(e.to_string())
            }
            Err(e) => {
                entry.invalidate();
                tracing::error!(source = %entry.name(), error = %e, "Registration failed");
                SourceOutcome::RegistrationFailed(e.to_string())
            }
        }
    }

    async fn update(&self, entry: &SourceEntry) -> SourceOutcome {
        match entry.update().await {
            Ok(Some(UpdateOutcome::Refreshed { records })) => {
                tracing::debug!(source = %entry.name(), records, "Source updated");
                SourceOutcome::Refreshed { records }
            }
            Ok(Some(UpdateOutcome::Skipped { .. })) => SourceOutcome::Skipped,
            Ok(None) => SourceOutcome::Idle,
            Err(e) => {
                tracing::warn!(source = %entry.name(), error = %e, "Query failed");
                SourceOutcome::QueryFailed(e.to_string())
            }
        }
    }
}

/// Periodic driver for all sources.
pub struct Scheduler {
    settings: SchedulerSettings,
    context: CycleContext,
    entries: Vec<Arc<Mutex<SourceEntry>>>,
    config: Option<ModifiedStamp>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("settings", &self.settings)
            .field("sources", &self.entries.len())
            .field("config", &self.config.as_ref().map(ModifiedStamp::path))
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Create a scheduler with no sources.
    ///
    /// Placeholders render with the current time as the start time.
    pub fn new(
        settings: SchedulerSettings,
        runner: Arc<dyn QueryRunner>,
        registry: Arc<Registry>,
        metrics: SchedulerMetrics,
    ) -> Self {
        let context = CycleContext {
            registry,
            runner,
            metrics,
            vars: TemplateVars::new(settings.refresh),
            query_timeout: settings.query_timeout,
        };
        Self {
            settings,
            context,
            entries: Vec::new(),
            config: None,
        }
    }

    /// Override the placeholder values.
    pub fn with_template_vars(mut self, vars: TemplateVars) -> Self {
        self.context.vars = vars;
        self
    }

    /// Add one entry per query file. Nothing is read until the first cycle.
    pub fn with_sources(mut self, specs: impl IntoIterator<Item = QuerySpec>) -> Self {
        self.entries.extend(
            specs
                .into_iter()
                .map(|spec| Arc::new(Mutex::new(SourceEntry::new(spec.path, spec.kind)))),
        );
        self
    }

    /// Reload the query lists from `stamp`'s file whenever it changes.
    pub fn watch_config(mut self, stamp: ModifiedStamp) -> Self {
        self.config = Some(stamp);
        self
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.context.registry
    }

    pub fn source_count(&self) -> usize {
        self.entries.len()
    }

    /// Run cycles until `cancel` fires.
    ///
    /// The first cycle starts immediately. Cancellation is only observed
    /// between cycles, so an in-flight cycle always runs to completion.
    /// A cycle that overruns the refresh period delays the next wake-up to
    /// the following aligned instant; cycles never overlap.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), SchedulerError> {
        tracing::info!(
            refresh = %humantime::format_duration(self.settings.refresh),
            query_timeout = %humantime::format_duration(self.settings.query_timeout),
            policy = %self.settings.policy,
            sources = self.entries.len(),
            "Scheduler started"
        );

        while !cancel.is_cancelled() {
            let config_changed = self.reload_config().await?;
            self.run_cycle(config_changed).await?;

            let delay = clock::until_next(self.settings.refresh);
            tracing::debug!(delay_ms = delay.as_millis() as u64, "Waiting for next cycle");
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!("Scheduler stopped");
        Ok(())
    }

    /// Refresh every source concurrently and wait for all of them.
    ///
    /// `force_register` re-registers every source whether or not its file
    /// changed. One source failing never affects the others.
    ///
    /// # Errors
    /// Returns [`SchedulerError::Consistency`] if any source found the registry
    /// inconsistent, and [`SchedulerError::Registration`] if a registration
    /// failed under [`RegistrationPolicy::Fatal`]. Every task has finished
    /// by then.
    pub async fn run_cycle(&mut self, force_register: bool) -> Result<CycleReport, SchedulerError> {
        let started = Instant::now();
        tracing::debug!(sources = self.entries.len(), force_register, "Refresh cycle started");

        let mut tasks = JoinSet::new();
        for entry in &self.entries {
            let context = self.context.clone();
            let entry = Arc::clone(entry);
            tasks.spawn(async move { context.refresh(entry, force_register).await });
        }

        let mut report = CycleReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(source) => report.sources.push(source),
                Err(e) => tracing::error!(error = %e, "Refresh task failed"),
            }
        }
        report.sources.sort_by(|a, b| a.source.cmp(&b.source));
        report.elapsed = started.elapsed();

        let registered = self.context.registry.len().await;
        self.context.metrics.observe_cycle(report.elapsed);
        self.context.metrics.set_registered_sources(registered);
        tracing::info!(
            elapsed_ms = report.elapsed.as_millis() as u64,
            sources = report.sources.len(),
            failures = report.failures(),
            registered,
            "Refresh cycle finished"
        );

        self.check_policy(&report)?;
        Ok(report)
    }

    fn check_policy(&self, report: &CycleReport) -> Result<(), SchedulerError> {
        if let Some(message) = report.sources.iter().find_map(|s| match &s.outcome {
            SourceOutcome::Inconsistent(message) => Some(message),
            _ => None,
        }) {
            return Err(SchedulerError::Consistency(message.clone()));
        }

        if self.settings.policy == RegistrationPolicy::Fatal
            && let Some((source_name, message)) =
                report.sources.iter().find_map(|s| match &s.outcome {
                    SourceOutcome::RegistrationFailed(message) => Some((&s.source, message)),
                    _ => None,
                })
        {
            return Err(SchedulerError::Registration {
                source_name: source_name.clone(),
                message: message.clone(),
            });
        }
        Ok(())
    }

    /// Reload the query lists if the watched config file changed.
    ///
    /// Returns whether the source set was replaced. A config that fails to
    /// stat, read or validate is logged and the current sources are kept.
    pub async fn reload_config(&mut self) -> Result<bool, SchedulerError> {
        let Some(stamp) = self.config.as_mut() else {
            return Ok(false);
        };

        match stamp.check().await {
            Ok(true) => {}
            Ok(false) => return Ok(false),
            Err(e) => {
                tracing::warn!(path = %stamp.path().display(), error = %e, "Failed to stat config file");
                return Ok(false);
            }
        }

        let path = stamp.path().to_path_buf();
        let config = match AppConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(
                    path = %path.display(),
                    error = %e,
                    "Failed to reload config, keeping current sources"
                );
                return Ok(false);
            }
        };

        tracing::info!(path = %path.display(), sources = config.queries.len(), "Config file changed");
        self.apply_sources(config.queries.specs()).await?;
        Ok(true)
    }

    /// Replace the source set.
    ///
    /// Entries whose path is still listed are kept (with the possibly new
    /// kind). Entries no longer listed are unregistered and dropped.
    pub async fn apply_sources(&mut self, specs: Vec<QuerySpec>) -> Result<(), SchedulerError> {
        let mut existing: HashMap<PathBuf, Arc<Mutex<SourceEntry>>> = HashMap::new();
        for entry in self.entries.drain(..) {
            let path = entry.lock().await.path().to_path_buf();
            existing.insert(path, entry);
        }

        let mut entries = Vec::with_capacity(specs.len());
        for spec in specs {
            let entry = match existing.remove(&spec.path) {
                Some(entry) => {
                    entry.lock().await.set_kind(spec.kind);
                    entry
                }
                None => {
                    tracing::info!(path = %spec.path.display(), kind = %spec.kind, "Source added");
                    Arc::new(Mutex::new(SourceEntry::new(spec.path, spec.kind)))
                }
            };
            entries.push(entry);
        }
        self.entries = entries;

        for removed in existing.into_values() {
            let mut entry = removed.lock().await;
            entry
                .unregister(&self.context.registry)
                .await
                .map_err(|e| SchedulerError::Consistency(e.to_string()))?;
            self.context.metrics.remove_source(entry.name());
            tracing::info!(source = %entry.name(), "Source removed");
        }
        Ok(())
    }
}
